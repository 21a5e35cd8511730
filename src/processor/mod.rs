//! Marker-driven pre/post processors.
//!
//! A route declares markers (plain values such as [`View`]); at boot the
//! [`ProcessorRegistry`] turns each marker into a [`Processor`] and wraps it
//! as an [`Interceptor`], so processors nest like any other onion layer.

use crate::dispatch::Exchange;
use crate::error::{Result, StratusError};
use crate::exception::DispatchResult;
use crate::interceptor::{Interceptor, Next};
use crate::view::TemplateEngineManager;
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod headers;
mod view;

pub use headers::{ResponseHeader, ResponseHeaderProcessor};
pub use view::{View, ViewProcessor};

/// What a pre-handler decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The response is complete; nothing further in the chain runs.
    Halt,
}

/// Cross-cutting behavior with `pre_handle`/`post_handle` hooks.
///
/// `post_handle` only runs when this processor's `pre_handle` continued and
/// nothing deeper in the chain halted.
///
/// # Example
/// ```
/// use stratus::processor::{Flow, Processor};
/// use stratus::dispatch::Exchange;
/// use stratus::exception::DispatchResult;
/// use async_trait::async_trait;
///
/// struct Audit;
///
/// #[async_trait]
/// impl Processor for Audit {
///     async fn pre_handle(&self, exchange: &mut Exchange) -> DispatchResult<Flow> {
///         exchange.put("audited", true.into());
///         Ok(Flow::Continue)
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn pre_handle(&self, _exchange: &mut Exchange) -> DispatchResult<Flow> {
        Ok(Flow::Continue)
    }

    async fn post_handle(&self, _exchange: &mut Exchange) -> DispatchResult {
        Ok(())
    }
}

/// Runs a [`Processor`] as one layer of the onion.
pub struct ProcessorInterceptor {
    processor: Arc<dyn Processor>,
}

impl ProcessorInterceptor {
    pub fn new(processor: Arc<dyn Processor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl Interceptor for ProcessorInterceptor {
    async fn intercept(&self, exchange: &mut Exchange, next: Next<'_>) -> DispatchResult {
        if self.processor.pre_handle(exchange).await? == Flow::Halt {
            exchange.halt();
            return Ok(());
        }

        next.run(exchange).await?;

        if exchange.is_halted() {
            return Ok(());
        }
        self.processor.post_handle(exchange).await
    }
}

/// A declarative marker attached to a controller or route.
#[derive(Clone)]
pub struct Marker {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Marker {
    pub fn new<M: Any + Send + Sync>(marker: M) -> Self {
        Self {
            value: Arc::new(marker),
            type_name: std::any::type_name::<M>(),
        }
    }

    pub fn marker_type(&self) -> TypeId {
        (*self.value).type_id()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        self.value.downcast_ref::<M>()
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Marker").field(&self.type_name).finish()
    }
}

type ProcessorFactory = Arc<dyn Fn(&Marker) -> Result<Arc<dyn Processor>> + Send + Sync>;

/// Processor factories keyed by marker type.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    factories: HashMap<TypeId, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`View`] and [`ResponseHeader`].
    pub fn with_defaults(engines: Arc<TemplateEngineManager>) -> Self {
        let mut registry = Self::new();
        registry
            .register::<View, _, _>(move |view| Ok(ViewProcessor::new(view, engines.clone())))
            .register::<ResponseHeader, _, _>(ResponseHeaderProcessor::from_marker);
        registry
    }

    pub fn register<M, P, F>(&mut self, factory: F) -> &mut Self
    where
        M: Any + Send + Sync,
        P: Processor,
        F: Fn(&M) -> Result<P> + Send + Sync + 'static,
    {
        let erased: ProcessorFactory = Arc::new(move |marker: &Marker| {
            let marker = marker.downcast_ref::<M>().ok_or_else(|| {
                StratusError::invalid_config(format!(
                    "marker {} dispatched to the wrong factory",
                    marker.type_name()
                ))
            })?;
            factory(marker).map(|p| Arc::new(p) as Arc<dyn Processor>)
        });
        self.factories.insert(TypeId::of::<M>(), erased);
        self
    }

    /// Takes over every factory of `other`, replacing ours for the same marker.
    pub fn merge(&mut self, other: &ProcessorRegistry) -> &mut Self {
        self.factories
            .extend(other.factories.iter().map(|(k, f)| (*k, Arc::clone(f))));
        self
    }

    pub fn contains<M: Any>(&self) -> bool {
        self.factories.contains_key(&TypeId::of::<M>())
    }

    /// Builds the ordered chain for one route: controller markers first, then
    /// route markers, each in declaration order. Unknown markers abort boot.
    pub fn chain_for(
        &self,
        route: &str,
        class_markers: &[Marker],
        method_markers: &[Marker],
    ) -> Result<Vec<Arc<dyn Interceptor>>> {
        class_markers
            .iter()
            .chain(method_markers)
            .map(|marker| {
                let factory = self.factories.get(&marker.marker_type()).ok_or_else(|| {
                    StratusError::UnknownMarker {
                        route: route.to_string(),
                        marker: marker.type_name(),
                    }
                })?;
                let processor = factory(marker)?;
                Ok(Arc::new(ProcessorInterceptor::new(processor)) as Arc<dyn Interceptor>)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::exchange::test_exchange;
    use crate::interceptor::Endpoint;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Marker: record pre/post, optionally halting in pre.
    struct Trace {
        name: &'static str,
        halt: bool,
    }

    struct TraceProcessor {
        name: &'static str,
        halt: bool,
        log: Log,
    }

    #[async_trait]
    impl Processor for TraceProcessor {
        async fn pre_handle(&self, exchange: &mut Exchange) -> DispatchResult<Flow> {
            self.log.lock().unwrap().push(format!("pre{}", self.name));
            if self.halt {
                exchange.respond(axum::http::StatusCode::TOO_MANY_REQUESTS, "text/plain", "slow down");
                return Ok(Flow::Halt);
            }
            Ok(Flow::Continue)
        }

        async fn post_handle(&self, _exchange: &mut Exchange) -> DispatchResult {
            self.log.lock().unwrap().push(format!("post{}", self.name));
            Ok(())
        }
    }

    struct Invoke(Log);

    #[async_trait]
    impl Endpoint for Invoke {
        async fn call(&self, _exchange: &mut Exchange) -> DispatchResult {
            self.0.lock().unwrap().push("invoke".into());
            Ok(())
        }
    }

    fn registry(log: &Log) -> ProcessorRegistry {
        let log = log.clone();
        let mut registry = ProcessorRegistry::new();
        registry.register::<Trace, _, _>(move |m| {
            Ok(TraceProcessor {
                name: m.name,
                halt: m.halt,
                log: log.clone(),
            })
        });
        registry
    }

    async fn run(class: Vec<Marker>, method: Vec<Marker>) -> (Vec<String>, Exchange) {
        let log: Log = Arc::default();
        let chain = registry(&log).chain_for("GET /", &class, &method).unwrap();
        let mut ex = test_exchange("/");
        Next::new(&chain, &Invoke(log.clone())).run(&mut ex).await.unwrap();
        let seen = log.lock().unwrap().clone();
        (seen, ex)
    }

    #[tokio::test]
    async fn test_onion_order() {
        let (seen, ex) = run(
            vec![Marker::new(Trace { name: "A", halt: false })],
            vec![Marker::new(Trace { name: "B", halt: false })],
        )
        .await;
        assert_eq!(seen, vec!["preA", "preB", "invoke", "postB", "postA"]);
        assert!(!ex.is_halted());
    }

    #[tokio::test]
    async fn test_short_circuit_skips_everything_after() {
        let (seen, ex) = run(
            vec![],
            vec![
                Marker::new(Trace { name: "A", halt: false }),
                Marker::new(Trace { name: "B", halt: true }),
                Marker::new(Trace { name: "C", halt: false }),
            ],
        )
        .await;
        assert_eq!(seen, vec!["preA", "preB"]);
        assert!(ex.is_halted());
        assert!(ex.is_responded());
    }

    #[test]
    fn test_unknown_marker_is_fatal() {
        struct Mystery;
        let err = registry(&Arc::default())
            .chain_for("GET /dogs", &[], &[Marker::new(Mystery)])
            .err()
            .unwrap();
        assert!(matches!(err, StratusError::UnknownMarker { route, .. } if route == "GET /dogs"));
    }
}
