//! Parameter injection.
//!
//! Every handler parameter is described by a [`ParamDescriptor`]. At boot the
//! [`Injectors`] turn each descriptor into exactly one [`ParamResolver`]:
//! the annotation table is consulted first, the type table second, and a
//! parameter neither can serve aborts boot. At request time the resolvers
//! fill a [`Params`] bag that the handler takes its typed arguments from.

use crate::dispatch::Exchange;
use crate::error::{Result, StratusError};
use crate::exception::{DispatchError, DispatchResult};
use crate::marshal::Marshallers;
use crate::service::ServiceRegistry;
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::sync::Arc;

mod annotated;
mod convert;
mod typed;

pub use annotated::{AnnotatedInjectorRegistry, AnnotationBinder};
pub use convert::{Converter, ConverterRegistry};
pub use typed::{QueryParams, RequestHead, TypedInjectorRegistry};

/// A type-erased injected argument.
pub type InjectedValue = Box<dyn Any + Send + Sync>;

pub(crate) type Decoder =
    Arc<dyn Fn(serde_json::Value) -> std::result::Result<InjectedValue, serde_json::Error> + Send + Sync>;

/// Produces a fresh handle to a bound service for every request.
pub(crate) type ValueFactory = Arc<dyn Fn() -> InjectedValue + Send + Sync>;

pub(crate) type LocalBinder =
    Arc<dyn Fn(&ServiceRegistry) -> Result<ValueFactory> + Send + Sync>;

/// Declares where a parameter's value comes from.
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::EnumDiscriminants)]
#[strum_discriminants(name(AnnotationKind), derive(Hash, strum_macros::Display))]
#[strum_discriminants(strum(serialize_all = "lowercase"))]
pub enum ParamAnnotation {
    Path(String),
    Query(String),
    Header(String),
    Body,
    Service(String),
    Proxy(String),
    Context(String),
}

/// Converts request data into one handler argument.
pub trait ParamResolver: Send + Sync {
    fn resolve(&self, exchange: &Exchange) -> DispatchResult<InjectedValue>;
}

impl<F> ParamResolver for F
where
    F: Fn(&Exchange) -> DispatchResult<InjectedValue> + Send + Sync,
{
    fn resolve(&self, exchange: &Exchange) -> DispatchResult<InjectedValue> {
        self(exchange)
    }
}

/// Describes one handler parameter.
///
/// # Example
/// ```
/// use stratus::inject::ParamDescriptor;
/// use stratus::auth::Principal;
///
/// let id = ParamDescriptor::path::<i64>("id");
/// let verbose = ParamDescriptor::query::<Option<bool>>("verbose");
/// let user = ParamDescriptor::typed::<Principal>("user");
/// ```
#[derive(Clone)]
pub struct ParamDescriptor {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    annotations: Vec<ParamAnnotation>,
    decoder: Option<Decoder>,
    binder: Option<LocalBinder>,
}

impl ParamDescriptor {
    fn new<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            annotations: Vec::new(),
            decoder: None,
            binder: None,
        }
    }

    /// Resolved from the type table only.
    pub fn typed<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        Self::new::<T>(name)
    }

    pub fn path<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new::<T>(name.clone()).annotate(ParamAnnotation::Path(name))
    }

    pub fn query<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new::<T>(name.clone()).annotate(ParamAnnotation::Query(name))
    }

    pub fn header<T: Send + Sync + 'static>(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new::<T>(name.clone()).annotate(ParamAnnotation::Header(name))
    }

    /// The request body, decoded by the marshaller matching its content type.
    pub fn body<T: DeserializeOwned + Send + Sync + 'static>(name: impl Into<String>) -> Self {
        let mut descriptor = Self::new::<T>(name).annotate(ParamAnnotation::Body);
        descriptor.decoder = Some(decoder::<T>());
        descriptor
    }

    /// A value previously stored in the exchange context by a processor.
    pub fn context<T: DeserializeOwned + Send + Sync + 'static>(
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        let mut descriptor = Self::new::<T>(name).annotate(ParamAnnotation::Context(key.into()));
        descriptor.decoder = Some(decoder::<T>());
        descriptor
    }

    /// A locally registered service, injected as `Arc<T>`.
    pub fn service<T: Send + Sync + 'static>(
        name: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let service = service.into();
        let lookup = service.clone();
        let mut descriptor = Self::new::<Arc<T>>(name).annotate(ParamAnnotation::Service(service));
        descriptor.binder = Some(Arc::new(move |registry: &ServiceRegistry| {
            let instance = registry
                .get::<T>(&lookup)
                .ok_or_else(|| StratusError::UnknownService(lookup.clone()))?;
            let factory: ValueFactory = Arc::new(move || Box::new(instance.clone()));
            Ok(factory)
        }));
        descriptor
    }

    /// A remote service proxy for `address`, injected as `Arc<T>`.
    pub fn proxy<T: ?Sized + Send + Sync + 'static>(
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        let address = address.into();
        let lookup = address.clone();
        let mut descriptor = Self::new::<Arc<T>>(name).annotate(ParamAnnotation::Proxy(address));
        descriptor.binder = Some(Arc::new(move |registry: &ServiceRegistry| {
            let proxy = registry.proxy::<T>(&lookup)?;
            let factory: ValueFactory = Arc::new(move || Box::new(proxy.clone()));
            Ok(factory)
        }));
        descriptor
    }

    /// Adds another injection annotation.
    pub fn annotate(mut self, annotation: ParamAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn annotations(&self) -> &[ParamAnnotation] {
        &self.annotations
    }

    pub(crate) fn decoder(&self) -> Option<&Decoder> {
        self.decoder.as_ref()
    }

    pub(crate) fn binder(&self) -> Option<&LocalBinder> {
        self.binder.as_ref()
    }
}

impl std::fmt::Debug for ParamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamDescriptor")
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("annotations", &self.annotations)
            .finish()
    }
}

fn decoder<T: DeserializeOwned + Send + Sync + 'static>() -> Decoder {
    Arc::new(|value| crate::marshal::from_value::<T>(value).map(|v| Box::new(v) as InjectedValue))
}

/// What a binder may consult while resolving a descriptor at boot.
pub struct BindContext<'a> {
    pub route: &'a str,
    pub path_names: &'a [String],
    pub converters: &'a ConverterRegistry,
    pub marshallers: &'a Arc<Marshallers>,
    pub services: Option<&'a ServiceRegistry>,
}

impl BindContext<'_> {
    pub fn unresolved(&self, descriptor: &ParamDescriptor) -> StratusError {
        StratusError::UnresolvedParameter {
            route: self.route.to_string(),
            param: descriptor.name().to_string(),
            type_name: descriptor.type_name(),
        }
    }
}

/// A parameter whose injection strategy was fixed at boot.
#[derive(Clone)]
pub struct ResolvedParam {
    name: String,
    resolver: Arc<dyn ParamResolver>,
}

impl ResolvedParam {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resolve(&self, exchange: &Exchange) -> DispatchResult<InjectedValue> {
        self.resolver.resolve(exchange)
    }
}

impl std::fmt::Debug for ResolvedParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedParam")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Both resolution tables plus the converters the annotation table uses.
#[derive(Clone, Default)]
pub struct Injectors {
    pub annotated: AnnotatedInjectorRegistry,
    pub typed: TypedInjectorRegistry,
    pub converters: ConverterRegistry,
}

impl Injectors {
    pub fn with_defaults() -> Self {
        Self {
            annotated: AnnotatedInjectorRegistry::with_defaults(),
            typed: TypedInjectorRegistry::with_defaults(),
            converters: ConverterRegistry::with_defaults(),
        }
    }

    /// Fixes the injection strategy for one descriptor.
    pub fn resolve(
        &self,
        descriptor: &ParamDescriptor,
        route: &str,
        path_names: &[String],
        marshallers: &Arc<Marshallers>,
        services: Option<&ServiceRegistry>,
    ) -> Result<ResolvedParam> {
        let ctx = BindContext {
            route,
            path_names,
            converters: &self.converters,
            marshallers,
            services,
        };

        let resolver = match descriptor.annotations() {
            [] => self
                .typed
                .get(descriptor.type_id())
                .ok_or_else(|| ctx.unresolved(descriptor))?,
            // An annotation without a registered binder falls back to the type table.
            [annotation] => match self.annotated.get(AnnotationKind::from(annotation)) {
                Some(binder) => binder.bind(descriptor, annotation, &ctx)?,
                None => self
                    .typed
                    .get(descriptor.type_id())
                    .ok_or_else(|| ctx.unresolved(descriptor))?,
            },
            many => {
                return Err(StratusError::AmbiguousParameter {
                    route: route.to_string(),
                    param: descriptor.name().to_string(),
                    annotations: many
                        .iter()
                        .map(|a| AnnotationKind::from(a).to_string())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        };

        Ok(ResolvedParam {
            name: descriptor.name().to_string(),
            resolver,
        })
    }
}

/// Typed arguments for one handler invocation.
#[derive(Default)]
pub struct Params {
    entries: Vec<(String, Option<InjectedValue>)>,
}

impl Params {
    pub(crate) fn push(&mut self, name: impl Into<String>, value: InjectedValue) {
        self.entries.push((name.into(), Some(value)));
    }

    /// Moves the named argument out of the bag.
    pub fn take<T: 'static>(&mut self, name: &str) -> DispatchResult<T> {
        let index = self
            .entries
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| DispatchError::unexpected(format!("No parameter named '{name}'")))?;
        self.take_at(index)
    }

    /// Moves the argument at `index` (declaration order) out of the bag.
    pub fn take_at<T: 'static>(&mut self, index: usize) -> DispatchResult<T> {
        let (name, slot) = self
            .entries
            .get_mut(index)
            .ok_or_else(|| DispatchError::unexpected(format!("No parameter at position {index}")))?;
        let matches_type = match slot.as_deref() {
            None => {
                return Err(DispatchError::unexpected(format!(
                    "Parameter '{name}' was already taken"
                )));
            }
            Some(value) => value.is::<T>(),
        };
        if !matches_type {
            return Err(DispatchError::unexpected(format!(
                "Parameter '{name}' is not a {}",
                std::any::type_name::<T>()
            )));
        }
        slot.take()
            .and_then(|value| value.downcast::<T>().ok())
            .map(|b| *b)
            .ok_or_else(|| DispatchError::unexpected(format!("Parameter '{name}' vanished")))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}
