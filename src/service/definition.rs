use super::bus::{ConsumerFn, ConsumerFuture, Message, consumer};
use async_trait::async_trait;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Start/stop hooks for services that hold resources.
///
/// # Example
///
/// ```
/// use stratus::service::ManagedService;
/// use async_trait::async_trait;
///
/// struct Pool;
///
/// #[async_trait]
/// impl ManagedService for Pool {
///     async fn start(&self) -> anyhow::Result<()> {
///         // open connections
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ManagedService: Send + Sync + 'static {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The server side of a service proxy: answers `action` calls sent over the bus.
#[async_trait]
pub trait ServiceEndpoint: Send + Sync + 'static {
    async fn handle(&self, action: &str, body: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub(crate) type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

pub(crate) struct PeriodicBinding {
    pub(crate) name: String,
    pub(crate) period: Duration,
    pub(crate) task: TaskFn,
}

pub(crate) struct ConsumerBinding {
    pub(crate) address: String,
    pub(crate) handler: ConsumerFn,
    pub(crate) proxy: bool,
}

/// A service instance plus everything bound to it.
///
/// # Example
///
/// ```
/// use stratus::service::ServiceDefinition;
/// use std::time::Duration;
///
/// struct Counter;
///
/// impl Counter {
///     async fn tick(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// let definition = ServiceDefinition::new(Counter)
///     .every("tick", Duration::from_secs(5), |counter: std::sync::Arc<Counter>| async move {
///         counter.tick().await
///     });
/// ```
pub struct ServiceDefinition {
    pub(crate) instance: Arc<dyn Any + Send + Sync>,
    pub(crate) type_name: &'static str,
    pub(crate) lifecycle: Option<Arc<dyn ManagedService>>,
    pub(crate) periodic: Vec<PeriodicBinding>,
    pub(crate) consumers: Vec<ConsumerBinding>,
    pub(crate) invalid: Vec<String>,
}

impl ServiceDefinition {
    pub fn new<T: Send + Sync + 'static>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            instance,
            type_name: std::any::type_name::<T>(),
            lifecycle: None,
            periodic: Vec::new(),
            consumers: Vec::new(),
            invalid: Vec::new(),
        }
    }

    /// A service whose hooks run on `start_all` and `stop_all`.
    pub fn managed<T: ManagedService>(instance: T) -> Self {
        let instance = Arc::new(instance);
        let mut definition = Self::from_arc(Arc::clone(&instance));
        definition.lifecycle = Some(instance);
        definition
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn instance<T: Send + Sync + 'static>(&mut self, binding: &str) -> Option<Arc<T>> {
        match Arc::clone(&self.instance).downcast::<T>() {
            Ok(instance) => Some(instance),
            Err(_) => {
                self.invalid.push(format!(
                    "{binding} expects {} but the service is {}",
                    std::any::type_name::<T>(),
                    self.type_name
                ));
                None
            }
        }
    }

    /// Runs `task` every `period` once the registry starts.
    pub fn every<T, F, Fut>(mut self, name: impl Into<String>, period: Duration, task: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if period.is_zero() {
            self.invalid.push(format!("periodic task '{name}' has a zero period"));
            return self;
        }
        if let Some(instance) = self.instance::<T>(&format!("periodic task '{name}'")) {
            let task: TaskFn =
                Arc::new(move || -> TaskFuture { Box::pin(task(Arc::clone(&instance))) });
            self.periodic.push(PeriodicBinding { name, period, task });
        }
        self
    }

    /// Delivers every message sent to `address` to `handler`.
    pub fn consume<T, F, Fut>(mut self, address: impl Into<String>, handler: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let address = address.into();
        if address.is_empty() {
            self.invalid.push("consumer bound to an empty address".to_string());
            return self;
        }
        if let Some(instance) = self.instance::<T>(&format!("consumer '{address}'")) {
            let handler = consumer(move |message: Message| handler(Arc::clone(&instance), message));
            self.consumers.push(ConsumerBinding {
                address,
                handler,
                proxy: false,
            });
        }
        self
    }

    /// Exposes the service on the bus at `address`; calls arrive as `Message`s
    /// carrying an action name.
    pub fn proxify<T: ServiceEndpoint>(mut self, address: impl Into<String>) -> Self {
        let address = address.into();
        if address.is_empty() {
            self.invalid.push("proxy bound to an empty address".to_string());
            return self;
        }
        if let Some(instance) = self.instance::<T>(&format!("proxy '{address}'")) {
            let handler: ConsumerFn = Arc::new(move |message: Message| -> ConsumerFuture {
                let instance = Arc::clone(&instance);
                Box::pin(async move {
                    let Some(action) = message.action().map(str::to_string) else {
                        message.reply(Err("missing action".to_string()));
                        return;
                    };
                    let result = instance
                        .handle(&action, message.body().clone())
                        .await
                        .map_err(|e| e.to_string());
                    message.reply(result);
                })
            });
            self.consumers.push(ConsumerBinding {
                address,
                handler,
                proxy: true,
            });
        }
        self
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("type", &self.type_name)
            .field("managed", &self.lifecycle.is_some())
            .field("periodic", &self.periodic.len())
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Kennel;
    struct Cattery;

    #[test]
    fn test_bindings_recorded() {
        let definition = ServiceDefinition::new(Kennel)
            .every("feed", Duration::from_secs(1), |_: Arc<Kennel>| async { Ok(()) })
            .consume("kennel.bark", |_: Arc<Kennel>, _msg| async {});
        assert_eq!(definition.periodic.len(), 1);
        assert_eq!(definition.consumers.len(), 1);
        assert!(definition.invalid.is_empty());
        assert!(definition.lifecycle.is_none());
    }

    #[test]
    fn test_invalid_bindings_are_collected() {
        let definition = ServiceDefinition::new(Kennel)
            .every("never", Duration::ZERO, |_: Arc<Kennel>| async { Ok(()) })
            .every("wrong", Duration::from_secs(1), |_: Arc<Cattery>| async { Ok(()) })
            .consume("", |_: Arc<Kennel>, _msg| async {});
        assert!(definition.periodic.is_empty());
        assert!(definition.consumers.is_empty());
        assert_eq!(definition.invalid.len(), 3);
        assert!(definition.invalid[1].contains("Cattery"));
    }
}
