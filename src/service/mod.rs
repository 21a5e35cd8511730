//! Service registry.
//!
//! Services are singletons owned by the registry for the life of the process.
//! They are declared up front, either directly with
//! [`ServiceRegistry::register_service`] or from the `services` section of the
//! configuration through [`ServiceFactories`]. `start_all` binds their periodic
//! tasks and bus consumers and runs their start hooks; `stop_all` undoes all of
//! it and is safe to call after a partial start.

use crate::config::Config;
use crate::error::{Result, StratusError};
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};

pub mod bus;
mod definition;
mod error;

pub use bus::{ConsumerHandle, EventBus, LocalEventBus, Message};
pub use definition::{ManagedService, ServiceDefinition, ServiceEndpoint};
pub use error::{ServiceError, ServiceFailure};

use definition::PeriodicBinding;

/// Lifecycle of one registered service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceState {
    Created,
    Started,
    Running,
    Failed,
    Stopped,
}

type ProxyFactory =
    Arc<dyn Fn(Arc<dyn EventBus>, &str) -> Arc<dyn Any + Send + Sync> + Send + Sync>;

type ServiceFactory =
    Arc<dyn Fn(Option<serde_json::Value>) -> anyhow::Result<ServiceDefinition> + Send + Sync>;

/// Constructors for configuration-declared services, keyed by identifier.
///
/// # Example
///
/// ```
/// use stratus::service::{ServiceDefinition, ServiceFactories};
///
/// struct DogService {
///     kennel: String,
/// }
///
/// let mut factories = ServiceFactories::new();
/// factories.register("DogService", |config: Option<serde_json::Value>| {
///     let kennel = config
///         .and_then(|c| c.get("kennel").and_then(|k| k.as_str().map(String::from)))
///         .unwrap_or_else(|| "default".to_string());
///     Ok(ServiceDefinition::new(DogService { kennel }))
/// });
/// ```
#[derive(Clone, Default)]
pub struct ServiceFactories {
    factories: HashMap<String, ServiceFactory>,
}

impl ServiceFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// `factory` receives `None` for a `null` configuration value.
    pub fn register<F>(&mut self, identifier: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Option<serde_json::Value>) -> anyhow::Result<ServiceDefinition> + Send + Sync + 'static,
    {
        self.factories.insert(identifier.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }
}

/// Registry name for a configuration identifier: `DogService` becomes `dogService`.
pub fn service_name(identifier: &str) -> String {
    let mut chars = identifier.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

struct ServiceEntry {
    name: String,
    definition: ServiceDefinition,
}

/// Background work bound at introspection; cleared by `stop_all`.
#[derive(Default)]
struct Bindings {
    timers: Vec<JoinHandle<()>>,
    consumers: Vec<ConsumerHandle>,
}

pub struct ServiceRegistry {
    entries: Vec<ServiceEntry>,
    index: HashMap<String, usize>,
    states: DashMap<String, ServiceState>,
    bus: Arc<dyn EventBus>,
    proxy_factories: DashMap<TypeId, ProxyFactory>,
    proxies: DashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>,
    bindings: Mutex<Bindings>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(Arc::new(LocalEventBus::new()))
    }
}

impl ServiceRegistry {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            states: DashMap::new(),
            bus,
            proxy_factories: DashMap::new(),
            proxies: DashMap::new(),
            bindings: Mutex::new(Bindings::default()),
        }
    }

    /// Builds every service listed in `config.services`, in declaration order.
    pub fn from_config(
        config: &Config,
        factories: &ServiceFactories,
        bus: Arc<dyn EventBus>,
    ) -> Result<Self> {
        let mut registry = Self::new(bus);
        for (identifier, argument) in &config.services {
            let factory = factories
                .factories
                .get(identifier)
                .ok_or_else(|| StratusError::UnknownService(identifier.clone()))?;
            let argument = (!argument.is_null()).then(|| argument.clone());
            let definition = factory(argument).map_err(|e| StratusError::ServiceConstruction {
                name: identifier.clone(),
                message: e.to_string(),
            })?;
            registry.register_service(service_name(identifier), definition)?;
        }
        Ok(registry)
    }

    pub fn register_service(
        &mut self,
        name: impl Into<String>,
        definition: ServiceDefinition,
    ) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(StratusError::DuplicateService(name));
        }
        tracing::debug!(service = %name, type_name = definition.type_name(), "service registered");
        self.index.insert(name.clone(), self.entries.len());
        self.states.insert(name.clone(), ServiceState::Created);
        self.entries.push(ServiceEntry { name, definition });
        Ok(())
    }

    /// Registers the client-side constructor for proxies of `T`.
    pub fn register_proxy<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<dyn EventBus>, &str) -> Arc<T> + Send + Sync + 'static,
    {
        let factory: ProxyFactory = Arc::new(move |bus: Arc<dyn EventBus>, address: &str| {
            let proxy: Arc<T> = factory(bus, address);
            Arc::new(proxy) as Arc<dyn Any + Send + Sync>
        });
        self.proxy_factories.insert(TypeId::of::<T>(), factory);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        let entry = &self.entries[*self.index.get(name)?];
        Arc::clone(&entry.definition.instance).downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.states.get(name).map(|s| *s)
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// The proxy for `address`, created on first use and shared afterwards.
    pub fn proxy<T: ?Sized + Send + Sync + 'static>(&self, address: &str) -> Result<Arc<T>> {
        let type_id = TypeId::of::<T>();
        let cached = match self.proxies.entry((type_id, address.to_string())) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Arc::clone(entry.get()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let factory = self
                    .proxy_factories
                    .get(&type_id)
                    .map(|f| Arc::clone(f.value()))
                    .ok_or_else(|| {
                        StratusError::UnknownService(format!(
                            "no proxy registered for {} at {address}",
                            std::any::type_name::<T>()
                        ))
                    })?;
                tracing::debug!(address, type_name = std::any::type_name::<T>(), "proxy created");
                Arc::clone(entry.insert(factory(Arc::clone(&self.bus), address)).value())
            }
        };
        // The cache holds an `Arc<Arc<T>>` behind `dyn Any`.
        cached
            .downcast::<Arc<T>>()
            .map(|wrapper| Arc::clone(&*wrapper))
            .map_err(|_| StratusError::UnknownService(address.to_string()))
    }

    pub fn running_count(&self) -> usize {
        self.states
            .iter()
            .filter(|s| *s.value() == ServiceState::Running)
            .count()
    }

    pub async fn active_timers(&self) -> usize {
        self.bindings
            .lock()
            .await
            .timers
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }

    /// Binds background work, then runs every start hook in registration order.
    ///
    /// Every service is attempted even after a failure; successfully started
    /// peers keep running and the caller is expected to call [`stop_all`].
    ///
    /// [`stop_all`]: ServiceRegistry::stop_all
    pub async fn start_all(&self) -> std::result::Result<(), ServiceError> {
        self.introspect().await;

        let mut failures = Vec::new();
        for entry in &self.entries {
            if let Err(e) = self.start_one(entry).await {
                tracing::error!(service = %entry.name, error = %e, "service failed to start");
                failures.push(ServiceFailure {
                    service: entry.name.clone(),
                    message: e.to_string(),
                });
            }
        }

        if failures.is_empty() {
            tracing::info!(services = self.entries.len(), "services started");
            Ok(())
        } else {
            Err(ServiceError::StartFailed { failures })
        }
    }

    async fn start_one(&self, entry: &ServiceEntry) -> std::result::Result<(), ServiceError> {
        self.states.insert(entry.name.clone(), ServiceState::Started);
        if let Some(lifecycle) = &entry.definition.lifecycle {
            if let Err(e) = lifecycle.start().await {
                self.states.insert(entry.name.clone(), ServiceState::Failed);
                return Err(ServiceError::hook(&entry.name, e.to_string()));
            }
        }
        self.states.insert(entry.name.clone(), ServiceState::Running);
        Ok(())
    }

    async fn introspect(&self) {
        let mut bindings = self.bindings.lock().await;
        if !bindings.timers.is_empty() || !bindings.consumers.is_empty() {
            return;
        }

        for entry in &self.entries {
            let definition = &entry.definition;
            for problem in &definition.invalid {
                tracing::error!(service = %entry.name, "invalid binding: {problem}");
            }
            for periodic in &definition.periodic {
                bindings.timers.push(spawn_periodic(&entry.name, periodic));
            }
            for binding in &definition.consumers {
                let handle = self
                    .bus
                    .register_consumer(&binding.address, Arc::clone(&binding.handler));
                tracing::debug!(
                    service = %entry.name,
                    address = %binding.address,
                    proxy = binding.proxy,
                    "consumer bound"
                );
                bindings.consumers.push(handle);
            }
        }
    }

    /// Cancels all timers and consumers and runs the stop hooks of running services.
    pub async fn stop_all(&self) -> std::result::Result<(), ServiceError> {
        let Bindings { timers, consumers } = std::mem::take(&mut *self.bindings.lock().await);
        for timer in timers {
            timer.abort();
            let _ = timer.await;
        }
        for consumer in consumers {
            consumer.unregister().await;
        }

        let mut failures = Vec::new();
        for entry in &self.entries {
            let was_running = self.state(&entry.name) == Some(ServiceState::Running);
            if was_running {
                if let Some(lifecycle) = &entry.definition.lifecycle {
                    if let Err(e) = lifecycle.stop().await {
                        tracing::error!(service = %entry.name, error = %e, "service failed to stop");
                        failures.push(ServiceFailure {
                            service: entry.name.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            self.states.insert(entry.name.clone(), ServiceState::Stopped);
        }

        tracing::info!(services = self.entries.len(), "services stopped");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::StopFailed { failures })
        }
    }
}

fn spawn_periodic(service: &str, binding: &PeriodicBinding) -> JoinHandle<()> {
    let service = service.to_string();
    let name = binding.name.clone();
    let period = binding.period;
    let task = Arc::clone(&binding.task);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Dropping the set when the timer is aborted cancels the run in flight.
        let mut runs = JoinSet::new();
        loop {
            interval.tick().await;
            // Spawned so a panic only costs this run.
            runs.spawn(task());
            match runs.join_next().await {
                Some(Ok(Ok(()))) | None => {}
                Some(Ok(Err(e))) => tracing::error!(%service, task = %name, error = %e, "periodic task failed"),
                Some(Err(e)) => tracing::error!(%service, task = %name, error = %e, "periodic task panicked"),
            }
        }
    })
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.entries.iter().map(|e| &e.name).collect::<Vec<_>>())
            .field("proxies", &self.proxies.len())
            .finish_non_exhaustive()
    }
}
