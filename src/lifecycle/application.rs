//! Application bootstrap.
//!
//! Wires configuration, services, the auth provider, template engines and
//! controllers together, starts the services and serves the dispatcher.

use super::shutdown_signal;
use crate::auth::{AuthProvider, AuthProviderRegistry};
use crate::config::Config;
use crate::controller::Controller;
use crate::dispatch::{DispatchService, Dispatcher, DispatcherBuilder};
use crate::error::Result;
use crate::inject::Injectors;
use crate::marshal::Marshallers;
use crate::processor::Processor;
use crate::service::{
    EventBus, LocalEventBus, ServiceDefinition, ServiceFactories, ServiceRegistry,
};
use crate::throttle::{RateLimit, RateLimiter};
use crate::view::{HtmlFileEngine, TemplateEngine, TemplateEngineManager};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

type ServiceHook = Box<dyn FnOnce(&mut ServiceRegistry) -> Result<()> + Send>;

/// A booted application: services running, routes validated.
///
/// # Example
///
/// ```no_run
/// use stratus::config::Config;
/// use stratus::lifecycle::Application;
///
/// # async fn run() -> stratus::error::Result<()> {
/// let app = Application::builder()
///     .config(Config::from_path("config.json")?.with_env_overrides())
///     .build()
///     .await?;
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// app.serve(listener).await
/// # }
/// ```
pub struct Application {
    config: Config,
    services: Arc<ServiceRegistry>,
    dispatcher: DispatcherBuilder,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Builds an independent dispatcher for one worker. Services and rate-limit
    /// counters are shared; every registry of the pipeline is the worker's own.
    pub fn instance(&self) -> Result<Dispatcher> {
        self.dispatcher.clone().build()
    }

    /// The dispatcher mounted as the fallback of an axum router.
    pub fn router(&self) -> Result<axum::Router> {
        let service = DispatchService::new(Arc::new(self.instance()?));
        Ok(axum::Router::new().fallback_service(service))
    }

    /// Serves until Ctrl-C or SIGTERM, then stops the services.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let router = self.router()?;
        tracing::info!(address = ?listener.local_addr().ok(), "serving");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        self.shutdown().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application...");
        self.services.stop_all().await?;
        tracing::info!("Application shutdown complete");
        Ok(())
    }
}

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    config: Config,
    factories: ServiceFactories,
    service_hooks: Vec<ServiceHook>,
    bus: Arc<dyn EventBus>,
    auth: AuthProviderRegistry,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    engines: TemplateEngineManager,
    dispatcher: DispatcherBuilder,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            factories: ServiceFactories::new(),
            service_hooks: Vec::new(),
            bus: Arc::new(LocalEventBus::new()),
            auth: AuthProviderRegistry::new(),
            auth_provider: None,
            engines: TemplateEngineManager::new(),
            dispatcher: DispatcherBuilder::new(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Constructors for the services named in the configuration.
    pub fn service_factories(mut self, factories: ServiceFactories) -> Self {
        self.factories = factories;
        self
    }

    /// Registers a service directly, after the configured ones.
    pub fn service(mut self, name: impl Into<String>, definition: ServiceDefinition) -> Self {
        let name = name.into();
        self.service_hooks
            .push(Box::new(move |registry: &mut ServiceRegistry| registry.register_service(name, definition)));
        self
    }

    /// Client-side proxy constructor for service interface `T`.
    pub fn proxy<T, F>(mut self, factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<dyn EventBus>, &str) -> Arc<T> + Send + Sync + 'static,
    {
        self.service_hooks
            .push(Box::new(move |registry: &mut ServiceRegistry| {
                registry.register_proxy::<T, F>(factory);
                Ok(())
            }));
        self
    }

    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Provider constructors; `auth-type` picks one at boot.
    pub fn auth_providers(mut self, registry: AuthProviderRegistry) -> Self {
        self.auth = registry;
        self
    }

    /// A ready provider, used instead of `auth-type`.
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    pub fn engine(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.engines.register(engine);
        self
    }

    pub fn marshallers(mut self, marshallers: Marshallers) -> Self {
        self.dispatcher = self.dispatcher.marshallers(Arc::new(marshallers));
        self
    }

    pub fn injectors(mut self, injectors: Injectors) -> Self {
        self.dispatcher = self.dispatcher.injectors(injectors);
        self
    }

    pub fn processor<M, P, F>(mut self, factory: F) -> Self
    where
        M: Any + Send + Sync,
        P: Processor,
        F: Fn(&M) -> Result<P> + Send + Sync + 'static,
    {
        self.dispatcher = self.dispatcher.processor::<M, P, F>(factory);
        self
    }

    pub fn controller<C: Controller>(mut self, controller: C) -> Self {
        self.dispatcher = self.dispatcher.controller(controller);
        self
    }

    /// Constructs services, validates every route and starts the services.
    ///
    /// If a service fails to start, the ones that did start are stopped
    /// again before the error is returned.
    pub async fn build(self) -> Result<Application> {
        let config = self.config;
        config.validate()?;
        tracing::info!("Starting application initialization...");

        let mut services = ServiceRegistry::from_config(&config, &self.factories, self.bus)?;
        for hook in self.service_hooks {
            hook(&mut services)?;
        }
        let services = Arc::new(services);

        let provider = match (self.auth_provider, &config.auth_type) {
            (Some(provider), _) => Some(provider),
            (None, Some(auth_type)) => Some(self.auth.create(auth_type, &config.auth_properties)?),
            (None, None) => None,
        };

        let mut engines = self.engines;
        if engines.engine_for("index.html").is_none() {
            engines.register(Arc::new(HtmlFileEngine));
        }
        if !config.templates.is_empty() {
            engines.retain(&config.templates);
        }
        if let Some(timeout) = config.render_timeout() {
            engines = engines.with_timeout(timeout);
        }
        tracing::info!(engines = ?engines.extensions(), "template engines");

        let mut dispatcher = self
            .dispatcher
            .config(config.clone())
            .services(Arc::clone(&services))
            .engines(Arc::new(engines));
        if let Some(provider) = provider {
            dispatcher = dispatcher.auth_provider(provider);
        }
        if let Some(throttling) = &config.throttling {
            let limiter = RateLimiter::new(RateLimit::from_config(throttling));
            dispatcher = dispatcher.limiter(Arc::new(limiter));
        }

        // Route problems abort boot before any service is started.
        dispatcher.clone().build()?;

        if let Err(e) = services.start_all().await {
            tracing::error!(error = %e, "service start failed, stopping started services");
            if let Err(stop) = services.stop_all().await {
                tracing::error!(error = %stop, "cleanup after failed start");
            }
            return Err(e.into());
        }

        tracing::info!("Application initialization complete");
        Ok(Application {
            config,
            services,
            dispatcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerDescriptor, RouteDescriptor};
    use crate::error::StratusError;
    use crate::service::{ManagedService, ServiceError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct Hello;

    impl Controller for Hello {
        fn describe(self: Arc<Self>) -> ControllerDescriptor {
            ControllerDescriptor::new("/hello")
                .route(RouteDescriptor::get("/").handler(|_| async { Ok("hi") }))
        }
    }

    struct Broken;

    #[async_trait]
    impl ManagedService for Broken {
        async fn start(&self) -> anyhow::Result<()> {
            anyhow::bail!("no disk")
        }
    }

    #[tokio::test]
    async fn test_instances_are_independent() {
        let app = Application::builder().controller(Hello).build().await.unwrap();
        let a = app.instance().unwrap();
        let b = app.instance().unwrap();
        assert!(!Arc::ptr_eq(&a.routes().routes()[0], &b.routes().routes()[0]));

        let response = app
            .router()
            .unwrap()
            .oneshot(Request::get("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_auth_type_aborts_boot() {
        let config = Config::from_json_str(r#"{"auth-type": "ldap"}"#).unwrap();
        let err = Application::builder().config(config).build().await.err().unwrap();
        assert!(matches!(err, StratusError::UnknownAuthProvider(t) if t == "ldap"));
    }

    #[tokio::test]
    async fn test_failed_start_stops_peers() {
        let err = Application::builder()
            .service("ok", ServiceDefinition::new(1u8))
            .service("broken", ServiceDefinition::managed(Broken))
            .build()
            .await
            .err()
            .unwrap();
        match err {
            StratusError::Service(ServiceError::StartFailed { failures }) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].service, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
