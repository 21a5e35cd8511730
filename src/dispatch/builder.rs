use super::Dispatcher;
use crate::auth::{AuthGuard, AuthProvider};
use crate::config::Config;
use crate::controller::{Controller, ControllerDescriptor, RouteDescriptor};
use crate::error::{Result, StratusError};
use crate::exception::{ErrorHandler, ErrorTemplates};
use crate::inject::Injectors;
use crate::marshal::{APPLICATION_JSON, Marshallers, TEXT_HTML};
use crate::processor::{Processor, ProcessorRegistry, View};
use crate::routing::{PathPattern, Route, RouteRegistry, join};
use crate::service::ServiceRegistry;
use crate::throttle::{RateLimit, RateLimiter};
use crate::view::TemplateEngineManager;
use std::any::Any;
use std::sync::Arc;

/// Assembles a [`Dispatcher`]. Every boot-time check happens in [`build`].
///
/// [`build`]: DispatcherBuilder::build
#[derive(Clone, Default)]
pub struct DispatcherBuilder {
    config: Config,
    services: Option<Arc<ServiceRegistry>>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    engines: Option<Arc<TemplateEngineManager>>,
    marshallers: Option<Arc<Marshallers>>,
    processors: ProcessorRegistry,
    injectors: Option<Injectors>,
    limiter: Option<Arc<RateLimiter>>,
    controllers: Vec<Arc<dyn Controller>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    pub fn engines(mut self, engines: Arc<TemplateEngineManager>) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn marshallers(mut self, marshallers: Arc<Marshallers>) -> Self {
        self.marshallers = Some(marshallers);
        self
    }

    /// Adds a processor for marker type `M`, on top of the built-in ones.
    pub fn processor<M, P, F>(mut self, factory: F) -> Self
    where
        M: Any + Send + Sync,
        P: Processor,
        F: Fn(&M) -> Result<P> + Send + Sync + 'static,
    {
        self.processors.register::<M, P, F>(factory);
        self
    }

    pub fn injectors(mut self, injectors: Injectors) -> Self {
        self.injectors = Some(injectors);
        self
    }

    /// Shares rate-limit counters with other dispatchers. Without one, a
    /// limiter is created from the `throttling` configuration.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn controller<C: Controller>(mut self, controller: C) -> Self {
        self.controllers.push(Arc::new(controller));
        self
    }

    pub fn controller_arc(mut self, controller: Arc<dyn Controller>) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        let config = &self.config;
        let marshallers = self
            .marshallers
            .clone()
            .unwrap_or_else(|| Arc::new(Marshallers::with_defaults()));
        let engines = self
            .engines
            .clone()
            .unwrap_or_else(|| Arc::new(TemplateEngineManager::new()));

        let mut processors = ProcessorRegistry::with_defaults(Arc::clone(&engines));
        processors.merge(&self.processors);

        let guard = self
            .auth_provider
            .clone()
            .map(|provider| AuthGuard::new(provider, config.auth_method));
        let limiter = self.limiter.clone().or_else(|| {
            config
                .throttling
                .as_ref()
                .map(|t| Arc::new(RateLimiter::new(RateLimit::from_config(t))))
        });

        let assembly = Assembly {
            injectors: self.injectors.clone().unwrap_or_else(Injectors::with_defaults),
            processors,
            marshallers: Arc::clone(&marshallers),
            services: self.services.clone(),
            has_guard: guard.is_some(),
            has_limiter: limiter.is_some(),
        };

        let mut routes = RouteRegistry::new();
        for controller in &self.controllers {
            let descriptor = Arc::clone(controller).describe();
            for route in descriptor.routes() {
                routes.register(assembly.route(&descriptor, route)?)?;
            }
        }
        tracing::info!(routes = routes.len(), controllers = self.controllers.len(), "routes registered");

        let templates = ErrorTemplates::defaults(&config.views_dir).with_overrides(&config.error_templates);
        let errors = ErrorHandler::new(
            templates,
            config.display_errors,
            engines,
            Arc::clone(&marshallers),
        );

        Ok(Dispatcher {
            routes,
            errors,
            marshallers,
            guard,
            limiter,
            body_limit: config.body_limit,
        })
    }
}

/// Everything a route needs resolved against while the table is built.
struct Assembly {
    injectors: Injectors,
    processors: ProcessorRegistry,
    marshallers: Arc<Marshallers>,
    services: Option<Arc<ServiceRegistry>>,
    has_guard: bool,
    has_limiter: bool,
}

impl Assembly {
    fn route(&self, controller: &ControllerDescriptor, route: &RouteDescriptor) -> Result<Route> {
        let path = join(&controller.base_path, &route.path);
        let pattern = PathPattern::parse(&path)?;
        let label = format!("{} {}", route.method, pattern);

        let handler = route
            .handler
            .clone()
            .ok_or_else(|| StratusError::MissingHandler {
                route: label.clone(),
            })?;

        let path_names: Vec<String> = pattern.param_names().map(str::to_string).collect();
        let params = route
            .params
            .iter()
            .map(|param| {
                self.injectors.resolve(
                    param,
                    &label,
                    &path_names,
                    &self.marshallers,
                    self.services.as_deref(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        // Raw interceptors wrap the processors: controller-level ones
        // outermost, then route-level, then the marker chain.
        let mut chain = controller.interceptors.clone();
        chain.extend(route.interceptors.iter().cloned());
        chain.extend(
            self.processors
                .chain_for(&label, &controller.markers, &route.markers)?,
        );

        let auth = route.auth.clone().or_else(|| controller.auth.clone());
        if auth.is_some() && !self.has_guard {
            return Err(StratusError::MissingAuthProvider { route: label });
        }

        let throttled = route.throttled || controller.throttled;
        if throttled && !self.has_limiter {
            tracing::warn!(route = %label, "route is throttled but no throttling is configured");
        }

        let view = controller
            .markers
            .iter()
            .chain(&route.markers)
            .filter_map(|m| m.downcast_ref::<View>())
            .last()
            .map(|v| v.0.clone());

        let mut produces = if route.produces.is_empty() {
            controller.produces.clone()
        } else {
            route.produces.clone()
        };
        if produces.is_empty() {
            let default = if view.is_some() { TEXT_HTML } else { APPLICATION_JSON };
            produces.push(default.to_string());
        }

        Ok(Route {
            method: route.method.clone(),
            name: route.name.clone().unwrap_or_else(|| label.clone()),
            pattern,
            params,
            chain,
            handler,
            auth,
            throttled,
            produces,
            view,
        })
    }
}
