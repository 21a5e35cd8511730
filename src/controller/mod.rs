//! Explicit controller registration.
//!
//! A controller describes itself once at boot: its base path, the markers and
//! interceptors shared by all its routes, and one [`RouteDescriptor`] per
//! operation. Nothing is discovered at runtime.
//!
//! ```
//! use stratus::controller::{Controller, ControllerDescriptor, RouteDescriptor};
//! use stratus::exception::DispatchError;
//! use stratus::inject::ParamDescriptor;
//! use std::sync::Arc;
//!
//! struct DogController;
//!
//! impl DogController {
//!     async fn find(&self, id: i64) -> String {
//!         format!("dog {id}")
//!     }
//! }
//!
//! impl Controller for DogController {
//!     fn describe(self: Arc<Self>) -> ControllerDescriptor {
//!         ControllerDescriptor::new("/dogs").route(
//!             RouteDescriptor::get("/{id:int}")
//!                 .param(ParamDescriptor::path::<i64>("id"))
//!                 .bind(&self, |this, mut params| async move {
//!                     let id = params.take::<i64>("id")?;
//!                     Ok::<_, DispatchError>(this.find(id).await)
//!                 }),
//!         )
//!     }
//! }
//! ```

use crate::auth::AuthRequirement;
use crate::exception::DispatchResult;
use crate::inject::{ParamDescriptor, Params};
use crate::interceptor::Interceptor;
use crate::marshal::Payload;
use crate::processor::Marker;
use axum::http::Method;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = DispatchResult<Payload>> + Send>>;

/// A controller operation with its arguments already injected.
pub type Handler = Arc<dyn Fn(Params) -> HandlerFuture + Send + Sync>;

/// Describes one controller operation.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) name: Option<String>,
    pub(crate) params: Vec<ParamDescriptor>,
    pub(crate) markers: Vec<Marker>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) auth: Option<AuthRequirement>,
    pub(crate) throttled: bool,
    pub(crate) produces: Vec<String>,
    pub(crate) handler: Option<Handler>,
}

impl RouteDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            name: None,
            params: Vec::new(),
            markers: Vec::new(),
            interceptors: Vec::new(),
            auth: None,
            throttled: false,
            produces: Vec::new(),
            handler: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn options(path: impl Into<String>) -> Self {
        Self::new(Method::OPTIONS, path)
    }

    /// Human readable name used in logs.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares the next handler parameter.
    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Attaches a processor marker such as [`crate::processor::View`].
    pub fn marker<M: Any + Send + Sync>(mut self, marker: M) -> Self {
        self.markers.push(Marker::new(marker));
        self
    }

    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn auth(mut self, requirement: AuthRequirement) -> Self {
        self.auth = Some(requirement);
        self
    }

    /// Subjects the route to the configured rate limit.
    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    /// Adds a content type this route can respond with, in preference order.
    pub fn produces(mut self, content_type: impl Into<String>) -> Self {
        self.produces.push(content_type.into());
        self
    }

    pub fn handler<F, Fut, T>(mut self, handler: F) -> Self
    where
        F: Fn(Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
        T: Into<Payload> + 'static,
    {
        let handler: Handler = Arc::new(move |params: Params| -> HandlerFuture {
            let fut = handler(params);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        self.handler = Some(handler);
        self
    }

    /// Like [`RouteDescriptor::handler`], handing each call its own clone of `controller`.
    pub fn bind<C, F, Fut, T>(self, controller: &Arc<C>, handler: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<C>, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
        T: Into<Payload> + 'static,
    {
        let controller = Arc::clone(controller);
        self.handler(move |params| handler(Arc::clone(&controller), params))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.params
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }
}

/// Everything a controller contributes to the route table.
#[derive(Clone, Default)]
pub struct ControllerDescriptor {
    pub(crate) base_path: String,
    pub(crate) markers: Vec<Marker>,
    pub(crate) interceptors: Vec<Arc<dyn Interceptor>>,
    pub(crate) auth: Option<AuthRequirement>,
    pub(crate) throttled: bool,
    pub(crate) produces: Vec<String>,
    pub(crate) routes: Vec<RouteDescriptor>,
}

impl ControllerDescriptor {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    /// Applies to every route, ahead of route-level markers.
    pub fn marker<M: Any + Send + Sync>(mut self, marker: M) -> Self {
        self.markers.push(Marker::new(marker));
        self
    }

    /// Wraps every route, outside route-level interceptors.
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Default for routes that declare no requirement of their own.
    pub fn auth(mut self, requirement: AuthRequirement) -> Self {
        self.auth = Some(requirement);
        self
    }

    pub fn throttled(mut self) -> Self {
        self.throttled = true;
        self
    }

    /// Default for routes that declare no content types of their own.
    pub fn produces(mut self, content_type: impl Into<String>) -> Self {
        self.produces.push(content_type.into());
        self
    }

    pub fn route(mut self, route: RouteDescriptor) -> Self {
        self.routes.push(route);
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn routes(&self) -> &[RouteDescriptor] {
        &self.routes
    }
}

/// Implemented by every controller; replaces annotation scanning.
pub trait Controller: Send + Sync + 'static {
    fn describe(self: Arc<Self>) -> ControllerDescriptor;
}
