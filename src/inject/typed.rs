use super::{InjectedValue, ParamResolver};
use crate::auth::Principal;
use crate::dispatch::Exchange;
use crate::exception::{DispatchError, DispatchResult};
use crate::routing::PathParams;
use axum::http::{HeaderMap, Method, Uri};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// An owned snapshot of the request line, headers and parsed parameters.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub path_params: PathParams,
    pub query: Vec<(String, String)>,
}

impl RequestHead {
    fn capture(exchange: &Exchange) -> Self {
        Self {
            method: exchange.method().clone(),
            uri: exchange.uri().clone(),
            headers: exchange.headers().clone(),
            path_params: exchange.path_params().clone(),
            query: exchange.query().to_vec(),
        }
    }
}

/// Decoded query string pairs in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(pub Vec<(String, String)>);

impl QueryParams {
    /// Last value wins for repeated keys.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().rfind(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Injectors selected purely by the parameter's declared type.
#[derive(Clone, Default)]
pub struct TypedInjectorRegistry {
    by_type: HashMap<TypeId, Arc<dyn ParamResolver>>,
}

impl TypedInjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request head, headers, parsed parameters and the authenticated principal.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register::<RequestHead, _>(|ex| Ok(RequestHead::capture(ex)))
            .register::<HeaderMap, _>(|ex| Ok(ex.headers().clone()))
            .register::<PathParams, _>(|ex| Ok(ex.path_params().clone()))
            .register::<QueryParams, _>(|ex| Ok(QueryParams(ex.query().to_vec())))
            .register::<Principal, _>(|ex| {
                ex.principal()
                    .cloned()
                    .ok_or_else(|| DispatchError::unauthenticated("Authentication required"))
            })
            .register::<Option<Principal>, _>(|ex| Ok(ex.principal().cloned()));
        registry
    }

    pub fn register<T, F>(&mut self, extract: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Exchange) -> DispatchResult<T> + Send + Sync + 'static,
    {
        let resolver = move |exchange: &Exchange| -> DispatchResult<InjectedValue> {
            extract(exchange).map(|value| Box::new(value) as InjectedValue)
        };
        self.by_type.insert(TypeId::of::<T>(), Arc::new(resolver));
        self
    }

    pub fn get(&self, type_id: TypeId) -> Option<Arc<dyn ParamResolver>> {
        self.by_type.get(&type_id).cloned()
    }
}
