use super::{
    AnnotationKind, BindContext, InjectedValue, ParamAnnotation, ParamDescriptor, ParamResolver,
};
use crate::dispatch::Exchange;
use crate::error::{Result, StratusError};
use crate::exception::{DispatchError, DispatchResult};
use crate::marshal::APPLICATION_JSON;
use axum::http::{StatusCode, header::CONTENT_TYPE};
use std::collections::HashMap;
use std::sync::Arc;

/// Fixes, at boot, how an annotated parameter is injected.
///
/// Binders see the whole descriptor so they can reject a parameter up front
/// (no converter for its type, unknown path variable) instead of failing on
/// every request.
pub trait AnnotationBinder: Send + Sync {
    fn bind(
        &self,
        descriptor: &ParamDescriptor,
        annotation: &ParamAnnotation,
        ctx: &BindContext<'_>,
    ) -> Result<Arc<dyn ParamResolver>>;
}

/// Binders keyed by annotation kind.
#[derive(Clone, Default)]
pub struct AnnotatedInjectorRegistry {
    binders: HashMap<AnnotationKind, Arc<dyn AnnotationBinder>>,
}

impl AnnotatedInjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(AnnotationKind::Path, NamedValueBinder)
            .register(AnnotationKind::Query, NamedValueBinder)
            .register(AnnotationKind::Header, NamedValueBinder)
            .register(AnnotationKind::Body, BodyBinder)
            .register(AnnotationKind::Context, ContextBinder)
            .register(AnnotationKind::Service, ServiceBinder)
            .register(AnnotationKind::Proxy, ServiceBinder);
        registry
    }

    /// Replaces the binder for `kind`.
    pub fn register(
        &mut self,
        kind: AnnotationKind,
        binder: impl AnnotationBinder + 'static,
    ) -> &mut Self {
        self.binders.insert(kind, Arc::new(binder));
        self
    }

    pub fn get(&self, kind: AnnotationKind) -> Option<Arc<dyn AnnotationBinder>> {
        self.binders.get(&kind).cloned()
    }
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Path,
    Query,
    Header,
}

impl Source {
    fn label(self) -> &'static str {
        match self {
            Source::Path => "path variable",
            Source::Query => "query parameter",
            Source::Header => "header",
        }
    }

    fn lookup<'e>(self, exchange: &'e Exchange, name: &str) -> Option<&'e str> {
        match self {
            Source::Path => exchange.path_param(name),
            Source::Query => exchange.query_param(name),
            Source::Header => exchange.header(name),
        }
    }
}

/// Path variables, query parameters and headers: one raw string, converted.
struct NamedValueBinder;

impl AnnotationBinder for NamedValueBinder {
    fn bind(
        &self,
        descriptor: &ParamDescriptor,
        annotation: &ParamAnnotation,
        ctx: &BindContext<'_>,
    ) -> Result<Arc<dyn ParamResolver>> {
        let (source, name) = match annotation {
            ParamAnnotation::Path(name) => (Source::Path, name.clone()),
            ParamAnnotation::Query(name) => (Source::Query, name.clone()),
            ParamAnnotation::Header(name) => (Source::Header, name.clone()),
            _ => return Err(ctx.unresolved(descriptor)),
        };

        if matches!(source, Source::Path) && !ctx.path_names.iter().any(|n| *n == name) {
            return Err(ctx.unresolved(descriptor));
        }

        let converter = ctx
            .converters
            .get(descriptor.type_id())
            .cloned()
            .ok_or_else(|| ctx.unresolved(descriptor))?;

        let resolver = move |exchange: &Exchange| -> DispatchResult<InjectedValue> {
            match source.lookup(exchange, &name) {
                Some(raw) => converter.parse(raw).map_err(|reason| {
                    DispatchError::validation(format!(
                        "Invalid value for {} '{name}': {reason}",
                        source.label()
                    ))
                }),
                None => converter.missing().ok_or_else(|| {
                    DispatchError::validation(format!(
                        "Missing required {} '{name}'",
                        source.label()
                    ))
                }),
            }
        };
        Ok(Arc::new(resolver))
    }
}

/// The request body, through the marshaller for its content type.
struct BodyBinder;

impl AnnotationBinder for BodyBinder {
    fn bind(
        &self,
        descriptor: &ParamDescriptor,
        _annotation: &ParamAnnotation,
        ctx: &BindContext<'_>,
    ) -> Result<Arc<dyn ParamResolver>> {
        let decoder = descriptor
            .decoder()
            .cloned()
            .ok_or_else(|| ctx.unresolved(descriptor))?;
        let marshallers = ctx.marshallers.clone();

        let resolver = move |exchange: &Exchange| -> DispatchResult<InjectedValue> {
            let content_type = exchange
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(APPLICATION_JSON);
            let marshaller = marshallers.get(content_type).ok_or_else(|| {
                DispatchError::http(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    format!("Unsupported content type: {content_type}"),
                )
            })?;
            let value = marshaller.deserialize(exchange.body())?;
            decoder(value).map_err(|e| DispatchError::validation(format!("Invalid body: {e}")))
        };
        Ok(Arc::new(resolver))
    }
}

/// A value a processor stored in the exchange context.
struct ContextBinder;

impl AnnotationBinder for ContextBinder {
    fn bind(
        &self,
        descriptor: &ParamDescriptor,
        annotation: &ParamAnnotation,
        ctx: &BindContext<'_>,
    ) -> Result<Arc<dyn ParamResolver>> {
        let ParamAnnotation::Context(key) = annotation else {
            return Err(ctx.unresolved(descriptor));
        };
        let key = key.clone();
        let decoder = descriptor
            .decoder()
            .cloned()
            .ok_or_else(|| ctx.unresolved(descriptor))?;

        let resolver = move |exchange: &Exchange| -> DispatchResult<InjectedValue> {
            let value = exchange.get(&key).cloned().unwrap_or(serde_json::Value::Null);
            decoder(value).map_err(|e| {
                DispatchError::unexpected(format!("Context value '{key}' has the wrong shape: {e}"))
            })
        };
        Ok(Arc::new(resolver))
    }
}

/// Local services and remote proxies. The service is looked up once at boot.
struct ServiceBinder;

impl AnnotationBinder for ServiceBinder {
    fn bind(
        &self,
        descriptor: &ParamDescriptor,
        annotation: &ParamAnnotation,
        ctx: &BindContext<'_>,
    ) -> Result<Arc<dyn ParamResolver>> {
        let target = match annotation {
            ParamAnnotation::Service(name) | ParamAnnotation::Proxy(name) => name,
            _ => return Err(ctx.unresolved(descriptor)),
        };
        let binder = descriptor.binder().ok_or_else(|| ctx.unresolved(descriptor))?;
        let services = ctx
            .services
            .ok_or_else(|| StratusError::UnknownService(target.clone()))?;
        let factory = binder(services)?;

        let resolver = move |_: &Exchange| -> DispatchResult<InjectedValue> { Ok(factory()) };
        Ok(Arc::new(resolver))
    }
}
