//! The route table: patterns, resolved routes and request matching.

use crate::auth::AuthRequirement;
use crate::controller::Handler;
use crate::inject::ResolvedParam;
use crate::interceptor::Interceptor;
use axum::http::Method;
use std::fmt;
use std::sync::Arc;

mod pattern;
mod registry;

pub use pattern::{PathParams, PathPattern, Segment, SegmentType, Specificity, decode_path, join};
pub use registry::{MatchedRoute, RouteRegistry};

/// A fully resolved route. Immutable once the registry is built.
pub struct Route {
    pub(crate) method: Method,
    pub(crate) pattern: PathPattern,
    pub(crate) name: String,
    pub(crate) params: Vec<ResolvedParam>,
    pub(crate) chain: Vec<Arc<dyn Interceptor>>,
    pub(crate) handler: Handler,
    pub(crate) auth: Option<AuthRequirement>,
    pub(crate) throttled: bool,
    pub(crate) produces: Vec<String>,
    pub(crate) view: Option<String>,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ResolvedParam] {
        &self.params
    }

    /// Interceptors and processors wrapping the handler, outermost first.
    pub fn chain(&self) -> &[Arc<dyn Interceptor>] {
        &self.chain
    }

    pub fn auth(&self) -> Option<&AuthRequirement> {
        self.auth.as_ref()
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Content types in preference order; never empty.
    pub fn produces(&self) -> &[String] {
        &self.produces
    }

    /// Template of a view route. Failures on such routes render error pages.
    pub fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("name", &self.name)
            .field("params", &self.params.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("chain", &self.chain.len())
            .field("auth", &self.auth)
            .field("throttled", &self.throttled)
            .field("produces", &self.produces)
            .field("view", &self.view)
            .finish()
    }
}
