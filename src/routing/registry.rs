use super::pattern::decode_path;
use super::{PathParams, Route};
use crate::error::{Result, StratusError};
use crate::exception::{DispatchError, DispatchResult};
use axum::http::Method;
use std::collections::HashSet;
use std::sync::Arc;

/// A route selected for a request, with the decoded path parameters it bound.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub route: Arc<Route>,
    pub path_params: PathParams,
}

/// All routes in registration order.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: Vec<Arc<Route>>,
    shapes: HashSet<(Method, String)>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route. Two routes with the same method and pattern shape abort boot.
    pub fn register(&mut self, route: Route) -> Result<()> {
        let key = (route.method.clone(), route.pattern.shape());
        if !self.shapes.insert(key) {
            return Err(StratusError::DuplicateRoute {
                method: route.method.clone(),
                pattern: route.pattern.as_str().to_string(),
            });
        }
        tracing::debug!(method = %route.method, pattern = %route.pattern, name = %route.name, "route registered");
        self.routes.push(Arc::new(route));
        Ok(())
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Selects the most specific route for `method` and `path`.
    ///
    /// Equally specific candidates resolve to the earliest registered. A path
    /// that only matches under other methods fails with `MethodNotAllowed`.
    /// Segments are percent-decoded once up front; a segment that does not
    /// decode to UTF-8 is a `Validation` failure.
    pub fn match_route(&self, method: &Method, path: &str) -> DispatchResult<MatchedRoute> {
        let parts = decode_path(path)
            .map_err(|segment| DispatchError::validation(format!("Malformed path segment '{segment}'")))?;
        let mut best: Option<MatchedRoute> = None;
        let mut allowed: Vec<Method> = Vec::new();

        for route in &self.routes {
            let Some(path_params) = route.pattern.matches_segments(&parts) else {
                continue;
            };
            if route.method != *method {
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
                continue;
            }
            let more_specific = best
                .as_ref()
                .is_none_or(|b| route.pattern.specificity() > b.route.pattern.specificity());
            if more_specific {
                best = Some(MatchedRoute {
                    route: Arc::clone(route),
                    path_params,
                });
            }
        }

        match best {
            Some(matched) => Ok(matched),
            None if !allowed.is_empty() => Err(DispatchError::MethodNotAllowed {
                path: path.to_string(),
                allowed,
            }),
            None => Err(DispatchError::NotFound {
                path: path.to_string(),
            }),
        }
    }
}
