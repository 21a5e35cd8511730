use crate::service::ServiceError;
use axum::http::Method;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StratusError>;

/// Errors raised while assembling the dispatcher or booting the application.
///
/// Everything here is fatal: a `StratusError` aborts boot instead of
/// surfacing at request time.
#[derive(Debug, Error)]
pub enum StratusError {
    #[error("Duplicate route: {method} {pattern} is already registered")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("Invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("No injection strategy for parameter '{param}' ({type_name}) of {route}")]
    UnresolvedParameter {
        route: String,
        param: String,
        type_name: &'static str,
    },

    #[error("Parameter '{param}' of {route} declares several injection annotations: {annotations}")]
    AmbiguousParameter {
        route: String,
        param: String,
        annotations: String,
    },

    #[error("No processor registered for marker {marker} on {route}")]
    UnknownMarker { route: String, marker: &'static str },

    #[error("Unknown auth provider type: {0}")]
    UnknownAuthProvider(String),

    #[error("Route {route} requires authentication but no auth provider is configured")]
    MissingAuthProvider { route: String },

    #[error("Route {route} has no handler bound")]
    MissingHandler { route: String },

    #[error("Service {0} is already registered")]
    DuplicateService(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Failed to construct service {name}: {message}")]
    ServiceConstruction { name: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StratusError {
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
