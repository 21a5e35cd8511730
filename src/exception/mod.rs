//! Request-time failures and their translation into responses.
//!
//! Every stage of the pipeline fails with a [`DispatchError`]. The executor
//! never renders a failure itself: it hands it to the [`ErrorHandler`], which
//! decides between a view template and a marshalled payload.

use axum::http::{Method, StatusCode};
use thiserror::Error;

mod handler;

pub use handler::{DEFAULT_ERROR_MESSAGE, ErrorHandler, ErrorTemplates};

/// Result type returned by handlers, processors and interceptors.
pub type DispatchResult<T = ()> = Result<T, DispatchError>;

/// Status used when a throttled client exceeds its window.
pub const RATE_LIMITED: u16 = 420;

/// An explicit, application-raised failure with a status code and message.
///
/// # Example
/// ```
/// use stratus::exception::HttpException;
/// use axum::http::StatusCode;
///
/// let err = HttpException::new(StatusCode::CONFLICT, "Dog already exists");
/// assert_eq!(err.status(), StatusCode::CONFLICT);
/// ```
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct HttpException {
    status: StatusCode,
    message: String,
}

impl HttpException {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Everything that can go wrong while serving a single request.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No route matches {path}")]
    NotFound { path: String },

    #[error("Method not allowed on {path}")]
    MethodNotAllowed { path: String, allowed: Vec<Method> },

    #[error("Bad request: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("None of the acceptable content types can be produced")]
    NotAcceptable,

    #[error(transparent)]
    Http(#[from] HttpException),

    #[error("Internal server error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl DispatchError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Http(HttpException::new(status, message))
    }

    pub fn unexpected(message: impl std::fmt::Display + Send + Sync + 'static) -> Self {
        Self::Unexpected(anyhow::Error::msg(message.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited => {
                StatusCode::from_u16(RATE_LIMITED).unwrap_or(StatusCode::TOO_MANY_REQUESTS)
            }
            Self::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Self::Http(e) => e.status(),
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Views this failure as an explicit status + message, unless it is an
    /// unexpected fault whose details must stay hidden by default.
    pub fn as_http(&self) -> Option<HttpException> {
        match self {
            Self::Unexpected(_) => None,
            Self::Http(e) => Some(e.clone()),
            other => Some(HttpException::new(other.status(), other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DispatchError::NotFound { path: "/x".into() }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DispatchError::validation("bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(DispatchError::RateLimited.status().as_u16(), 420);
        assert_eq!(
            DispatchError::from(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unexpected_is_not_exposed_as_http() {
        let err = DispatchError::from(anyhow::anyhow!("db password is hunter2"));
        assert!(err.as_http().is_none());

        let err = DispatchError::http(StatusCode::CONFLICT, "taken");
        let http = err.as_http().unwrap();
        assert_eq!(http.status(), StatusCode::CONFLICT);
        assert_eq!(http.message(), "taken");
    }
}
