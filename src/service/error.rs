use std::fmt;
use thiserror::Error;

/// One service that failed a lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    pub service: String,
    pub message: String,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.message)
    }
}

fn summary(failures: &[ServiceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from starting or stopping the registered services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Every service was attempted; these are the ones that failed.
    #[error("{} service(s) failed to start: {}", failures.len(), summary(failures))]
    StartFailed { failures: Vec<ServiceFailure> },

    #[error("{} service(s) failed to stop: {}", failures.len(), summary(failures))]
    StopFailed { failures: Vec<ServiceFailure> },

    #[error("Hook execution failed for {service}: {message}")]
    Hook { service: String, message: String },
}

impl ServiceError {
    pub fn hook(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn failures(&self) -> &[ServiceFailure] {
        match self {
            Self::StartFailed { failures } | Self::StopFailed { failures } => failures,
            Self::Hook { .. } => &[],
        }
    }
}
