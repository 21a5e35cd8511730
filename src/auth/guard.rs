use super::{AuthError, AuthMethod, AuthProvider, AuthRequirement, Credentials};
use crate::dispatch::Exchange;
use crate::exception::{DispatchError, DispatchResult};
use std::sync::Arc;

/// Protects routes that carry an [`AuthRequirement`].
///
/// Missing or rejected credentials fail with 401, a principal lacking the
/// required authority with 403. A provider that cannot answer at all is an
/// unexpected failure (500). On success the principal is stored on the
/// exchange for injection.
#[derive(Clone)]
pub struct AuthGuard {
    provider: Arc<dyn AuthProvider>,
    method: AuthMethod,
}

impl AuthGuard {
    pub fn new(provider: Arc<dyn AuthProvider>, method: AuthMethod) -> Self {
        Self { provider, method }
    }

    pub fn method(&self) -> AuthMethod {
        self.method
    }

    pub async fn authorize(
        &self,
        requirement: &AuthRequirement,
        exchange: &mut Exchange,
    ) -> DispatchResult {
        let method = requirement.method.unwrap_or(self.method);

        let Some(credentials) = Credentials::extract(method, exchange.headers()) else {
            tracing::warn!(path = %exchange.path(), %method, "missing credentials");
            return Err(DispatchError::unauthenticated("Missing credentials"));
        };

        let principal = match self.provider.authenticate(&credentials).await {
            Ok(principal) => principal,
            Err(AuthError::InvalidCredentials(reason)) => {
                tracing::warn!(path = %exchange.path(), %method, %reason, "authentication rejected");
                return Err(DispatchError::unauthenticated(reason));
            }
            Err(AuthError::Provider(e)) => {
                tracing::error!(path = %exchange.path(), %method, error = %e, "auth provider failed");
                return Err(DispatchError::Unexpected(e));
            }
        };

        if let Some(authority) = &requirement.authority {
            if !principal.has_authority(authority) {
                tracing::warn!(
                    path = %exchange.path(),
                    user = principal.name(),
                    %authority,
                    "missing authority"
                );
                return Err(DispatchError::forbidden(format!(
                    "Missing authority: {authority}"
                )));
            }
        }

        exchange.set_principal(principal);
        Ok(())
    }
}
