//! Authentication orchestration.
//!
//! Credential checking itself belongs to an [`AuthProvider`]; this module only
//! extracts credentials from a request, calls the provider and enforces the
//! route's authority requirement.

use crate::error::{Result, StratusError};
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

mod guard;

pub use guard::AuthGuard;

/// Header carrying an API token for [`AuthMethod::ApiToken`].
pub const API_TOKEN_HEADER: &str = "x-api-token";

/// An authenticated user as returned by the auth provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    name: String,
    #[serde(default)]
    authorities: Vec<String>,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authorities: Vec::new(),
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authorities(&self) -> &[String] {
        &self.authorities
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}

/// How credentials travel in a request.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    #[default]
    Basic,
    Jwt,
    ApiToken,
}

/// Raw credentials handed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
    ApiToken(String),
}

impl Credentials {
    /// Reads the credentials `method` expects; `None` when absent or malformed.
    pub fn extract(method: AuthMethod, headers: &HeaderMap) -> Option<Self> {
        match method {
            AuthMethod::Basic => {
                let encoded = authorization(headers)?.strip_prefix("Basic ")?;
                let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
                let decoded = String::from_utf8(decoded).ok()?;
                let (username, password) = decoded.split_once(':')?;
                Some(Credentials::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            AuthMethod::Jwt => authorization(headers)?
                .strip_prefix("Bearer ")
                .map(|t| Credentials::Bearer(t.trim().to_string())),
            AuthMethod::ApiToken => headers
                .get(API_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(|t| Credentials::ApiToken(t.to_string())),
        }
    }
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// The external credential checker.
#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn authenticate(&self, credentials: &Credentials) -> std::result::Result<Principal, AuthError>;
}

/// What a route demands of the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthRequirement {
    pub method: Option<AuthMethod>,
    pub authority: Option<String>,
}

impl AuthRequirement {
    /// Any authenticated caller.
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn authority(authority: impl Into<String>) -> Self {
        Self {
            method: None,
            authority: Some(authority.into()),
        }
    }

    pub fn using(mut self, method: AuthMethod) -> Self {
        self.method = Some(method);
        self
    }
}

type ProviderFactory =
    Arc<dyn Fn(&serde_json::Value) -> anyhow::Result<Arc<dyn AuthProvider>> + Send + Sync>;

/// Auth provider constructors keyed by the configured `auth-type`.
#[derive(Clone, Default)]
pub struct AuthProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl AuthProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, P>(&mut self, auth_type: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&serde_json::Value) -> anyhow::Result<P> + Send + Sync + 'static,
        P: AuthProvider,
    {
        let factory: ProviderFactory =
            Arc::new(move |props: &serde_json::Value| factory(props).map(|p| Arc::new(p) as Arc<dyn AuthProvider>));
        self.factories.insert(auth_type.into(), factory);
        self
    }

    pub fn contains(&self, auth_type: &str) -> bool {
        self.factories.contains_key(auth_type)
    }

    /// Builds the provider for `auth_type`. Unknown types abort boot.
    pub fn create(
        &self,
        auth_type: &str,
        properties: &serde_json::Value,
    ) -> Result<Arc<dyn AuthProvider>> {
        let factory = self
            .factories
            .get(auth_type)
            .ok_or_else(|| StratusError::UnknownAuthProvider(auth_type.to_string()))?;
        factory(properties).map_err(|e| {
            StratusError::invalid_config(format!("auth provider '{auth_type}': {e:#}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    struct Nobody;

    #[async_trait]
    impl AuthProvider for Nobody {
        async fn authenticate(&self, _: &Credentials) -> std::result::Result<Principal, AuthError> {
            Err(AuthError::InvalidCredentials("nobody gets in".into()))
        }
    }

    #[test]
    fn test_extract_basic() {
        let mut headers = HeaderMap::new();
        let encoded = general_purpose::STANDARD.encode("snoopy:woodstock");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert_eq!(
            Credentials::extract(AuthMethod::Basic, &headers),
            Some(Credentials::Basic {
                username: "snoopy".into(),
                password: "woodstock".into()
            })
        );
        assert_eq!(Credentials::extract(AuthMethod::Jwt, &headers), None);
    }

    #[test]
    fn test_extract_token_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        headers.insert(API_TOKEN_HEADER, HeaderValue::from_static("t0k3n"));
        assert_eq!(
            Credentials::extract(AuthMethod::Jwt, &headers),
            Some(Credentials::Bearer("abc.def.ghi".into()))
        );
        assert_eq!(
            Credentials::extract(AuthMethod::ApiToken, &headers),
            Some(Credentials::ApiToken("t0k3n".into()))
        );
    }

    #[test]
    fn test_auth_method_names() {
        assert_eq!("API_TOKEN".parse::<AuthMethod>().unwrap(), AuthMethod::ApiToken);
        assert_eq!(AuthMethod::Jwt.to_string(), "JWT");
        let parsed: AuthMethod = serde_json::from_str("\"BASIC\"").unwrap();
        assert_eq!(parsed, AuthMethod::Basic);
    }

    #[test]
    fn test_unknown_provider_type_is_fatal() {
        let mut registry = AuthProviderRegistry::new();
        registry.register("nobody", |_| Ok(Nobody));
        assert!(registry.create("nobody", &serde_json::Value::Null).is_ok());
        let err = registry.create("ldap", &serde_json::Value::Null).err().unwrap();
        assert!(matches!(err, StratusError::UnknownAuthProvider(t) if t == "ldap"));
    }

    #[test]
    fn test_authorities() {
        let principal = Principal::new("snoopy").with_authority("admin");
        assert!(principal.has_authority("admin"));
        assert!(!principal.has_authority("root"));
    }
}
