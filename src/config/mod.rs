//! Application configuration.
//!
//! Loaded from a JSON document whose keys are kebab-case:
//!
//! ```json
//! {
//!   "templates": ["html"],
//!   "throttling": { "count": 10, "time-frame": 1, "time-unit": "MINUTES" },
//!   "auth-type": "tokens",
//!   "auth-method": "API_TOKEN",
//!   "display-errors": false,
//!   "services": { "DogService": null, "Mailer": { "host": "localhost" } }
//! }
//! ```

use crate::auth::AuthMethod;
use crate::error::{Result, StratusError};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `display-errors`.
pub const DISPLAY_ERRORS_ENV: &str = "STRATUS_DISPLAY_ERRORS";
/// Environment variable overriding `views-dir`.
pub const VIEWS_DIR_ENV: &str = "STRATUS_VIEWS_DIR";

const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Extensions of the template engines to enable; empty enables all registered.
    pub templates: Vec<String>,
    pub throttling: Option<ThrottlingConfig>,
    pub auth_type: Option<String>,
    pub auth_properties: serde_json::Value,
    pub auth_method: AuthMethod,
    pub display_errors: bool,
    pub views_dir: String,
    pub error_templates: HashMap<u16, String>,
    /// Service identifier to constructor argument, in declaration order.
    pub services: serde_json::Map<String, serde_json::Value>,
    pub body_limit: usize,
    /// Upper bound for one template render, in milliseconds.
    pub render_timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            templates: Vec::new(),
            throttling: None,
            auth_type: None,
            auth_properties: serde_json::Value::Null,
            auth_method: AuthMethod::default(),
            display_errors: false,
            views_dir: "web/views".to_string(),
            error_templates: HashMap::new(),
            services: serde_json::Map::new(),
            body_limit: DEFAULT_BODY_LIMIT,
            render_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThrottlingConfig {
    pub count: u32,
    pub time_frame: u64,
    #[serde(default = "default_time_unit")]
    pub time_unit: TimeUnit,
}

fn default_time_unit() -> TimeUnit {
    TimeUnit::Seconds
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum_macros::EnumString, strum_macros::Display,
)]
#[serde(try_from = "String")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TryFrom<String> for TimeUnit {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value
            .parse()
            .map_err(|_| format!("unknown time unit '{value}'"))
    }
}

impl TimeUnit {
    pub fn duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| StratusError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| StratusError::invalid_config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        tracing::info!(path = %path.display(), "loading configuration");
        Self::from_json_str(&json)
    }

    /// Applies `STRATUS_*` environment overrides on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(flag) = env::var(DISPLAY_ERRORS_ENV) {
            self.display_errors = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(dir) = env::var(VIEWS_DIR_ENV) {
            self.views_dir = dir;
        }
        self
    }

    pub fn render_timeout(&self) -> Option<Duration> {
        self.render_timeout.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(throttling) = &self.throttling {
            if throttling.count == 0 || throttling.time_frame == 0 {
                return Err(StratusError::invalid_config(
                    "throttling count and time-frame must be positive",
                ));
            }
        }
        if self.body_limit == 0 {
            return Err(StratusError::invalid_config("body-limit must be positive"));
        }
        if let Some(code) = self
            .error_templates
            .keys()
            .find(|code| !(100..=599).contains(*code))
        {
            return Err(StratusError::invalid_config(format!(
                "error-templates: {code} is not an HTTP status"
            )));
        }
        if self.auth_type.is_none() && !self.auth_properties.is_null() {
            tracing::warn!("auth-properties given without auth-type; they will be ignored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert!(!config.display_errors);
        assert_eq!(config.views_dir, "web/views");
        assert_eq!(config.body_limit, 2 * 1024 * 1024);
        assert_eq!(config.auth_method, AuthMethod::Basic);
        assert!(config.throttling.is_none());
    }

    #[test]
    fn test_full_document() {
        let config = Config::from_json_str(
            r#"{
                "templates": ["html", "hbs"],
                "throttling": { "count": 2, "time-frame": 10, "time-unit": "SECONDS" },
                "auth-type": "tokens",
                "auth-method": "API_TOKEN",
                "display-errors": true,
                "error-templates": { "404": "web/views/missing.html" },
                "services": { "DogService": null, "Mailer": { "host": "localhost" } }
            }"#,
        )
        .unwrap();

        let throttling = config.throttling.unwrap();
        assert_eq!(throttling.time_unit.duration(throttling.time_frame), Duration::from_secs(10));
        assert_eq!(config.auth_method, AuthMethod::ApiToken);
        assert_eq!(config.error_templates[&404], "web/views/missing.html");
        let names: Vec<&String> = config.services.keys().collect();
        assert_eq!(names, ["DogService", "Mailer"]);
    }

    #[test]
    fn test_time_units() {
        assert_eq!("minutes".parse::<TimeUnit>().unwrap(), TimeUnit::Minutes);
        assert_eq!(TimeUnit::Hours.duration(2), Duration::from_secs(7_200));
        assert_eq!(TimeUnit::Milliseconds.to_string(), "MILLISECONDS");
    }

    #[test]
    fn test_invalid_documents() {
        assert!(Config::from_json_str(r#"{"throttling": {"count": 0, "time-frame": 1}}"#).is_err());
        assert!(Config::from_json_str(r#"{"throttling": {"count": 1, "time-frame": 1, "time-unit": "FORTNIGHTS"}}"#).is_err());
        assert!(Config::from_json_str(r#"{"error-templates": {"99": "x.html"}}"#).is_err());
        assert!(Config::from_json_str("not json").is_err());
    }
}
