//! Template engine selection for view responses.
//!
//! Rendering is delegated to [`TemplateEngine`] implementations; the manager
//! only picks one by the template's file extension.

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// An external template renderer.
#[async_trait]
pub trait TemplateEngine: Send + Sync + 'static {
    /// File extension handled by this engine, without the leading dot.
    fn extension(&self) -> &str;

    async fn render(&self, template: &str, context: &serde_json::Value) -> anyhow::Result<String>;
}

/// Serves `.html` files as they are, ignoring the context.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlFileEngine;

#[async_trait]
impl TemplateEngine for HtmlFileEngine {
    fn extension(&self) -> &str {
        "html"
    }

    async fn render(&self, template: &str, _context: &serde_json::Value) -> anyhow::Result<String> {
        tokio::fs::read_to_string(template)
            .await
            .with_context(|| format!("reading template {template}"))
    }
}

/// Routes each template to the engine registered for its extension.
#[derive(Clone, Default)]
pub struct TemplateEngineManager {
    engines: HashMap<String, Arc<dyn TemplateEngine>>,
    timeout: Option<Duration>,
}

impl TemplateEngineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn TemplateEngine>) -> &mut Self {
        self.engines.insert(engine.extension().to_ascii_lowercase(), engine);
        self
    }

    /// Renders slower than `timeout` fail like any other rendering error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.engines.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// Keeps only the engines whose extension is listed.
    pub fn retain(&mut self, extensions: &[String]) {
        self.engines
            .retain(|ext, _| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
    }

    pub fn engine_for(&self, template: &str) -> Option<&Arc<dyn TemplateEngine>> {
        let extension = Path::new(template).extension()?.to_str()?;
        self.engines.get(&extension.to_ascii_lowercase())
    }

    pub async fn render(&self, template: &str, context: &serde_json::Value) -> anyhow::Result<String> {
        let engine = self
            .engine_for(template)
            .ok_or_else(|| anyhow!("No template engine can render {template}"))?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, engine.render(template, context))
                .await
                .map_err(|_| anyhow!("Rendering {template} timed out after {limit:?}"))?,
            None => engine.render(template, context).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TemplateEngine for Echo {
        fn extension(&self) -> &str {
            "echo"
        }

        async fn render(&self, template: &str, context: &serde_json::Value) -> anyhow::Result<String> {
            Ok(format!("{template}:{context}"))
        }
    }

    struct Slow;

    #[async_trait]
    impl TemplateEngine for Slow {
        fn extension(&self) -> &str {
            "slow"
        }

        async fn render(&self, _: &str, _: &serde_json::Value) -> anyhow::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_select_by_extension() {
        let mut manager = TemplateEngineManager::new();
        manager.register(Arc::new(Echo));

        let out = manager
            .render("dogs/list.ECHO", &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(out, r#"dogs/list.ECHO:{"n":1}"#);

        assert!(manager.render("dogs/list.hbs", &serde_json::Value::Null).await.is_err());
        assert!(manager.render("no-extension", &serde_json::Value::Null).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let mut manager = TemplateEngineManager::new().with_timeout(Duration::from_secs(1));
        manager.register(Arc::new(Slow));
        let err = manager.render("x.slow", &serde_json::Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_retain_configured() {
        let mut manager = TemplateEngineManager::new();
        manager.register(Arc::new(Echo)).register(Arc::new(HtmlFileEngine));
        manager.retain(&["html".to_string()]);
        assert_eq!(manager.extensions(), vec!["html".to_string()]);
    }
}
