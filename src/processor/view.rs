use super::{Flow, Processor};
use crate::dispatch::Exchange;
use crate::exception::{DispatchError, DispatchResult};
use crate::marshal::TEXT_HTML;
use crate::view::TemplateEngineManager;
use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;

/// Marker: render the handler's payload with `template`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View(pub String);

impl View {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }
}

/// Marks the dispatch as a view before the handler runs and renders the
/// template afterwards. The handler may swap the template on the exchange.
pub struct ViewProcessor {
    template: String,
    engines: Arc<TemplateEngineManager>,
}

impl ViewProcessor {
    pub fn new(view: &View, engines: Arc<TemplateEngineManager>) -> Self {
        Self {
            template: view.0.clone(),
            engines,
        }
    }
}

#[async_trait]
impl Processor for ViewProcessor {
    async fn pre_handle(&self, exchange: &mut Exchange) -> DispatchResult<Flow> {
        if self.template.is_empty() {
            exchange.respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                TEXT_HTML,
                "No view template configured",
            );
            return Ok(Flow::Halt);
        }
        exchange.set_template(self.template.clone());
        Ok(Flow::Continue)
    }

    async fn post_handle(&self, exchange: &mut Exchange) -> DispatchResult {
        if exchange.is_responded() {
            return Ok(());
        }
        let template = exchange.template().unwrap_or(self.template.as_str()).to_string();

        let mut context = exchange.data().clone();
        context.insert("data".to_string(), exchange.payload().to_value());
        let context = serde_json::Value::Object(context);

        let html = self
            .engines
            .render(&template, &context)
            .await
            .map_err(DispatchError::Unexpected)?;
        let status = exchange.status();
        exchange.respond(status, TEXT_HTML, html);
        Ok(())
    }
}
