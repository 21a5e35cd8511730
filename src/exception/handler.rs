use super::{DispatchError, HttpException};
use crate::marshal::{Marshallers, TEXT_HTML, TEXT_PLAIN, stack_trace};
use crate::view::TemplateEngineManager;
use axum::body::{Body, Bytes};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_ERROR_MESSAGE: &str = "Internal server error";

/// Statuses that get an error page out of the box.
const DEFAULT_ERROR_PAGES: [u16; 5] = [401, 403, 404, 420, 500];

/// Status code to error page template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorTemplates {
    by_status: HashMap<u16, String>,
}

impl ErrorTemplates {
    /// `{views_dir}/errors/{status}.html` for 401, 403, 404, 420 and 500.
    pub fn defaults(views_dir: &str) -> Self {
        let views_dir = views_dir.trim_end_matches('/');
        Self {
            by_status: DEFAULT_ERROR_PAGES
                .iter()
                .map(|code| (*code, format!("{views_dir}/errors/{code}.html")))
                .collect(),
        }
    }

    /// Configured entries replace or extend the defaults.
    pub fn with_overrides(mut self, overrides: &HashMap<u16, String>) -> Self {
        self.by_status
            .extend(overrides.iter().map(|(code, tpl)| (*code, tpl.clone())));
        self
    }

    pub fn get(&self, status: StatusCode) -> Option<&str> {
        self.by_status.get(&status.as_u16()).map(String::as_str)
    }
}

/// Turns every pipeline failure into a response.
///
/// View dispatches get the error template for the status, API dispatches
/// get the negotiated marshaller's error payload. Stack traces are only
/// included when `display_errors` is set.
#[derive(Clone)]
pub struct ErrorHandler {
    templates: ErrorTemplates,
    display_errors: bool,
    engines: Arc<TemplateEngineManager>,
    marshallers: Arc<Marshallers>,
}

impl ErrorHandler {
    pub fn new(
        templates: ErrorTemplates,
        display_errors: bool,
        engines: Arc<TemplateEngineManager>,
        marshallers: Arc<Marshallers>,
    ) -> Self {
        Self {
            templates,
            display_errors,
            engines,
            marshallers,
        }
    }

    pub fn display_errors(&self) -> bool {
        self.display_errors
    }

    /// Translates `error` for a view (`view`) or API dispatch negotiated to `content_type`.
    pub async fn handle(
        &self,
        view: bool,
        content_type: Option<&str>,
        error: DispatchError,
    ) -> Response {
        let status = error.status();
        match &error {
            DispatchError::Unexpected(e) => {
                tracing::error!(status = status.as_u16(), error = ?e, "unexpected failure")
            }
            other => tracing::error!(status = status.as_u16(), error = %other, "request failed"),
        }

        let allow = match &error {
            DispatchError::MethodNotAllowed { allowed, .. } => Some(
                allowed
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        };

        let mut response = match (error.as_http(), error) {
            (Some(http), _) => self.http_failure(view, content_type, &http).await,
            (None, DispatchError::Unexpected(e)) => {
                self.unexpected_failure(view, content_type, &e).await
            }
            (None, other) => {
                // as_http only declines unexpected failures
                let http = HttpException::new(other.status(), other.to_string());
                self.http_failure(view, content_type, &http).await
            }
        };

        if let Some(allow) = allow.and_then(|a| HeaderValue::from_str(&a).ok()) {
            response.headers_mut().insert(header::ALLOW, allow);
        }
        response
    }

    /// The response was marked failed upstream without an error attached.
    pub fn handle_status(&self, status: StatusCode) -> Response {
        tracing::error!(status = status.as_u16(), "request marked as failed");
        let message = status.canonical_reason().unwrap_or(DEFAULT_ERROR_MESSAGE);
        respond(status, TEXT_PLAIN, Bytes::from(message.to_string()))
    }

    async fn http_failure(
        &self,
        view: bool,
        content_type: Option<&str>,
        error: &HttpException,
    ) -> Response {
        let status = error.status();
        if view {
            let context = json!({
                "error": { "status": status.as_u16(), "message": error.message() }
            });
            return self
                .render_error_page(status, context, error.message().to_string())
                .await;
        }

        match content_type.and_then(|ct| self.marshallers.get(ct)) {
            Some(marshaller) => respond(
                status,
                marshaller.content_type(),
                marshaller.marshall_http_error(error, self.display_errors),
            ),
            None => respond(status, TEXT_PLAIN, Bytes::from(error.message().to_string())),
        }
    }

    async fn unexpected_failure(
        &self,
        view: bool,
        content_type: Option<&str>,
        error: &anyhow::Error,
    ) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        if view {
            let mut context = json!({
                "error": { "status": status.as_u16(), "message": DEFAULT_ERROR_MESSAGE }
            });
            let mut fallback = DEFAULT_ERROR_MESSAGE.to_string();
            if self.display_errors {
                let trace = stack_trace(error);
                context["stackTrace"] = json!(trace);
                fallback = format!("{fallback}\n\n{trace}");
            }
            return self.render_error_page(status, context, fallback).await;
        }

        match content_type.and_then(|ct| self.marshallers.get(ct)) {
            Some(marshaller) => respond(
                status,
                marshaller.content_type(),
                marshaller.marshall_unexpected_error(error, self.display_errors),
            ),
            None => {
                let body = if self.display_errors {
                    format!("{DEFAULT_ERROR_MESSAGE}\n\n{}", stack_trace(error))
                } else {
                    DEFAULT_ERROR_MESSAGE.to_string()
                };
                respond(status, TEXT_PLAIN, Bytes::from(body))
            }
        }
    }

    async fn render_error_page(
        &self,
        status: StatusCode,
        context: serde_json::Value,
        fallback: String,
    ) -> Response {
        let Some(template) = self.templates.get(status) else {
            return respond(status, TEXT_PLAIN, Bytes::from(fallback));
        };

        match self.engines.render(template, &context).await {
            Ok(html) => respond(status, TEXT_HTML, Bytes::from(html)),
            Err(e) => {
                tracing::error!(template, error = %e, "could not render error template");
                respond(status, TEXT_PLAIN, Bytes::from_static(DEFAULT_ERROR_MESSAGE.as_bytes()))
            }
        }
    }
}

pub(crate) fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::APPLICATION_JSON;
    use crate::view::TemplateEngine;
    use async_trait::async_trait;
    use axum::http::Method;

    struct Pages;

    #[async_trait]
    impl TemplateEngine for Pages {
        fn extension(&self) -> &str {
            "page"
        }

        async fn render(&self, template: &str, context: &serde_json::Value) -> anyhow::Result<String> {
            if template.contains("broken") {
                anyhow::bail!("template syntax error");
            }
            Ok(format!(
                "<h1>{}</h1>{}",
                context["error"]["status"],
                context.get("stackTrace").and_then(|t| t.as_str()).unwrap_or("")
            ))
        }
    }

    fn handler(display_errors: bool, overrides: &[(u16, &str)]) -> ErrorHandler {
        let mut engines = TemplateEngineManager::new();
        engines.register(Arc::new(Pages));
        let overrides: HashMap<u16, String> =
            overrides.iter().map(|(c, t)| (*c, t.to_string())).collect();
        ErrorHandler::new(
            ErrorTemplates::defaults("web/views").with_overrides(&overrides),
            display_errors,
            Arc::new(engines),
            Arc::new(Marshallers::with_defaults()),
        )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_default_templates() {
        let templates = ErrorTemplates::defaults("web/views/");
        assert_eq!(templates.get(StatusCode::NOT_FOUND), Some("web/views/errors/404.html"));
        assert_eq!(
            templates.get(StatusCode::from_u16(420).unwrap()),
            Some("web/views/errors/420.html")
        );
        assert_eq!(templates.get(StatusCode::CONFLICT), None);
    }

    #[tokio::test]
    async fn test_api_http_error_uses_marshaller() {
        let response = handler(false, &[])
            .handle(false, Some(APPLICATION_JSON), DispatchError::http(StatusCode::CONFLICT, "taken"))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(response.headers()[header::CONTENT_TYPE], APPLICATION_JSON);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["error"]["message"], "taken");
    }

    #[tokio::test]
    async fn test_unexpected_hides_trace_by_default() {
        let err = || DispatchError::from(anyhow::anyhow!("secret connection string"));

        let hidden = handler(false, &[]).handle(false, Some(APPLICATION_JSON), err()).await;
        assert_eq!(hidden.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body_text(hidden).await.contains("secret connection string"));

        let shown = handler(true, &[]).handle(false, Some(APPLICATION_JSON), err()).await;
        assert!(body_text(shown).await.contains("secret connection string"));
    }

    #[tokio::test]
    async fn test_view_error_pages() {
        let h = handler(true, &[(404, "errors/404.page"), (500, "errors/broken.page")]);

        let response = h
            .handle(true, None, DispatchError::NotFound { path: "/x".into() })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "<h1>404</h1>");

        // Rendering failures fall back to the generic message.
        let response = h.handle(true, None, anyhow::anyhow!("boom").into()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, DEFAULT_ERROR_MESSAGE);

        // No template configured for the status: the message itself.
        let response = h
            .handle(true, None, DispatchError::http(StatusCode::CONFLICT, "taken"))
            .await;
        assert_eq!(body_text(response).await, "taken");
    }

    #[tokio::test]
    async fn test_method_not_allowed_lists_methods() {
        let response = handler(false, &[])
            .handle(
                false,
                None,
                DispatchError::MethodNotAllowed {
                    path: "/dogs".into(),
                    allowed: vec![Method::GET, Method::POST],
                },
            )
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    }

    #[tokio::test]
    async fn test_failed_without_error() {
        let response = handler(false, &[]).handle_status(StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_text(response).await, "Service Unavailable");
    }
}
