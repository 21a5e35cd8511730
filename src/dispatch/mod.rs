//! The pipeline executor.
//!
//! A [`Dispatcher`] owns one instance of every boot-time registry and runs
//! each request through the fixed stage sequence
//! `MATCHED → AUTHORIZING → INJECTING → PRE-PROCESSING → INVOKING →
//! POST-PROCESSING → MARSHALLING → COMPLETE`. Any stage may fail; the failure
//! is handed to the [`ErrorHandler`] and the exchange moves to `ERROR`.

use crate::auth::AuthGuard;
use crate::controller::Handler;
use crate::exception::{DispatchError, DispatchResult, ErrorHandler};
use crate::inject::Params;
use crate::interceptor::{Endpoint, Next};
use crate::marshal::{APPLICATION_JSON, Marshallers, Payload, TEXT_PLAIN};
use crate::routing::{MatchedRoute, Route, RouteRegistry};
use crate::throttle::{RateLimiter, client_key};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::Response;
use std::sync::Arc;

mod builder;
pub mod exchange;
pub mod negotiate;
mod service;

pub use builder::DispatcherBuilder;
pub use exchange::{Exchange, Stage};
pub use service::DispatchService;

/// One worker's copy of the request pipeline. Immutable after boot.
pub struct Dispatcher {
    routes: RouteRegistry,
    errors: ErrorHandler,
    marshallers: Arc<Marshallers>,
    guard: Option<AuthGuard>,
    limiter: Option<Arc<RateLimiter>>,
    body_limit: usize,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn routes(&self) -> &RouteRegistry {
        &self.routes
    }

    pub fn error_handler(&self) -> &ErrorHandler {
        &self.errors
    }

    pub fn match_route(&self, method: &Method, path: &str) -> DispatchResult<MatchedRoute> {
        self.routes.match_route(method, path)
    }

    /// Matches and dispatches; routing failures go through the error handler too.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        match self.match_route(request.method(), request.uri().path()) {
            Ok(matched) => self.dispatch(matched, request).await,
            Err(e) => {
                let accept = request
                    .headers()
                    .get(header::ACCEPT)
                    .and_then(|v| v.to_str().ok());
                let content_type = negotiate::select(accept, &[APPLICATION_JSON, TEXT_PLAIN]);
                self.errors.handle(false, content_type.as_deref(), e).await
            }
        }
    }

    /// Runs `request` through the pipeline of an already matched route.
    pub async fn dispatch(&self, matched: MatchedRoute, request: Request<Body>) -> Response {
        let MatchedRoute { route, path_params } = matched;
        let (head, body) = request.into_parts();
        let mut exchange = Exchange::new(head, path_params);
        if let Some(template) = route.view().filter(|t| !t.is_empty()) {
            exchange.set_template(template);
        }

        match self.run(&route, &mut exchange, body).await {
            Ok(response) => response,
            Err(e) => {
                exchange.advance(Stage::Error);
                self.errors
                    .handle(exchange.is_view(), exchange.content_type(), e)
                    .await
            }
        }
    }

    async fn run(&self, route: &Route, exchange: &mut Exchange, body: Body) -> DispatchResult<Response> {
        let content_type = negotiate::select(exchange.header("accept"), route.produces())
            .ok_or(DispatchError::NotAcceptable)?;
        exchange.set_content_type(content_type);

        let body = self.read_body(exchange.headers(), body).await?;
        exchange.set_body(body);

        if route.is_throttled() {
            self.throttle(exchange)?;
        }

        if let Some(requirement) = route.auth() {
            exchange.advance(Stage::Authorizing);
            let guard = self
                .guard
                .as_ref()
                .ok_or_else(|| DispatchError::unexpected("No auth provider configured"))?;
            guard.authorize(requirement, exchange).await?;
        }

        exchange.advance(Stage::Injecting);
        let mut params = Params::default();
        for param in route.params() {
            params.push(param.name(), param.resolve(exchange)?);
        }
        exchange.set_params(params);

        exchange.advance(Stage::PreProcessing);
        let endpoint = Invoke(Arc::clone(&route.handler));
        Next::new(route.chain(), &endpoint).run(exchange).await?;

        exchange.advance(Stage::Marshalling);
        let response = self.marshal(exchange)?;
        exchange.advance(Stage::Complete);
        Ok(response)
    }

    async fn read_body(&self, headers: &HeaderMap, body: Body) -> DispatchResult<Bytes> {
        let too_large = || {
            DispatchError::http(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("Request body exceeds {} bytes", self.body_limit),
            )
        };
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.body_limit) {
            return Err(too_large());
        }
        axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(|_| too_large())
    }

    fn throttle(&self, exchange: &Exchange) -> DispatchResult {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let client = client_key(exchange);
        if limiter.check(&client) {
            return Ok(());
        }
        tracing::warn!(%client, path = %exchange.path(), "rate limit exceeded");
        Err(DispatchError::RateLimited)
    }

    fn marshal(&self, exchange: &mut Exchange) -> DispatchResult<Response> {
        if let Some(status) = exchange.failed() {
            return Ok(self.errors.handle_status(status));
        }

        let status = exchange.status();
        let negotiated = exchange.content_type().unwrap_or(APPLICATION_JSON).to_string();
        let draft = exchange.take_response();

        let (content_type, body) = match (draft.body, draft.payload) {
            (Some((content_type, body)), _) => (Some(content_type), body),
            (None, Payload::Empty) => (None, Bytes::new()),
            (None, Payload::Raw { content_type, body }) => (Some(content_type), body),
            (None, payload) => {
                let marshaller = self.marshallers.get(&negotiated).ok_or_else(|| {
                    DispatchError::unexpected(format!("No marshaller for {negotiated}"))
                })?;
                (
                    Some(marshaller.content_type().to_string()),
                    marshaller.serialize(&payload)?,
                )
            }
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        response.headers_mut().extend(draft.headers);
        if let Some(value) = content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        Ok(response)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("auth", &self.guard.as_ref().map(AuthGuard::method))
            .field("throttling", &self.limiter.as_ref().map(|l| l.policy()))
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

/// Innermost link of every route chain: calls the controller.
struct Invoke(Handler);

#[async_trait]
impl Endpoint for Invoke {
    async fn call(&self, exchange: &mut Exchange) -> DispatchResult {
        exchange.advance(Stage::Invoking);
        let params = exchange.take_params();
        let payload = (self.0)(params).await?;
        exchange.set_payload(payload);
        exchange.advance(Stage::PostProcessing);
        Ok(())
    }
}
