use crate::auth::Principal;
use crate::inject::Params;
use crate::marshal::Payload;
use crate::routing::PathParams;
use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, request::Parts};
use std::fmt;

/// Where a request is in its pipeline.
///
/// Stages only move forward; `Error` is reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum Stage {
    Matched,
    Authorizing,
    Injecting,
    PreProcessing,
    Invoking,
    PostProcessing,
    Marshalling,
    Complete,
    Error,
}

/// Response state built up while the pipeline runs.
#[derive(Debug, Default)]
pub struct ResponseDraft {
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: HeaderMap,
    pub(crate) payload: Payload,
    /// A body produced directly (rendered view, short-circuit) that bypasses marshalling.
    pub(crate) body: Option<(String, Bytes)>,
}

/// All request-scoped state for one dispatch.
///
/// Owned by the worker handling the request and dropped once the response
/// has been produced; processors and interceptors borrow it mutably in turn.
pub struct Exchange {
    head: Parts,
    path_params: PathParams,
    query: Vec<(String, String)>,
    body: Bytes,
    principal: Option<Principal>,
    content_type: Option<String>,
    template: Option<String>,
    data: serde_json::Map<String, serde_json::Value>,
    params: Option<Params>,
    response: ResponseDraft,
    halted: bool,
    failed: Option<StatusCode>,
    stage: Stage,
}

impl Exchange {
    pub fn new(head: Parts, path_params: PathParams) -> Self {
        let query = head
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            head,
            path_params,
            query,
            body: Bytes::new(),
            principal: None,
            content_type: None,
            template: None,
            data: serde_json::Map::new(),
            params: None,
            response: ResponseDraft::default(),
            halted: false,
            failed: None,
            stage: Stage::Matched,
        }
    }

    pub fn method(&self) -> &Method {
        &self.head.method
    }

    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn extensions(&self) -> &axum::http::Extensions {
        &self.head.extensions
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Last value wins for repeated keys.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rfind(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Content type negotiated for the response, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    /// Template chosen for a view response. Its presence makes this a view dispatch.
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn set_template(&mut self, template: impl Into<String>) {
        self.template = Some(template.into());
    }

    pub fn is_view(&self) -> bool {
        self.template.is_some()
    }

    /// Free-form context shared between processors, handlers and templates.
    pub fn data(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.data
    }

    pub fn put(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    pub(crate) fn set_params(&mut self, params: Params) {
        self.params = Some(params);
    }

    pub(crate) fn take_params(&mut self) -> Params {
        self.params.take().unwrap_or_default()
    }

    pub fn payload(&self) -> &Payload {
        &self.response.payload
    }

    pub fn set_payload(&mut self, payload: Payload) {
        self.response.payload = payload;
    }

    pub fn status(&self) -> StatusCode {
        self.response.status.unwrap_or(StatusCode::OK)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.status = Some(status);
    }

    pub fn response_headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.response.headers
    }

    pub fn insert_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response.headers.insert(name, value);
    }

    /// Completes the response with a ready body; marshalling is skipped.
    pub fn respond(&mut self, status: StatusCode, content_type: &str, body: impl Into<Bytes>) {
        self.response.status = Some(status);
        self.response.body = Some((content_type.to_string(), body.into()));
    }

    pub fn is_responded(&self) -> bool {
        self.response.body.is_some()
    }

    /// Marks the response as failed without attaching an error.
    pub fn fail(&mut self, status: StatusCode) {
        self.failed = Some(status);
    }

    pub fn failed(&self) -> Option<StatusCode> {
        self.failed
    }

    pub(crate) fn halt(&mut self) {
        self.halted = true;
    }

    /// True once a pre-handler has short-circuited the chain.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn advance(&mut self, next: Stage) {
        debug_assert!(
            next == Stage::Error || next >= self.stage,
            "pipeline moved backwards: {} -> {}",
            self.stage,
            next
        );
        tracing::debug!(method = %self.head.method, path = %self.head.uri.path(), from = %self.stage, to = %next, "stage");
        self.stage = next;
    }

    pub(crate) fn take_response(&mut self) -> ResponseDraft {
        std::mem::take(&mut self.response)
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.head.method)
            .field("uri", &self.head.uri)
            .field("stage", &self.stage)
            .field("template", &self.template)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_exchange(uri: &str) -> Exchange {
    let (head, _) = axum::http::Request::get(uri).body(()).unwrap().into_parts();
    Exchange::new(head, PathParams::new())
}
