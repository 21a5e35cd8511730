use super::{APPLICATION_JSON, Payload, PayloadMarshaller, stack_trace};
use crate::exception::{DEFAULT_ERROR_MESSAGE, DispatchError, DispatchResult, HttpException};
use axum::body::Bytes;
use serde_json::json;

/// `application/json` marshaller backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshaller;

impl JsonMarshaller {
    fn error_body(status: u16, message: &str, trace: Option<String>) -> Bytes {
        let mut body = json!({
            "error": {
                "status": status,
                "message": message,
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(trace) = trace {
            body["stackTrace"] = serde_json::Value::String(trace);
        }
        Bytes::from(body.to_string())
    }
}

impl PayloadMarshaller for JsonMarshaller {
    fn content_type(&self) -> &'static str {
        APPLICATION_JSON
    }

    fn serialize(&self, payload: &Payload) -> DispatchResult<Bytes> {
        match payload {
            Payload::Empty => Ok(Bytes::new()),
            Payload::Raw { body, .. } => Ok(body.clone()),
            other => serde_json::to_vec(&other.to_value())
                .map(Bytes::from)
                .map_err(|e| DispatchError::Unexpected(e.into())),
        }
    }

    fn deserialize(&self, body: &[u8]) -> DispatchResult<serde_json::Value> {
        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(body)
            .map_err(|e| DispatchError::validation(format!("Malformed JSON body: {e}")))
    }

    fn marshall_http_error(&self, error: &HttpException, _display_errors: bool) -> Bytes {
        Self::error_body(error.status().as_u16(), error.message(), None)
    }

    fn marshall_unexpected_error(&self, error: &anyhow::Error, display_errors: bool) -> Bytes {
        let trace = display_errors.then(|| stack_trace(error));
        Self::error_body(500, DEFAULT_ERROR_MESSAGE, trace)
    }
}
