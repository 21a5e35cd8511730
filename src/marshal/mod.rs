//! Content-type specific (de)serialization of payloads and error bodies.

use crate::exception::{DispatchError, DispatchResult, HttpException};
use axum::body::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

mod json;
mod text;

pub use json::JsonMarshaller;
pub use text::PlainTextMarshaller;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";

/// What a controller hands back to the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Value(serde_json::Value),
    Text(String),
    Raw {
        content_type: String,
        body: Bytes,
    },
}

impl Payload {
    /// Captures any serializable domain value.
    pub fn json<T: Serialize>(value: &T) -> DispatchResult<Self> {
        serde_json::to_value(value)
            .map(Payload::Value)
            .map_err(|e| DispatchError::Unexpected(e.into()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    /// The payload as a JSON value, which is also what templates receive.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Payload::Empty => serde_json::Value::Null,
            Payload::Value(v) => v.clone(),
            Payload::Text(s) => serde_json::Value::String(s.clone()),
            Payload::Raw { body, .. } => {
                serde_json::Value::String(String::from_utf8_lossy(body).into_owned())
            }
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Value(value)
    }
}

impl From<()> for Payload {
    fn from(_: ()) -> Self {
        Payload::Empty
    }
}

/// Serializer/deserializer bound to one content type.
///
/// Request bodies decode into an intermediate `serde_json::Value`; the typed
/// conversion happens in the body injector so this trait stays object safe.
pub trait PayloadMarshaller: Send + Sync + 'static {
    fn content_type(&self) -> &'static str;

    fn serialize(&self, payload: &Payload) -> DispatchResult<Bytes>;

    fn deserialize(&self, body: &[u8]) -> DispatchResult<serde_json::Value>;

    fn marshall_http_error(&self, error: &HttpException, display_errors: bool) -> Bytes;

    fn marshall_unexpected_error(&self, error: &anyhow::Error, display_errors: bool) -> Bytes;
}

/// Serializes a domain value with the given marshaller.
pub fn encode<T: Serialize>(marshaller: &dyn PayloadMarshaller, value: &T) -> DispatchResult<Bytes> {
    marshaller.serialize(&Payload::json(value)?)
}

/// Deserializes bytes produced by [`encode`] (or a client) back into a value.
pub fn decode<T: DeserializeOwned>(marshaller: &dyn PayloadMarshaller, body: &[u8]) -> DispatchResult<T> {
    let value = marshaller.deserialize(body)?;
    from_value(value).map_err(|e| DispatchError::validation(format!("Invalid body: {e}")))
}

/// Converts a deserialized body into `T`.
///
/// Text bodies arrive as strings. When `T` rejects a string, its content is
/// read again as a JSON scalar so `41` or `true` reach numeric and boolean targets.
pub fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> serde_json::Result<T> {
    match value {
        serde_json::Value::String(text) => {
            serde_json::from_value(serde_json::Value::String(text.clone()))
                .or_else(|e| serde_json::from_str(text.trim()).map_err(|_| e))
        }
        other => serde_json::from_value(other),
    }
}

/// Readable trace of an unexpected failure: the message, its cause chain
/// and, when captured, the backtrace.
pub fn stack_trace(error: &anyhow::Error) -> String {
    format!("{error:?}")
}

/// Marshallers indexed by content type.
#[derive(Clone)]
pub struct Marshallers {
    by_type: HashMap<String, Arc<dyn PayloadMarshaller>>,
}

impl Marshallers {
    pub fn new() -> Self {
        Self {
            by_type: HashMap::new(),
        }
    }

    /// JSON and plain text.
    pub fn with_defaults() -> Self {
        let mut marshallers = Self::new();
        marshallers.register(Arc::new(JsonMarshaller));
        marshallers.register(Arc::new(PlainTextMarshaller));
        marshallers
    }

    pub fn register(&mut self, marshaller: Arc<dyn PayloadMarshaller>) -> &mut Self {
        self.by_type
            .insert(marshaller.content_type().to_string(), marshaller);
        self
    }

    /// Looks up a marshaller, ignoring media type parameters such as `charset`.
    pub fn get(&self, content_type: &str) -> Option<&Arc<dyn PayloadMarshaller>> {
        self.by_type.get(essence(content_type).as_str())
    }

    pub fn content_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for Marshallers {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// `application/json; charset=utf-8` -> `application/json`
pub(crate) fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Dog {
        name: String,
        breed: String,
        age: u8,
    }

    #[test]
    fn test_json_round_trip() {
        let dog = Dog {
            name: "Snoopy".into(),
            breed: "Beagle".into(),
            age: 7,
        };
        let bytes = encode(&JsonMarshaller, &dog).unwrap();
        let back: Dog = decode(&JsonMarshaller, &bytes).unwrap();
        assert_eq!(back, dog);
    }

    #[test]
    fn test_text_round_trip() {
        let bytes = encode(&PlainTextMarshaller, &"woof".to_string()).unwrap();
        let back: String = decode(&PlainTextMarshaller, &bytes).unwrap();
        assert_eq!(back, "woof");

        let bytes = encode(&PlainTextMarshaller, &42i64).unwrap();
        assert_eq!(&bytes[..], b"42");
        assert_eq!(decode::<i64>(&PlainTextMarshaller, &bytes).unwrap(), 42);
        // Digits stay text for a string target.
        assert_eq!(decode::<String>(&PlainTextMarshaller, &bytes).unwrap(), "42");

        let bytes = encode(&PlainTextMarshaller, &true).unwrap();
        assert!(decode::<bool>(&PlainTextMarshaller, &bytes).unwrap());

        let err = decode::<i64>(&PlainTextMarshaller, b"forty").unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_lookup_ignores_parameters() {
        let marshallers = Marshallers::with_defaults();
        assert!(marshallers.get("application/json; charset=utf-8").is_some());
        assert!(marshallers.get("Text/Plain").is_some());
        assert!(marshallers.get("application/xml").is_none());
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let err = decode::<Dog>(&JsonMarshaller, br#"{"name": 3}"#).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
