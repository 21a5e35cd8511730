use super::{Payload, PayloadMarshaller, TEXT_PLAIN, stack_trace};
use crate::exception::{DEFAULT_ERROR_MESSAGE, DispatchError, DispatchResult, HttpException};
use axum::body::Bytes;

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextMarshaller;

impl PayloadMarshaller for PlainTextMarshaller {
    fn content_type(&self) -> &'static str {
        TEXT_PLAIN
    }

    fn serialize(&self, payload: &Payload) -> DispatchResult<Bytes> {
        Ok(match payload {
            Payload::Empty => Bytes::new(),
            Payload::Text(s) => Bytes::from(s.clone()),
            Payload::Value(serde_json::Value::String(s)) => Bytes::from(s.clone()),
            Payload::Value(v) => Bytes::from(v.to_string()),
            Payload::Raw { body, .. } => body.clone(),
        })
    }

    fn deserialize(&self, body: &[u8]) -> DispatchResult<serde_json::Value> {
        std::str::from_utf8(body)
            .map(|s| serde_json::Value::String(s.to_string()))
            .map_err(|_| DispatchError::validation("Body is not valid UTF-8"))
    }

    fn marshall_http_error(&self, error: &HttpException, _display_errors: bool) -> Bytes {
        Bytes::from(error.message().to_string())
    }

    fn marshall_unexpected_error(&self, error: &anyhow::Error, display_errors: bool) -> Bytes {
        if display_errors {
            Bytes::from(format!("{DEFAULT_ERROR_MESSAGE}\n\n{}", stack_trace(error)))
        } else {
            Bytes::from_static(DEFAULT_ERROR_MESSAGE.as_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_string_is_written_raw() {
        let bytes = PlainTextMarshaller
            .serialize(&Payload::Value(serde_json::json!("hello")))
            .unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[test]
    fn test_unexpected_trace_only_when_displayed() {
        let err = anyhow::anyhow!("disk on fire");
        let hidden = PlainTextMarshaller.marshall_unexpected_error(&err, false);
        assert!(!String::from_utf8_lossy(&hidden).contains("disk on fire"));

        let shown = PlainTextMarshaller.marshall_unexpected_error(&err, true);
        assert!(String::from_utf8_lossy(&shown).contains(&stack_trace(&err)));
    }
}
