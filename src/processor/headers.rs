use super::Processor;
use crate::dispatch::Exchange;
use crate::error::{Result, StratusError};
use crate::exception::DispatchResult;
use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

/// Marker: add a fixed response header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub name: String,
    pub value: String,
}

impl ResponseHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

pub struct ResponseHeaderProcessor {
    name: HeaderName,
    value: HeaderValue,
}

impl ResponseHeaderProcessor {
    /// Header names and values are validated once, at boot.
    pub fn from_marker(marker: &ResponseHeader) -> Result<Self> {
        let name = HeaderName::from_bytes(marker.name.as_bytes()).map_err(|e| {
            StratusError::invalid_config(format!("header name '{}': {e}", marker.name))
        })?;
        let value = HeaderValue::from_str(&marker.value).map_err(|e| {
            StratusError::invalid_config(format!("header value for '{}': {e}", marker.name))
        })?;
        Ok(Self { name, value })
    }
}

#[async_trait]
impl Processor for ResponseHeaderProcessor {
    async fn post_handle(&self, exchange: &mut Exchange) -> DispatchResult {
        exchange.insert_response_header(self.name.clone(), self.value.clone());
        Ok(())
    }
}
