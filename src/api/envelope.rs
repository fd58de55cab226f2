//! Uniform result wrapper returned by every network call

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};

use super::constants::TRANSPORT_FAILURE_STATUS;
use super::error::ApiError;

/// Snapshot of what was sent, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMetadata {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub params: BTreeMap<String, Value>,
}

impl RequestMetadata {
    /// JSON echo of the request, as returned by dry runs
    pub fn to_json(&self) -> Value {
        json!({
            "method": self.method,
            "url": self.url,
            "headers": self.headers,
            "body": self.body,
            "params": self.params,
        })
    }
}

/// Response body in the shape it was read
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    Empty,
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Records of a JSON array payload; empty for anything else
    pub fn as_records(&self) -> &[Value] {
        match self {
            Payload::Json(Value::Array(items)) => items,
            _ => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub payload: Payload,
    pub success: bool,
    pub request_metadata: RequestMetadata,
    pub additional_info: Map<String, Value>,
}

impl ResponseEnvelope {
    pub fn new(status: u16, payload: Payload, success: bool, request_metadata: RequestMetadata) -> Self {
        Self { status, payload, success, request_metadata, additional_info: Map::new() }
    }

    /// Envelope for a call that never produced an HTTP response
    pub fn transport_failure(request_metadata: RequestMetadata, message: impl Into<String>) -> Self {
        let mut envelope = Self::new(
            TRANSPORT_FAILURE_STATUS,
            Payload::Text(message.into()),
            false,
            request_metadata,
        );
        envelope.additional_info.insert("transport_failure".into(), Value::Bool(true));
        envelope
    }

    /// Convert a surfaced error into a failed envelope
    pub fn from_error(error: &ApiError) -> Self {
        let metadata = RequestMetadata {
            method: String::new(),
            url: error.target().to_string(),
            headers: BTreeMap::new(),
            body: None,
            params: BTreeMap::new(),
        };
        let mut envelope = Self::new(error.status(), Payload::Text(error.to_string()), false, metadata);
        envelope
            .additional_info
            .insert("error_kind".into(), Value::String(format!("{:?}", error.kind())));
        envelope
    }

    pub fn with_info(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.additional_info.insert(key.to_string(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Verify the envelope invariants, naming the function that produced it
    pub fn check_contract(&self, function: &str) -> Result<(), ApiError> {
        let violation = |message: String| ApiError::ResultContract { function: function.to_string(), message };

        if self.status != TRANSPORT_FAILURE_STATUS && !(100..=599).contains(&self.status) {
            return Err(violation(format!("status {} is not an HTTP status", self.status)));
        }
        if self.success && !(200..300).contains(&self.status) {
            return Err(violation(format!("marked successful with status {}", self.status)));
        }
        if self.request_metadata.url.is_empty() {
            return Err(violation("request metadata has no url".to_string()));
        }
        Ok(())
    }
}
