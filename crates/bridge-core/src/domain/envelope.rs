//! Wire envelopes exchanged over the queue.
//!
//! JSON with camelCase keys:
//!
//! ```text
//! request: {"requestId": "...", "operation": "/invoice.post", "payload": {...}, "replyTo": "..."?}
//! reply:   {"requestId": "...", "operation": "/invoice.post", "body": {...}}
//! ```
//!
//! A reply also accepts `payload` in place of `body`, so a request envelope
//! echoed back on a single shared queue decodes as its own reply. When both
//! keys are present a non-null `body` wins.

use crate::domain::correlation::RequestId;
use crate::domain::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the transport surfaced about an inbound call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPayload {
    pub method: String,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

impl RequestPayload {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Outbound message: one per bridged request, never mutated after publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: RequestId,
    pub operation: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl RequestEnvelope {
    pub fn new(request_id: RequestId, operation: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            request_id,
            operation: operation.into(),
            payload,
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, queue: Option<String>) -> Self {
        self.reply_to = queue;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Inbound message matched back to a pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "ReplyWire")]
pub struct ReplyEnvelope {
    pub request_id: RequestId,
    pub operation: String,
    pub body: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyWire {
    request_id: RequestId,
    operation: String,
    #[serde(default)]
    body: Option<serde_json::Value>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl From<ReplyWire> for ReplyEnvelope {
    fn from(wire: ReplyWire) -> Self {
        Self {
            request_id: wire.request_id,
            operation: wire.operation,
            body: wire.body.or(wire.payload).unwrap_or_default(),
        }
    }
}

impl ReplyEnvelope {
    pub fn new(request_id: RequestId, operation: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            request_id,
            operation: operation.into(),
            body,
        }
    }

    /// Decode a raw queue message.
    pub fn decode(bytes: &[u8]) -> Result<Self, BridgeError> {
        serde_json::from_slice(bytes).map_err(|e| BridgeError::DecodeFailure(e.to_string()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
