//! Envelopes exchanged on a session's transport channel.
//!
//! Every envelope carries a client-chosen `requestId`. The kinds are told
//! apart by field shape, never by a tag:
//!
//! | shape                         | kind         | direction          |
//! |-------------------------------|--------------|--------------------|
//! | `{requestId, abort: true}`    | abort        | client to manager  |
//! | `{requestId, channel}`        | stream init  | manager to client  |
//! | `{requestId, error}`          | failure      | manager to client  |
//! | `{requestId, message}`        | message      | both               |
//!
//! Inbound values are classified once at the boundary with
//! [`TransportEvent::classify`]; nothing downstream looks at raw JSON.

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Unary request or response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportMessage {
    pub request_id: String,
    pub message: Value,
}

/// Failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportFailure {
    pub request_id: String,
    pub error: TransportError,
}

/// Cancellation of an in-flight request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportAbort {
    pub request_id: String,
    pub abort: bool,
}

impl TransportAbort {
    #[must_use]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), abort: true }
    }
}

/// Names the sub-channel a streamed response will be delivered on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStreamInit {
    pub request_id: String,
    pub channel: String,
}

/// Any envelope a transport channel can carry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TransportEvent {
    Abort(TransportAbort),
    StreamInit(TransportStreamInit),
    Failure(TransportFailure),
    Message(TransportMessage),
}

impl TransportEvent {
    /// Classify an inbound value by its fields.
    ///
    /// # Errors
    ///
    /// Hands the value back untouched when it is not an object with a string
    /// `requestId` and one of the recognized companion fields.
    pub fn classify(value: Value) -> Result<Self, Value> {
        let Value::Object(mut fields) = value else {
            return Err(value);
        };
        let Some(request_id) = fields.get("requestId").and_then(Value::as_str).map(str::to_owned) else {
            return Err(Value::Object(fields));
        };

        if fields.get("abort") == Some(&Value::Bool(true)) {
            return Ok(Self::Abort(TransportAbort::new(request_id)));
        }
        if let Some(channel) = fields.get("channel").and_then(Value::as_str) {
            let channel = channel.to_owned();
            return Ok(Self::StreamInit(TransportStreamInit { request_id, channel }));
        }
        if let Some(error) = fields.remove("error") {
            let error = TransportError::from_json(error, TransportError::internal("malformed error envelope"));
            return Ok(Self::Failure(TransportFailure { request_id, error }));
        }
        if let Some(message) = fields.remove("message") {
            return Ok(Self::Message(TransportMessage { request_id, message }));
        }
        Err(Value::Object(fields))
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Abort(e) => &e.request_id,
            Self::StreamInit(e) => &e.request_id,
            Self::Failure(e) => &e.request_id,
            Self::Message(e) => &e.request_id,
        }
    }
}
