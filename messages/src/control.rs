//! Control messages on a stream sub-channel.
//!
//! A sub-channel carries zero or more `{value}` items followed by at most one
//! terminal message: `{done: true}` on success or `{abort: <error>}` on
//! failure. Anything else on a sub-channel is a protocol violation.

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamControl {
    Value(Value),
    End,
    Abort(TransportError),
}

impl StreamControl {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Value(_))
    }

    /// Classify an inbound sub-channel value.
    ///
    /// # Errors
    ///
    /// Hands the value back untouched when it matches no control shape.
    pub fn classify(value: Value) -> Result<Self, Value> {
        let Value::Object(mut fields) = value else {
            return Err(value);
        };
        if let Some(item) = fields.remove("value") {
            return Ok(Self::Value(item));
        }
        if fields.get("done") == Some(&Value::Bool(true)) {
            return Ok(Self::End);
        }
        if let Some(reason) = fields.remove("abort") {
            let error = TransportError::from_json(reason, TransportError::aborted("stream aborted"));
            return Ok(Self::Abort(error));
        }
        Err(Value::Object(fields))
    }
}

impl Serialize for StreamControl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::Value(item) => map.serialize_entry("value", item)?,
            Self::End => map.serialize_entry("done", &true)?,
            Self::Abort(error) => map.serialize_entry("abort", error)?,
        }
        map.end()
    }
}
