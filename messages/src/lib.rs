//! Shared wire model for the multiplexed port transport.
//!
//! This crate owns every shape that crosses a port: channel names, the
//! envelopes exchanged on a session channel, the control messages carried
//! on a stream sub-channel, and the serialized error. Both the session
//! manager and the session client depend on it, so the two ends agree on
//! the JSON without sharing any runtime code.
//!
//! Payloads stay flexible (`serde_json::Value`); typed request and response
//! bodies are decoded at the handler seam, not here.

mod control;
mod envelope;
mod error;
mod name;

pub use control::StreamControl;
pub use envelope::{TransportAbort, TransportEvent, TransportFailure, TransportMessage, TransportStreamInit};
pub use error::{Code, ErrorCode, TransportError};
pub use name::{ChannelLabel, ChannelName, ChannelPrefix, ClientId, NameError};
