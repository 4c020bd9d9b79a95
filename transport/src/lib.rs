//! Multiplexed request/response and streaming over host ports.
//!
//! A [`SessionManager`] listens on a [`Runtime`] for channels named
//! `{prefix}-TRANSPORT-{client_id}`, turns each admitted one into a
//! [`Session`], and answers the requests arriving on it through a
//! [`RequestHandler`]. Streamed responses travel on dedicated
//! `{prefix}-STREAM-{id}` sub-channels. [`SessionClient`] is the other end.
//!
//! Wire shapes live in the `messages` crate and are re-exported here.

pub mod client;
pub mod config;
pub mod handler;
pub mod host;
pub mod manager;
pub mod origin;
pub mod session;
pub mod stream;

pub use client::{ClientError, ClientResponse, SessionClient};
pub use config::TransportConfig;
pub use handler::{Reply, ReplyStream, RequestHandler, SessionApproval};
pub use host::{Port, PortError, PortEvent, Runtime, SenderInfo};
pub use manager::{Accepted, IgnoreReason, ProtocolError, SessionManager};
pub use messages::{ChannelLabel, ChannelName, ChannelPrefix, ClientId, Code, ErrorCode, TransportError};
pub use session::Session;
pub use stream::{PortSink, PortStream};
