//! Streams over a dedicated sub-channel.
//!
//! ARCHITECTURE
//! ============
//! A streamed response travels on its own port, separate from the session's
//! transport channel. The producing side wraps that port in a [`PortSink`]
//! and drives it with [`pipe`]; the consuming side wraps its end in a
//! [`PortStream`], which implements `futures::Stream`.
//!
//! ```text
//! handler stream ──pipe──▶ PortSink ══ {value}* ({done} | {abort}) ══▶ PortStream ──▶ consumer
//! ```
//!
//! Either side ends the sub-channel by disconnecting it. The consumer
//! dropping its `PortStream` before the end is how cancellation reaches the
//! producer, and the producer failing is delivered as an `{abort}` item.
//!
//! TRADE-OFFS
//! ==========
//! The host queue is unbounded, so a fast producer can run ahead of a slow
//! consumer. Items are small JSON values and streams are request-scoped, so
//! no credit-based flow control is layered on top.

mod sink;
mod source;

pub use sink::{PipeOutcome, PortSink, pipe};
pub use source::PortStream;
