//! Consuming end of a stream sub-channel.

#[cfg(test)]
#[path = "source_test.rs"]
mod tests;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use messages::{StreamControl, TransportError};
use serde_json::Value;
use tokio::time::{Instant, Sleep};
use tracing::debug;

use crate::host::{Port, PortEvent, PortEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Receiving,
    Closed,
    Errored,
}

/// Yields the values a remote [`PortSink`](super::PortSink) writes, then ends
/// on `{done}` or fails on `{abort}`, disconnect, or silence.
///
/// Events that arrive before the first poll are queued by the host and
/// delivered in order once polling starts. The idle timer also starts at
/// the first poll and restarts on every value.
///
/// Dropping the stream before it finishes disconnects the sub-channel, which
/// the producing side sees as the consumer going away.
#[derive(Debug)]
pub struct PortStream {
    port: Port,
    events: Option<PortEvents>,
    idle_timeout: Option<Duration>,
    idle: Option<Pin<Box<Sleep>>>,
    state: State,
}

impl PortStream {
    #[must_use]
    pub fn new(port: Port, idle_timeout: Option<Duration>) -> Self {
        let events = port.events();
        Self {
            port,
            events,
            idle_timeout,
            idle: None,
            state: State::Receiving,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.port.name()
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.port.is_disconnected()
    }

    fn finish(&mut self, state: State) {
        self.state = state;
        self.idle = None;
        self.port.disconnect();
    }

    fn fail(&mut self, error: TransportError) -> Poll<Option<Result<Value, TransportError>>> {
        debug!(port = %self.port.name(), %error, "stream: source failed");
        self.finish(State::Errored);
        Poll::Ready(Some(Err(error)))
    }

    fn on_message(&mut self, item: Value) -> Poll<Option<Result<Value, TransportError>>> {
        match StreamControl::classify(item) {
            Ok(StreamControl::Value(value)) => {
                if let (Some(idle), Some(timeout)) = (self.idle.as_mut(), self.idle_timeout) {
                    idle.as_mut().reset(Instant::now() + timeout);
                }
                Poll::Ready(Some(Ok(value)))
            }
            Ok(StreamControl::End) => {
                self.finish(State::Closed);
                Poll::Ready(None)
            }
            Ok(StreamControl::Abort(error)) => self.fail(error),
            Err(unknown) => self.fail(TransportError::internal("unexpected item in stream").with_detail(unknown)),
        }
    }
}

impl Stream for PortStream {
    type Item = Result<Value, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state != State::Receiving {
            return Poll::Ready(None);
        }
        if this.idle.is_none() {
            this.idle = this.idle_timeout.map(|timeout| Box::pin(tokio::time::sleep(timeout)));
        }

        let Some(events) = this.events.as_mut() else {
            return this.fail(TransportError::internal("stream port is already being read"));
        };
        match events.poll_recv(cx) {
            Poll::Ready(Some(PortEvent::Message(item))) => return this.on_message(item),
            Poll::Ready(Some(PortEvent::Disconnect) | None) => {
                return this.fail(TransportError::aborted("source disconnected"));
            }
            Poll::Pending => {}
        }

        if let Some(idle) = this.idle.as_mut() {
            if idle.as_mut().poll(cx).is_ready() {
                return this.fail(TransportError::deadline_exceeded("source timeout"));
            }
        }
        Poll::Pending
    }
}

impl Drop for PortStream {
    fn drop(&mut self) {
        if self.state == State::Receiving {
            debug!(port = %self.port.name(), "stream: consumer dropped source");
            self.port.disconnect();
        }
    }
}
