//! Producing end of a stream sub-channel.

#[cfg(test)]
#[path = "sink_test.rs"]
mod tests;

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use messages::{StreamControl, TransportError};
use serde::Serialize;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::host::{Port, PortError, PortEvent, PortEvents};

/// Writes `{value}` items to a sub-channel and ends it with `{done}` or
/// `{abort}`.
///
/// The final message is best effort: if the consumer is already gone it is
/// dropped, and the port is disconnected either way.
#[derive(Debug)]
pub struct PortSink {
    port: Port,
    events: Option<PortEvents>,
    idle_timeout: Option<Duration>,
    idle: Option<Pin<Box<Sleep>>>,
}

/// Why [`PortSink::interrupted`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    ConsumerGone,
    IdleTimeout,
}

impl PortSink {
    /// Wrap `port`. The idle timer starts now and restarts on every write.
    #[must_use]
    pub fn new(port: Port, idle_timeout: Option<Duration>) -> Self {
        let events = port.events();
        let idle = idle_timeout.map(|timeout| Box::pin(tokio::time::sleep(timeout)));
        Self { port, events, idle_timeout, idle }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Send one item.
    ///
    /// # Errors
    ///
    /// [`PortError::Serialize`] when `item` has no JSON form, and
    /// [`PortError::Disconnected`] once the consumer has gone away.
    pub fn write<T: Serialize + ?Sized>(&mut self, item: &T) -> Result<(), PortError> {
        let value = serde_json::to_value(item)?;
        self.port.post(&StreamControl::Value(value))?;
        if let (Some(idle), Some(timeout)) = (self.idle.as_mut(), self.idle_timeout) {
            idle.as_mut().reset(Instant::now() + timeout);
        }
        Ok(())
    }

    /// End the stream successfully.
    pub fn close(self) {
        self.finish(&StreamControl::End);
    }

    /// End the stream with `reason`.
    pub fn abort(self, reason: TransportError) {
        self.finish(&StreamControl::Abort(reason));
    }

    fn finish(self, control: &StreamControl) {
        if let Err(e) = self.port.post(control) {
            trace!(port = %self.port.name(), error = %e, "stream: final message not delivered");
        }
        self.port.disconnect();
    }

    /// Resolves when the consumer disconnects or the idle timer fires.
    async fn interrupted(&mut self) -> Interrupt {
        let Self { port, events, idle, .. } = self;
        let idle = async {
            match idle.as_mut() {
                Some(sleep) => sleep.as_mut().await,
                None => std::future::pending().await,
            }
        };
        let gone = async {
            let Some(events) = events.as_mut() else {
                return std::future::pending().await;
            };
            loop {
                match events.recv().await {
                    Some(PortEvent::Message(_)) => {
                        trace!(port = %port.name(), "stream: ignoring message sent to sink");
                    }
                    Some(PortEvent::Disconnect) | None => return,
                }
            }
        };
        tokio::select! {
            () = idle => Interrupt::IdleTimeout,
            () = gone => Interrupt::ConsumerGone,
        }
    }
}

// =============================================================================
// PIPE
// =============================================================================

/// How a [`pipe`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipeOutcome {
    /// The producer finished and `{done}` was sent.
    Completed,
    /// The producer failed, or the sink did; `{abort}` was sent.
    Failed(TransportError),
    /// The consumer disconnected first. The producer is dropped unpolled.
    ConsumerGone,
}

/// Drive `stream` into `sink` until one side ends.
///
/// Cancellation of `cancel` aborts with `aborted`, and a producer silent
/// for longer than the sink's idle timeout aborts with `deadline_exceeded`.
/// An item that cannot be serialized aborts with `internal`.
pub async fn pipe<S, T>(mut stream: S, mut sink: PortSink, cancel: CancellationToken) -> PipeOutcome
where
    S: Stream<Item = Result<T, TransportError>> + Unpin,
    T: Serialize,
{
    let failure = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break TransportError::aborted("stream canceled"),
            interrupt = sink.interrupted() => match interrupt {
                Interrupt::ConsumerGone => {
                    debug!(port = %sink.name(), "stream: consumer went away");
                    sink.port.disconnect();
                    return PipeOutcome::ConsumerGone;
                }
                Interrupt::IdleTimeout => break TransportError::deadline_exceeded("sink timeout"),
            },
            item = stream.next() => match item {
                Some(Ok(item)) => match sink.write(&item) {
                    Ok(()) => {}
                    Err(PortError::Disconnected) => return PipeOutcome::ConsumerGone,
                    Err(PortError::Serialize(e)) => {
                        break TransportError::internal(format!("stream item could not be serialized: {e}"));
                    }
                },
                Some(Err(error)) => break error,
                None => {
                    sink.close();
                    return PipeOutcome::Completed;
                }
            },
        }
    };
    debug!(port = %sink.name(), error = %failure, "stream: aborting sink");
    sink.abort(failure.clone());
    PipeOutcome::Failed(failure)
}
