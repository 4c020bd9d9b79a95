//! Client side of a session: issues requests and matches replies.
//!
//! DESIGN
//! ======
//! One transport port per client. A reader task owns the port's events and
//! settles the pending request named by each reply's `requestId`. A reply
//! naming a sub-channel is opened from the calling task; a caller that gives
//! up before reading it never opens the channel and the manager's offer
//! lapses.
//!
//! When the transport disconnects every pending request settles with
//! `aborted`, and later requests fail at send.

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use messages::{
    ChannelLabel, ChannelName, ChannelPrefix, ClientId, TransportAbort, TransportError, TransportEvent,
    TransportMessage,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{self, TransportConfig};
use crate::host::{Port, PortError, PortEvent, PortEvents, Runtime, SenderInfo};
use crate::stream::PortStream;

/// Successful answer to a request.
#[derive(Debug)]
pub enum ClientResponse {
    Message(Value),
    Stream(PortStream),
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

enum Settled {
    Message(Value),
    Channel(String),
}

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Settled, TransportError>>>>>;

pub struct SessionClient {
    runtime: Runtime,
    sender: SenderInfo,
    client_id: ClientId,
    port: Port,
    config: TransportConfig,
    pending: Pending,
    reader: JoinHandle<()>,
}

impl SessionClient {
    /// Open a session channel under `prefix` on behalf of `sender`.
    ///
    /// # Errors
    ///
    /// [`PortError::Disconnected`] when the new port's events cannot be taken.
    pub fn connect(
        runtime: &Runtime,
        prefix: &ChannelPrefix,
        sender: SenderInfo,
        config: TransportConfig,
    ) -> Result<Self, ClientError> {
        let name = ChannelName::generate(prefix, ChannelLabel::Transport);
        let port = runtime.connect(name.as_str(), sender.clone());
        let events = port.events().ok_or(PortError::Disconnected)?;
        let pending = Pending::default();
        let reader = tokio::spawn(read_replies(events, Arc::clone(&pending), name.client_id().clone()));
        debug!(client_id = %name.client_id(), "client: connected");

        Ok(Self {
            runtime: runtime.clone(),
            sender,
            client_id: name.client_id().clone(),
            port,
            config,
            pending,
            reader,
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.port.is_disconnected()
    }

    /// Send one request and wait for its answer.
    ///
    /// # Errors
    ///
    /// See [`SessionClient::request_with_cancel`].
    pub async fn request<T: Serialize + ?Sized>(&self, message: &T) -> Result<ClientResponse, ClientError> {
        self.request_with_cancel(message, CancellationToken::new()).await
    }

    /// Send one request; tripping `cancel` aborts it on the manager.
    ///
    /// # Errors
    ///
    /// [`ClientError::Port`] when the message cannot be serialized or the
    /// session is gone, and [`ClientError::Transport`] carrying the manager's
    /// error, `aborted` on cancellation or disconnect, or `deadline_exceeded`
    /// past the configured request timeout.
    pub async fn request_with_cancel<T: Serialize + ?Sized>(
        &self,
        message: &T,
        cancel: CancellationToken,
    ) -> Result<ClientResponse, ClientError> {
        let request_id = Uuid::new_v4().to_string();
        let message = serde_json::to_value(message).map_err(PortError::from)?;
        let (settle, settled) = oneshot::channel();
        self.pending().insert(request_id.clone(), settle);

        if let Err(e) = self.port.post(&TransportMessage { request_id: request_id.clone(), message }) {
            self.pending().remove(&request_id);
            return Err(e.into());
        }

        let mut in_flight = InFlight { client: self, request_id: &request_id, settled: false };
        let outcome = tokio::select! {
            outcome = settled => {
                in_flight.settled = true;
                outcome.unwrap_or_else(|_| Err(TransportError::aborted("transport disconnected")))
            }
            () = cancel.cancelled() => Err(TransportError::aborted("request canceled")),
            () = config::expire(self.config.request_timeout) => {
                Err(TransportError::deadline_exceeded("request timed out"))
            }
        };
        drop(in_flight);

        match outcome? {
            Settled::Message(value) => Ok(ClientResponse::Message(value)),
            Settled::Channel(channel) => {
                let port = self.runtime.connect(channel, self.sender.clone());
                Ok(ClientResponse::Stream(PortStream::new(port, self.config.idle_timeout)))
            }
        }
    }

    /// Close the session. Pending requests settle with `aborted`.
    pub fn disconnect(&self) {
        self.port.disconnect();
        fail_all(&self.pending, "transport disconnected");
    }

    fn abort(&self, request_id: &str) {
        self.pending().remove(request_id);
        if let Err(e) = self.port.post(&TransportAbort::new(request_id)) {
            debug!(client_id = %self.client_id, %request_id, error = %e, "client: abort not delivered");
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Result<Settled, TransportError>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Aborts its request unless a reply settled it first. Covers a caller
/// that drops the request future mid-flight.
struct InFlight<'a> {
    client: &'a SessionClient,
    request_id: &'a str,
    settled: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.client.abort(self.request_id);
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.port.disconnect();
    }
}

async fn read_replies(mut events: PortEvents, pending: Pending, client_id: ClientId) {
    loop {
        let value = match events.recv().await {
            Some(PortEvent::Message(value)) => value,
            Some(PortEvent::Disconnect) | None => break,
        };
        let (request_id, outcome) = match TransportEvent::classify(value) {
            Ok(TransportEvent::Message(m)) => (m.request_id, Ok(Settled::Message(m.message))),
            Ok(TransportEvent::Failure(f)) => (f.request_id, Err(f.error)),
            Ok(TransportEvent::StreamInit(s)) => (s.request_id, Ok(Settled::Channel(s.channel))),
            Ok(TransportEvent::Abort(a)) => {
                warn!(%client_id, request_id = %a.request_id, "client: ignoring abort sent by manager");
                continue;
            }
            Err(unknown) => {
                warn!(%client_id, item = %unknown, "client: unknown item in transport");
                continue;
            }
        };
        let settle = pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&request_id);
        match settle {
            Some(settle) => {
                let _ = settle.send(outcome);
            }
            None => debug!(%client_id, %request_id, "client: reply for unknown request"),
        }
    }
    debug!(%client_id, "client: transport disconnected");
    fail_all(&pending, "transport disconnected");
}

fn fail_all(pending: &Pending, reason: &str) {
    let drained: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .map(|(_, settle)| settle)
        .collect();
    for settle in drained {
        let _ = settle.send(Err(TransportError::aborted(reason)));
    }
}
