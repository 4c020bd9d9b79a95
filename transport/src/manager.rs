//! Session manager: accepts transport channels and serves requests on them.
//!
//! ARCHITECTURE
//! ============
//! ```text
//! Runtime::on_connect ─▶ listen loop ─▶ accept(port)
//!                                        ├─ {prefix}-TRANSPORT-{id} ─▶ Session + session task
//!                                        └─ {prefix}-STREAM-{id}    ─▶ hand port to its offer
//!
//! session task: approval ─▶ select!(scope tripped | port event)
//!                                                    └─ request ─▶ request task ─▶ handler ─▶ reply
//! ```
//!
//! LIFECYCLE
//! =========
//! 1. Accept: the sender must carry an origin, the name must start with our
//!    prefix, the origin must be admitted, and the name must parse. A
//!    connection failing any check is left untouched for other listeners.
//! 2. Approve: an optional async gate. Messages wait in the port queue.
//! 3. Serve: every request runs in its own task under a child of the
//!    session scope, and is tracked by request id until it settles.
//! 4. Teardown: on disconnect, a protocol violation, [`SessionManager::kill_origin`]
//!    or [`SessionManager::shutdown`], the session is deregistered and its
//!    port disconnected under the registry lock, then its scope is tripped.
//!
//! DESIGN
//! ======
//! The registry is a single `std::sync::Mutex`, held for map updates only
//! and never across an await. Request ids are unique among pending requests
//! process-wide; a client reusing a pending id has its session aborted.
//!
//! A pending entry is removed before the reply is posted, so a client that
//! sees its reply can immediately reuse the id. An aborted request loses its
//! entry at once and its eventual reply is dropped.
//!
//! Handlers run on their own task. When a request's scope trips (abort,
//! session end, deadline) the request settles at once, without waiting for a
//! handler that never looks at its token.

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use messages::{
    ChannelLabel, ChannelName, ChannelPrefix, ClientId, TransportError, TransportEvent, TransportFailure,
    TransportMessage, TransportStreamInit,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::config::{self, TransportConfig};
use crate::handler::{Reply, ReplyStream, RequestHandler, SessionApproval};
use crate::host::{Port, PortError, PortEvent, PortEvents, Runtime, SenderInfo};
use crate::origin::{self, OriginKind};
use crate::session::Session;
use crate::stream::{self, PortSink};

// =============================================================================
// TYPES
// =============================================================================

/// Result of [`SessionManager::accept`] for a connection that was not refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// A new session was opened.
    Session(ClientId),
    /// A stream sub-channel was handed to the response waiting for it.
    SubChannel(String),
    /// Not ours; left alone.
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoOrigin,
    ForeignPrefix,
    DisallowedOrigin,
    MalformedName,
    NoOffer,
}

/// Misbehavior that refuses a connection or ends a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("session {0} already exists")]
    SessionCollision(ClientId),
    #[error("request {0} is already pending")]
    RequestCollision(String),
    #[error("sub-channel {0} was opened by a different sender")]
    SenderMismatch(String),
    #[error("port {0} is already being read")]
    PortInUse(String),
}

struct PendingRequest {
    client_id: ClientId,
    serial: u64,
    token: CancellationToken,
}

/// A streamed response waiting for its client to open the sub-channel.
struct Offer {
    sender: SenderInfo,
    claim: oneshot::Sender<Port>,
}

struct SubChannel {
    sender: SenderInfo,
    port: Port,
    token: CancellationToken,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<ClientId, Session>,
    pending: HashMap<String, PendingRequest>,
    offers: HashMap<String, Offer>,
    sub_channels: HashMap<String, SubChannel>,
}

struct Inner<H> {
    runtime_id: String,
    prefix: ChannelPrefix,
    handler: H,
    approval: Option<Arc<dyn SessionApproval>>,
    config: TransportConfig,
    scope: CancellationToken,
    serial: AtomicU64,
    registry: Mutex<Registry>,
}

/// Serves every session opened under one channel prefix.
///
/// Cheap to clone; clones share the registry.
pub struct SessionManager<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for SessionManager<H> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

pub struct SessionManagerBuilder<H> {
    prefix: ChannelPrefix,
    handler: H,
    approval: Option<Arc<dyn SessionApproval>>,
    config: TransportConfig,
}

impl<H: RequestHandler> SessionManagerBuilder<H> {
    #[must_use]
    pub fn approval(mut self, approval: impl SessionApproval) -> Self {
        self.approval = Some(Arc::new(approval));
        self
    }

    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish the manager. `runtime` supplies the id that admits our own
    /// extension's contexts.
    #[must_use]
    pub fn build(self, runtime: &Runtime) -> SessionManager<H> {
        SessionManager {
            inner: Arc::new(Inner {
                runtime_id: runtime.id().to_owned(),
                prefix: self.prefix,
                handler: self.handler,
                approval: self.approval,
                config: self.config,
                scope: CancellationToken::new(),
                serial: AtomicU64::new(0),
                registry: Mutex::new(Registry::default()),
            }),
        }
    }
}

impl<H: RequestHandler> SessionManager<H> {
    #[must_use]
    pub fn builder(prefix: ChannelPrefix, handler: H) -> SessionManagerBuilder<H> {
        SessionManagerBuilder {
            prefix,
            handler,
            approval: None,
            config: TransportConfig::default(),
        }
    }

    // =========================================================================
    // ACCEPT
    // =========================================================================

    /// Subscribe to `runtime` and accept its connections until shutdown.
    pub fn listen(&self, runtime: &Runtime) -> JoinHandle<()> {
        let mut connects = runtime.on_connect();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let port = tokio::select! {
                    () = manager.inner.scope.cancelled() => break,
                    port = connects.recv() => match port {
                        Some(port) => port,
                        None => break,
                    },
                };
                match manager.accept(port) {
                    Ok(_) => {}
                    Err(e @ ProtocolError::SenderMismatch(_)) => warn!(error = %e, "manager: connection refused"),
                    Err(e) => error!(error = %e, "manager: connection refused"),
                }
            }
            debug!(prefix = %manager.inner.prefix, "manager: stopped listening");
        })
    }

    /// Run the acceptance checks on one connection and act on it.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::SessionCollision`] when the client id already has a
    /// session (the existing session is untouched and the new port is left
    /// alone), and [`ProtocolError::SenderMismatch`] when a sub-channel is
    /// opened by anyone but the session it was offered to (the port is
    /// disconnected).
    pub fn accept(&self, port: Port) -> Result<Accepted, ProtocolError> {
        let Some(sender) = port.sender().cloned() else {
            return Ok(ignore(&port, IgnoreReason::NoOrigin));
        };
        let Some(origin) = sender.origin.clone() else {
            return Ok(ignore(&port, IgnoreReason::NoOrigin));
        };
        if !port.name().starts_with(self.inner.prefix.as_str()) {
            return Ok(Accepted::Ignored(IgnoreReason::ForeignPrefix));
        }
        let Some(kind) = origin::classify(&sender, &self.inner.runtime_id) else {
            return Ok(ignore(&port, IgnoreReason::DisallowedOrigin));
        };
        let Some(name) = ChannelName::parse(&self.inner.prefix, port.name()) else {
            return Ok(ignore(&port, IgnoreReason::MalformedName));
        };

        match name.label() {
            ChannelLabel::Transport => self.open_session(port, sender, origin, kind, name.client_id().clone()),
            ChannelLabel::Stream => self.claim_offer(port, &sender),
        }
    }

    fn open_session(
        &self,
        port: Port,
        sender: SenderInfo,
        origin: String,
        kind: OriginKind,
        client_id: ClientId,
    ) -> Result<Accepted, ProtocolError> {
        let mut registry = self.registry();
        if registry.sessions.contains_key(&client_id) {
            return Err(ProtocolError::SessionCollision(client_id));
        }
        let Some(events) = port.events() else {
            return Err(ProtocolError::PortInUse(port.name().to_owned()));
        };
        let token = self.inner.scope.child_token();
        let session = Session::new(client_id.clone(), sender, origin, kind, port, token, self.next_serial());
        registry.sessions.insert(client_id.clone(), session.clone());
        drop(registry);

        info!(%client_id, origin = %session.origin(), kind = ?kind, "manager: session opened");
        tokio::spawn(self.clone().run_session(session, events));
        Ok(Accepted::Session(client_id))
    }

    fn claim_offer(&self, port: Port, sender: &SenderInfo) -> Result<Accepted, ProtocolError> {
        let name = port.name().to_owned();
        let mut registry = self.registry();
        let Some(offer) = registry.offers.remove(&name) else {
            return Ok(ignore(&port, IgnoreReason::NoOffer));
        };
        if !origin::senders_match(&offer.sender, sender) {
            registry.offers.insert(name.clone(), offer);
            drop(registry);
            port.disconnect();
            return Err(ProtocolError::SenderMismatch(name));
        }
        drop(registry);

        if let Err(port) = offer.claim.send(port) {
            port.disconnect();
            return Ok(ignore(&port, IgnoreReason::NoOffer));
        }
        Ok(Accepted::SubChannel(name))
    }

    // =========================================================================
    // SESSION
    // =========================================================================

    async fn run_session(self, session: Session, mut events: PortEvents) {
        let client_id = session.client_id().clone();

        if let Some(approval) = self.inner.approval.clone() {
            let verdict = tokio::select! {
                () = session.token().cancelled() => None,
                verdict = approval.approve(session.sender()) => Some(verdict),
            };
            match verdict {
                Some(Ok(())) => debug!(%client_id, "manager: session approved"),
                Some(Err(e)) => {
                    warn!(%client_id, error = %e, "manager: session rejected");
                    self.end_session(&session);
                    return;
                }
                None => {
                    self.end_session(&session);
                    return;
                }
            }
        }

        loop {
            tokio::select! {
                () = session.token().cancelled() => {
                    debug!(%client_id, "manager: session scope tripped");
                    break;
                }
                event = events.recv() => match event {
                    Some(PortEvent::Message(value)) => {
                        if let Err(e) = self.on_message(&session, value) {
                            error!(%client_id, error = %e, "manager: protocol violation, aborting session");
                            break;
                        }
                    }
                    Some(PortEvent::Disconnect) | None => {
                        debug!(%client_id, "manager: client disconnected");
                        break;
                    }
                },
            }
        }

        self.end_session(&session);
    }

    /// Deregister and disconnect together, then trip the scope.
    fn end_session(&self, session: &Session) {
        let removed = {
            let mut registry = self.registry();
            let ours = registry
                .sessions
                .get(session.client_id())
                .is_some_and(|s| s.serial == session.serial);
            if ours {
                registry.sessions.remove(session.client_id());
            }
            session.port().disconnect();
            ours
        };
        session.abort();
        if removed {
            info!(client_id = %session.client_id(), "manager: session closed");
        }
    }

    fn on_message(&self, session: &Session, value: Value) -> Result<(), ProtocolError> {
        match TransportEvent::classify(value) {
            Ok(TransportEvent::Message(request)) => self.begin_request(session, request),
            Ok(TransportEvent::Abort(abort)) => {
                self.abort_request(session, &abort.request_id);
                Ok(())
            }
            Ok(TransportEvent::StreamInit(init)) => {
                warn!(client_id = %session.client_id(), request_id = %init.request_id, "manager: client streaming is not supported");
                let error = TransportError::unimplemented("client streaming is not supported");
                reply(session, &TransportFailure { request_id: init.request_id, error });
                Ok(())
            }
            Ok(TransportEvent::Failure(failure)) => {
                warn!(client_id = %session.client_id(), request_id = %failure.request_id, "manager: ignoring failure sent by client");
                Ok(())
            }
            Err(unknown) => {
                warn!(client_id = %session.client_id(), item = %unknown, "manager: unknown item in transport");
                Ok(())
            }
        }
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    fn begin_request(&self, session: &Session, request: TransportMessage) -> Result<(), ProtocolError> {
        let TransportMessage { request_id, message } = request;
        let token = session.token().child_token();
        let serial = self.next_serial();
        {
            let mut registry = self.registry();
            if registry.pending.contains_key(&request_id) {
                return Err(ProtocolError::RequestCollision(request_id));
            }
            registry.pending.insert(
                request_id.clone(),
                PendingRequest {
                    client_id: session.client_id().clone(),
                    serial,
                    token: token.clone(),
                },
            );
        }
        debug!(client_id = %session.client_id(), %request_id, "manager: request started");
        tokio::spawn(self.clone().run_request(session.clone(), request_id, serial, message, token));
        Ok(())
    }

    fn abort_request(&self, session: &Session, request_id: &str) {
        let mut registry = self.registry();
        match registry.pending.get(request_id) {
            Some(pending) if pending.client_id == *session.client_id() => {
                if let Some(pending) = registry.pending.remove(request_id) {
                    pending.token.cancel();
                }
                debug!(client_id = %session.client_id(), %request_id, "manager: request aborted");
            }
            Some(_) => {
                warn!(client_id = %session.client_id(), %request_id, "manager: abort for another session's request ignored");
            }
            None => debug!(client_id = %session.client_id(), %request_id, "manager: abort for unknown request"),
        }
    }

    async fn run_request(self, session: Session, request_id: String, serial: u64, message: Value, token: CancellationToken) {
        let deadline = Deadline::arm(&token, self.inner.config.request_timeout);
        let outcome = match serde_json::from_value::<H::Request>(message) {
            Ok(request) => self.call_handler(request, &token).await,
            Err(e) => Err(TransportError::invalid_argument(format!("malformed request: {e}"))),
        };

        if !self.settle(&request_id, serial) {
            debug!(client_id = %session.client_id(), %request_id, "manager: dropping reply to aborted request");
            return;
        }
        let outcome = if deadline.expired() {
            Err(TransportError::deadline_exceeded("request deadline exceeded"))
        } else {
            outcome
        };
        drop(deadline);

        match outcome {
            Ok(Reply::Message(response)) => match serde_json::to_value(response) {
                Ok(message) => reply(&session, &TransportMessage { request_id, message }),
                Err(e) => {
                    let error = TransportError::internal(format!("response could not be serialized: {e}"));
                    reply(&session, &TransportFailure { request_id, error });
                }
            },
            Ok(Reply::Stream(items)) => self.offer_stream(&session, request_id, items, token).await,
            Err(error) => {
                debug!(client_id = %session.client_id(), %request_id, %error, "manager: request failed");
                reply(&session, &TransportFailure { request_id, error });
            }
        }
    }

    /// Run the handler on its own task and stop waiting once `token` trips.
    /// A handler that ignores cancellation keeps running detached; its answer
    /// is discarded.
    async fn call_handler(
        &self,
        request: H::Request,
        token: &CancellationToken,
    ) -> Result<Reply<H::Response>, TransportError> {
        let manager = self.clone();
        let cancel = token.clone();
        let mut handled = tokio::spawn(async move { manager.inner.handler.handle(request, cancel).await });

        tokio::select! {
            biased;
            joined = &mut handled => match joined {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(TransportError::internal("request handler panicked")),
                Err(_) => Err(TransportError::internal("request handler was cancelled")),
            },
            () = token.cancelled() => Err(TransportError::aborted("request canceled")),
        }
    }

    /// Drop the pending entry if it is still this request's. `false` means
    /// the request was aborted meanwhile.
    fn settle(&self, request_id: &str, serial: u64) -> bool {
        let mut registry = self.registry();
        let ours = registry.pending.get(request_id).is_some_and(|p| p.serial == serial);
        if ours {
            registry.pending.remove(request_id);
        }
        ours
    }

    async fn offer_stream(
        &self,
        session: &Session,
        request_id: String,
        items: ReplyStream<H::Response>,
        token: CancellationToken,
    ) {
        let channel = ChannelName::generate(&self.inner.prefix, ChannelLabel::Stream).to_string();
        let (claim, mut claimed) = oneshot::channel();
        self.registry().offers.insert(
            channel.clone(),
            Offer { sender: session.sender().clone(), claim },
        );
        reply(session, &TransportStreamInit { request_id: request_id.clone(), channel: channel.clone() });

        let port = tokio::select! {
            biased;
            port = &mut claimed => port.ok(),
            () = token.cancelled() => None,
            () = config::expire(self.inner.config.offer_timeout) => None,
        };
        self.registry().offers.remove(&channel);
        let Some(port) = port else {
            if let Ok(late) = claimed.try_recv() {
                late.disconnect();
            }
            debug!(%request_id, %channel, "manager: stream offer lapsed");
            return;
        };

        self.registry().sub_channels.insert(
            channel.clone(),
            SubChannel {
                sender: session.sender().clone(),
                port: port.clone(),
                token: token.clone(),
            },
        );
        let sink = PortSink::new(port, self.inner.config.idle_timeout);
        let outcome = stream::pipe(items, sink, token).await;
        self.registry().sub_channels.remove(&channel);
        debug!(%request_id, %channel, ?outcome, "manager: stream finished");
    }

    // =========================================================================
    // ADMINISTRATION
    // =========================================================================

    /// End every session, sub-channel and stream offer belonging to `origin`.
    /// Returns the senders that were cut off.
    pub fn kill_origin(&self, origin: &str) -> Vec<SenderInfo> {
        let mut killed = Vec::new();
        let mut registry = self.registry();

        let doomed: Vec<ClientId> = registry
            .sessions
            .values()
            .filter(|s| s.origin() == origin)
            .map(|s| s.client_id().clone())
            .collect();
        for client_id in doomed {
            if let Some(session) = registry.sessions.remove(&client_id) {
                session.port().disconnect();
                session.abort();
                info!(%client_id, %origin, "manager: session killed");
                killed.push(session.sender().clone());
            }
        }

        let lingering: Vec<String> = registry
            .sub_channels
            .iter()
            .filter(|(_, sub)| sub.sender.origin.as_deref() == Some(origin) && !sub.token.is_cancelled())
            .map(|(name, _)| name.clone())
            .collect();
        for channel in lingering {
            if let Some(sub) = registry.sub_channels.remove(&channel) {
                warn!(%channel, %origin, "manager: sub-channel outlived its session");
                sub.port.disconnect();
                sub.token.cancel();
                killed.push(sub.sender);
            }
        }

        registry
            .offers
            .retain(|_, offer| offer.sender.origin.as_deref() != Some(origin));
        killed
    }

    /// Stop listening and end every session.
    pub fn shutdown(&self) {
        self.inner.scope.cancel();
        let closed = {
            let mut registry = self.registry();
            registry.offers.clear();
            let sessions: Vec<Session> = registry.sessions.drain().map(|(_, s)| s).collect();
            for session in &sessions {
                session.port().disconnect();
            }
            sessions.len()
        };
        info!(sessions = closed, "manager: shut down");
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    #[must_use]
    pub fn session(&self, client_id: &ClientId) -> Option<Session> {
        self.registry().sessions.get(client_id).cloned()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry().sessions.len()
    }

    #[must_use]
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.registry().pending.contains_key(request_id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry().pending.len()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_serial(&self) -> u64 {
        self.inner.serial.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn ignore(port: &Port, reason: IgnoreReason) -> Accepted {
    debug!(port = %port.name(), ?reason, "manager: ignoring connection");
    Accepted::Ignored(reason)
}

fn reply<T: Serialize>(session: &Session, envelope: &T) {
    match session.port().post(envelope) {
        Ok(()) => {}
        Err(PortError::Disconnected) => {
            debug!(client_id = %session.client_id(), "manager: reply dropped, session is gone");
        }
        Err(e) => error!(client_id = %session.client_id(), error = %e, "manager: reply could not be sent"),
    }
}

/// Trips a request's scope once its time limit passes. Disarmed on drop.
struct Deadline {
    expired: Arc<AtomicBool>,
    _disarm: Option<DropGuard>,
}

impl Deadline {
    fn arm(token: &CancellationToken, limit: Option<Duration>) -> Self {
        let expired = Arc::new(AtomicBool::new(false));
        let Some(limit) = limit else {
            return Self { expired, _disarm: None };
        };

        let disarm = CancellationToken::new();
        let (token, flag, disarmed) = (token.clone(), Arc::clone(&expired), disarm.clone());
        tokio::spawn(async move {
            tokio::select! {
                () = disarmed.cancelled() => {}
                () = token.cancelled() => {}
                () = tokio::time::sleep(limit) => {
                    flag.store(true, Ordering::Release);
                    token.cancel();
                }
            }
        });
        Self { expired, _disarm: Some(disarm.drop_guard()) }
    }

    fn expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}
