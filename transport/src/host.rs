//! In-process host substrate: named channels between two ends.
//!
//! DESIGN
//! ======
//! Models the extension runtime's port API. A [`Runtime`] hands out channels
//! by name; every listener registered with [`Runtime::on_connect`] receives
//! the far end of every channel opened in the process and decides for itself
//! whether the name is one it serves.
//!
//! Both ends of a channel share one `Link`: two unbounded event queues and a
//! disconnected flag. Posting serializes with `serde_json::to_value`, which
//! is this host's structured-clone rule: `NaN` degrades to `null`, bytes to
//! an array of numbers, `()` to `null`, and a value JSON cannot represent
//! (`u128::MAX`, a map with non-string keys) fails at the call site without
//! reaching the peer.
//!
//! Disconnect is explicit. Dropping a handle never disconnects, so a channel
//! nobody answers simply hangs until one side calls [`Port::disconnect`].
//! A disconnect delivers [`PortEvent::Disconnect`] to the peer only.

#[cfg(test)]
#[path = "host_test.rs"]
mod tests;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

// =============================================================================
// TYPES
// =============================================================================

/// Identity of the context that opened a channel, as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    /// Extension id of the sender, when it is an extension context.
    pub id: Option<String>,
    pub origin: Option<String>,
    pub url: Option<String>,
    pub tab_id: Option<i32>,
    /// `0` (or absent) for a top-level frame.
    pub frame_id: Option<i32>,
}

impl SenderInfo {
    /// A context belonging to the extension with `id`.
    #[must_use]
    pub fn extension(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            origin: Some(format!("chrome-extension://{id}")),
            id: Some(id),
            ..Self::default()
        }
    }

    /// The top-level frame of a page in tab `tab_id`.
    #[must_use]
    pub fn tab(origin: impl Into<String>, tab_id: i32) -> Self {
        let origin = origin.into();
        Self {
            url: Some(format!("{origin}/")),
            origin: Some(origin),
            tab_id: Some(tab_id),
            frame_id: Some(0),
            ..Self::default()
        }
    }
}

/// Something that happened on the far end of a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PortEvent {
    Message(Value),
    Disconnect,
}

/// Error returned by [`Port::post`].
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("attempting to use a disconnected port")]
    Disconnected,
    #[error("message could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// PORT
// =============================================================================

struct Link {
    disconnected: AtomicBool,
    /// Indexed by side: `queues[s]` delivers to the end on side `s`.
    queues: [mpsc::UnboundedSender<PortEvent>; 2],
}

struct End {
    name: String,
    side: usize,
    sender: Option<SenderInfo>,
    link: Arc<Link>,
    events: Mutex<Option<mpsc::UnboundedReceiver<PortEvent>>>,
}

/// One end of a named channel. Clones are handles on the same end.
#[derive(Clone)]
pub struct Port {
    end: Arc<End>,
}

impl Port {
    /// Build both ends of a channel. Only the accepting end (`.1`) reports
    /// a sender, since only it learns who connected.
    fn pair(name: &str, sender: SenderInfo) -> (Self, Self) {
        let (tx0, rx0) = mpsc::unbounded_channel();
        let (tx1, rx1) = mpsc::unbounded_channel();
        let link = Arc::new(Link {
            disconnected: AtomicBool::new(false),
            queues: [tx0, tx1],
        });
        let end = |side, sender, rx| Self {
            end: Arc::new(End {
                name: name.to_owned(),
                side,
                sender,
                link: Arc::clone(&link),
                events: Mutex::new(Some(rx)),
            }),
        };
        (end(0, None, rx0), end(1, Some(sender), rx1))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.end.name
    }

    /// Who opened the channel. `None` on the opening end itself.
    #[must_use]
    pub fn sender(&self) -> Option<&SenderInfo> {
        self.end.sender.as_ref()
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.end.link.disconnected.load(Ordering::Acquire)
    }

    /// Deliver one message to the peer.
    ///
    /// # Errors
    ///
    /// [`PortError::Disconnected`] once either end has disconnected, and
    /// [`PortError::Serialize`] when `message` has no JSON form. In both
    /// cases the peer receives nothing.
    pub fn post<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), PortError> {
        if self.is_disconnected() {
            return Err(PortError::Disconnected);
        }
        let value = serde_json::to_value(message)?;
        self.peer_queue()
            .send(PortEvent::Message(value))
            .map_err(|_| PortError::Disconnected)
    }

    /// Close the channel. Idempotent; the peer observes exactly one
    /// [`PortEvent::Disconnect`] and this end observes none.
    pub fn disconnect(&self) {
        if self.end.link.disconnected.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(port = %self.end.name, "host: port disconnected");
        let _ = self.peer_queue().send(PortEvent::Disconnect);
    }

    /// Take this end's event stream. Returns `None` after the first call.
    #[must_use]
    pub fn events(&self) -> Option<PortEvents> {
        self.end
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|rx| PortEvents { rx })
    }

    fn peer_queue(&self) -> &mpsc::UnboundedSender<PortEvent> {
        &self.end.link.queues[1 - self.end.side]
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.end.name)
            .field("sender", &self.end.sender)
            .field("disconnected", &self.is_disconnected())
            .finish_non_exhaustive()
    }
}

/// Events arriving at one end, in the order the peer produced them.
#[derive(Debug)]
pub struct PortEvents {
    rx: mpsc::UnboundedReceiver<PortEvent>,
}

impl PortEvents {
    /// Next event. After a [`PortEvent::Disconnect`] nothing else arrives and
    /// the call waits forever, so callers stop at the first disconnect.
    pub async fn recv(&mut self) -> Option<PortEvent> {
        self.rx.recv().await
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<PortEvent>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// RUNTIME
// =============================================================================

struct RuntimeInner {
    id: String,
    listeners: Mutex<Vec<mpsc::UnboundedSender<Port>>>,
}

/// Process-wide channel broker. Clones share the same listeners.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                id: id.into(),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// This runtime's own extension id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Register for the accepting end of every channel opened from now on.
    #[must_use]
    pub fn on_connect(&self) -> ConnectEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners().push(tx);
        ConnectEvents { rx }
    }

    /// Open a channel named `name` on behalf of `sender`.
    ///
    /// When no listener is registered the returned port is disconnected at
    /// once, so its first event is [`PortEvent::Disconnect`].
    pub fn connect(&self, name: impl Into<String>, sender: SenderInfo) -> Port {
        let name = name.into();
        let (local, remote) = Port::pair(&name, sender);
        let mut listeners = self.listeners();
        listeners.retain(|listener| listener.send(remote.clone()).is_ok());
        if listeners.is_empty() {
            debug!(port = %name, "host: no listener for connection");
            remote.disconnect();
        }
        local
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Port>>> {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime").field("id", &self.inner.id).finish_non_exhaustive()
    }
}

/// Connections announced to one listener.
#[derive(Debug)]
pub struct ConnectEvents {
    rx: mpsc::UnboundedReceiver<Port>,
}

impl ConnectEvents {
    pub async fn recv(&mut self) -> Option<Port> {
        self.rx.recv().await
    }
}
