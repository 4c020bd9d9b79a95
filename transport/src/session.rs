//! One connected client as the manager sees it.

use messages::ClientId;
use tokio_util::sync::CancellationToken;

use crate::host::{Port, SenderInfo};
use crate::origin::OriginKind;

/// A live session: the client's transport port plus the cancellation scope
/// every request on it runs under.
///
/// Clones are handles on the same session. Tripping the scope with
/// [`Session::abort`] cancels every pending request of the session, and the
/// manager then deregisters it and disconnects its port.
#[derive(Debug, Clone)]
pub struct Session {
    client_id: ClientId,
    sender: SenderInfo,
    origin: String,
    kind: OriginKind,
    port: Port,
    token: CancellationToken,
    /// Distinguishes this session from a later one reusing the client id.
    pub(crate) serial: u64,
}

impl Session {
    pub(crate) fn new(
        client_id: ClientId,
        sender: SenderInfo,
        origin: String,
        kind: OriginKind,
        port: Port,
        token: CancellationToken,
        serial: u64,
    ) -> Self {
        Self { client_id, sender, origin, kind, port, token, serial }
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    #[must_use]
    pub fn sender(&self) -> &SenderInfo {
        &self.sender
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn origin_kind(&self) -> OriginKind {
        self.kind
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trip the session scope.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub(crate) fn port(&self) -> &Port {
        &self.port
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}
