//! Channel naming.
//!
//! DESIGN
//! ======
//! A channel name is `{prefix}-{label}-{client_id}`. The host announces every
//! connection in the process to every listener, so most names a listener
//! sees belong to someone else. Parsing therefore answers `None` for anything
//! it did not produce instead of raising an error.
//!
//! The prefix is stripped as an exact `"{prefix}-"` literal before the label
//! is split off, so a prefix that happens to be the start of another prefix
//! (`app` vs `app-beta`) never parses the other's names as its own.

#[cfg(test)]
#[path = "name_test.rs"]
mod tests;

use std::fmt;

use uuid::Uuid;

const SEPARATOR: char = '-';

/// Error returned by [`ChannelPrefix::new`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("channel prefix must not be empty")]
    EmptyPrefix,
    #[error("channel prefix must not contain whitespace: {0:?}")]
    WhitespaceInPrefix(String),
}

// =============================================================================
// PREFIX
// =============================================================================

/// Namespace shared by one manager and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelPrefix(String);

impl ChannelPrefix {
    /// Validate and wrap a prefix.
    ///
    /// # Errors
    ///
    /// Returns [`NameError`] when the prefix is empty or contains whitespace.
    pub fn new(prefix: impl Into<String>) -> Result<Self, NameError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(NameError::EmptyPrefix);
        }
        if prefix.chars().any(char::is_whitespace) {
            return Err(NameError::WhitespaceInPrefix(prefix));
        }
        Ok(Self(prefix))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// LABEL
// =============================================================================

/// Role of a channel: the session's request channel or a stream sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLabel {
    Transport,
    Stream,
}

impl ChannelLabel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT",
            Self::Stream => "STREAM",
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label {
            "TRANSPORT" => Some(Self::Transport),
            "STREAM" => Some(Self::Stream),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CLIENT ID
// =============================================================================

/// Opaque token identifying one logical client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Mint a fresh, practically unique id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// CHANNEL NAME
// =============================================================================

/// A rendered channel name together with its decoded parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName {
    label: ChannelLabel,
    client_id: ClientId,
    rendered: String,
}

impl ChannelName {
    /// Mint a name for `label` under `prefix` with a fresh client id.
    #[must_use]
    pub fn generate(prefix: &ChannelPrefix, label: ChannelLabel) -> Self {
        let client_id = ClientId::generate();
        let rendered = format!("{prefix}{SEPARATOR}{label}{SEPARATOR}{client_id}");
        Self { label, client_id, rendered }
    }

    /// Decode a name produced under `prefix`.
    ///
    /// Returns `None` for a foreign prefix, an unknown label, or an empty or
    /// whitespace-bearing client id.
    #[must_use]
    pub fn parse(prefix: &ChannelPrefix, name: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix.as_str())?.strip_prefix(SEPARATOR)?;
        let (label, client_id) = rest.split_once(SEPARATOR)?;
        let label = ChannelLabel::parse(label)?;
        if client_id.is_empty() || client_id.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Self {
            label,
            client_id: ClientId(client_id.to_owned()),
            rendered: name.to_owned(),
        })
    }

    #[must_use]
    pub fn label(&self) -> ChannelLabel {
        self.label
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}
