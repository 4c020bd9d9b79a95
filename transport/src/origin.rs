//! Which senders may open a session.
//!
//! A connection is admitted when it comes from this runtime's own extension,
//! or from the top-level frame of a tab served over `https` or from
//! `http://localhost`. Everything else is ignored by the manager.

#[cfg(test)]
#[path = "origin_test.rs"]
mod tests;

use url::Url;

use crate::host::SenderInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Extension,
    Https,
    Localhost,
}

/// Classify `sender` against the local runtime id. `None` means the sender
/// is not allowed to connect.
#[must_use]
pub fn classify(sender: &SenderInfo, runtime_id: &str) -> Option<OriginKind> {
    if sender.id.as_deref() == Some(runtime_id) {
        return Some(OriginKind::Extension);
    }

    let top_level = sender.tab_id.is_some() && sender.frame_id.unwrap_or(0) == 0;
    if !top_level {
        return None;
    }

    let origin = Url::parse(sender.origin.as_deref()?).ok()?;
    match origin.scheme() {
        "https" => Some(OriginKind::Https),
        "http" if origin.host_str() == Some("localhost") => Some(OriginKind::Localhost),
        _ => None,
    }
}

/// Whether two sender descriptions name the same context.
#[must_use]
pub fn senders_match(expected: &SenderInfo, actual: &SenderInfo) -> bool {
    expected.origin == actual.origin && expected.id == actual.id && expected.tab_id == actual.tab_id
}
