//! Transport timeouts.
//!
//! All limits are millisecond counts read from the environment, with `0`
//! meaning "no limit":
//!
//! - `TRANSPORT_IDLE_TIMEOUT_MS` (default 20000): silence tolerated on a
//!   stream sub-channel before it is failed with `deadline_exceeded`.
//! - `TRANSPORT_REQUEST_TIMEOUT_MS` (default 0): per-request deadline, on the
//!   manager for handlers and on the client for replies.
//! - `TRANSPORT_OFFER_TIMEOUT_MS` (default 20000): how long a streamed
//!   response waits for the client to open its sub-channel.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::time::Duration;

const DEFAULT_IDLE_TIMEOUT_MS: u64 = 20_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 0;
const DEFAULT_OFFER_TIMEOUT_MS: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub idle_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub offer_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            idle_timeout: limit(DEFAULT_IDLE_TIMEOUT_MS),
            request_timeout: limit(DEFAULT_REQUEST_TIMEOUT_MS),
            offer_timeout: limit(DEFAULT_OFFER_TIMEOUT_MS),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            idle_timeout: limit(env_parse("TRANSPORT_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT_MS)),
            request_timeout: limit(env_parse("TRANSPORT_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)),
            offer_timeout: limit(env_parse("TRANSPORT_OFFER_TIMEOUT_MS", DEFAULT_OFFER_TIMEOUT_MS)),
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    #[must_use]
    pub fn with_offer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.offer_timeout = timeout.filter(|d| !d.is_zero());
        self
    }
}

fn limit(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Resolves after `limit`, or never when there is no limit.
pub(crate) async fn expire(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
