//! Cache Store client contract.
//!
//! A thin key/value contract over a network store (GET/SET by string key,
//! byte-string values, no expiry) plus connection-state events so callers can
//! skip the store entirely while it is unreachable.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Connection lifecycle of a cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has completed yet.
    Disconnected,
    Connected,
    /// The last operation or probe failed and the retry budget is spent.
    Error,
    /// Reconnect attempt `attempt` (1-based) is pending.
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    /// Only a connected store is worth a network round trip.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Numeric encoding for the connection-state gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connected => 1.0,
            Self::Error => -1.0,
            Self::Reconnecting { .. } => 2.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Failures reaching or talking to the cache store.
///
/// These never reach HTTP callers: the orchestrator treats every one of them
/// as a cache miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache store error: {0}")]
    Backend(String),

    #[error("cache operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("cache entry (de)serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            CacheError::Unavailable(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

/// Key/value cache store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the raw value for `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key` without expiry, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Receiver that observes every connection-state transition.
    fn subscribe(&self) -> watch::Receiver<ConnectionState>;

    /// Short backend label for logs and health output.
    fn mode(&self) -> &'static str;
}

/// Type alias for a shareable cache store.
pub type DynCacheStore = Arc<dyn CacheStore>;

/// Publishes `next` if it differs from the current state.
///
/// Returns `true` when a transition happened.
pub(crate) fn transition(
    state: &watch::Sender<ConnectionState>,
    next: ConnectionState,
    mode: &'static str,
) -> bool {
    let mut previous = next;
    let changed = state.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        previous = *current;
        *current = next;
        true
    });
    if changed {
        crate::metrics::set_cache_connection_state(mode, next);
        match next {
            ConnectionState::Connected => {
                tracing::info!(mode, from = %previous, "cache store connected")
            }
            ConnectionState::Error => {
                tracing::warn!(mode, from = %previous, "cache store in error state")
            }
            ConnectionState::Reconnecting { attempt } => {
                tracing::info!(mode, attempt, "cache store reconnecting")
            }
            ConnectionState::Disconnected => {
                tracing::info!(mode, from = %previous, "cache store disconnected")
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_is_available() {
        assert!(ConnectionState::Connected.is_available());
        assert!(!ConnectionState::Disconnected.is_available());
        assert!(!ConnectionState::Error.is_available());
        assert!(!ConnectionState::Reconnecting { attempt: 3 }.is_available());
    }

    #[test]
    fn test_transition_reports_changes_only() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);

        assert!(transition(&tx, ConnectionState::Connected, "test"));
        assert!(!transition(&tx, ConnectionState::Connected, "test"));
        assert_eq!(*rx.borrow(), ConnectionState::Connected);

        assert!(transition(&tx, ConnectionState::Reconnecting { attempt: 1 }, "test"));
        assert!(transition(&tx, ConnectionState::Reconnecting { attempt: 2 }, "test"));
        assert_eq!(*rx.borrow(), ConnectionState::Reconnecting { attempt: 2 });
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (attempt 2)"
        );
    }
}
