//! Storage seam for sliding-window logs.
//!
//! A backend keeps, per key, the timestamps of accepted requests. Each call
//! is one atomic unit for its key: purge, count, conditional insert and
//! expiry refresh cannot interleave with another call on the same key.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// The state of one window after a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Timestamps inside the window after the call, including one recorded
    /// by it.
    pub count: u32,
    /// Whether this call recorded a timestamp.
    pub recorded: bool,
    /// Oldest timestamp still inside the window, in milliseconds.
    pub oldest_ms: Option<u64>,
}

impl WindowState {
    /// A window with no recorded requests.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            count: 0,
            recorded: false,
            oldest_ms: None,
        }
    }
}

/// Error returned when the backing store cannot answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The store rejected or failed the operation.
    Unavailable(String),
    /// The store did not answer in time.
    Timeout(Duration),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "rate-limit store unavailable: {reason}"),
            Self::Timeout(after) => {
                write!(f, "rate-limit store timed out after {}ms", after.as_millis())
            }
        }
    }
}

impl std::error::Error for BackendError {}

/// Atomic per-key sliding-window operations.
///
/// A timestamp `t` is inside the window at `now_ms` iff
/// `t > now_ms - window_ms`.
#[async_trait]
pub trait WindowBackend: Send + Sync {
    /// Purge stale timestamps, then record `now_ms` if fewer than `limit`
    /// remain, refreshing the key's expiry to `window_ms`.
    async fn record_if_below(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
    ) -> Result<WindowState, BackendError>;

    /// Count timestamps inside the window without recording anything.
    async fn inspect(&self, key: &str, now_ms: u64, window_ms: u64)
    -> Result<WindowState, BackendError>;

    /// Delete all state for a key. Clearing an absent key is not an error.
    async fn clear(&self, key: &str) -> Result<(), BackendError>;
}
