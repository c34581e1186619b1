//! In-process window backend.
//!
//! # Invariants
//! - Each key's timestamps are kept sorted ascending.
//! - A key whose expiry has passed is treated as absent, whether or not the
//!   sweep has dropped it yet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::backend::{BackendError, WindowBackend, WindowState};

/// Number of operations between sweeps of idle keys.
const SWEEP_INTERVAL_OPS: u64 = 1024;

#[derive(Debug, Default)]
struct WindowLog {
    timestamps: VecDeque<u64>,
    expires_at_ms: u64,
}

impl WindowLog {
    fn purge(&mut self, now_ms: u64, window_ms: u64) {
        if self.expires_at_ms <= now_ms {
            self.timestamps.clear();
            return;
        }
        let cutoff = now_ms.saturating_sub(window_ms);
        while self.timestamps.front().is_some_and(|&t| t <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    fn insert(&mut self, now_ms: u64) {
        // The clock may step backwards; keep the log sorted regardless.
        let position = self.timestamps.partition_point(|&t| t <= now_ms);
        self.timestamps.insert(position, now_ms);
    }

    fn count(&self) -> u32 {
        u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX)
    }
}

/// Sliding-window logs held in a sharded concurrent map.
///
/// Every operation on a key runs under that key's shard lock and contains no
/// await point, so it is atomic with respect to other callers and cannot be
/// interrupted by cancellation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    windows: DashMap<String, WindowLog>,
    operations: AtomicU64,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held, including expired ones not yet swept.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop keys whose expiry has passed.
    pub fn sweep(&self, now_ms: u64) {
        let before = self.windows.len();
        self.windows.retain(|_, log| log.expires_at_ms > now_ms);
        let dropped = before.saturating_sub(self.windows.len());
        if dropped > 0 {
            tracing::debug!(dropped, "swept idle rate-limit windows");
        }
    }

    /// Count an operation and sweep when the interval is reached.
    ///
    /// Must be called with no map guard held.
    fn tick(&self, now_ms: u64) {
        let n = self.operations.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        if n % SWEEP_INTERVAL_OPS == 0 {
            self.sweep(now_ms);
        }
    }
}

#[async_trait]
impl WindowBackend for MemoryBackend {
    async fn record_if_below(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        limit: u32,
    ) -> Result<WindowState, BackendError> {
        let state = {
            let mut log = self.windows.entry(key.to_string()).or_default();
            log.purge(now_ms, window_ms);

            let recorded = log.count() < limit;
            if recorded {
                log.insert(now_ms);
                log.expires_at_ms = now_ms.saturating_add(window_ms);
            }

            WindowState {
                count: log.count(),
                recorded,
                oldest_ms: log.timestamps.front().copied(),
            }
        };

        self.tick(now_ms);
        Ok(state)
    }

    async fn inspect(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
    ) -> Result<WindowState, BackendError> {
        let state = self.windows.get(key).map_or_else(WindowState::empty, |log| {
            if log.expires_at_ms <= now_ms {
                return WindowState::empty();
            }
            let cutoff = now_ms.saturating_sub(window_ms);
            let mut live = log.timestamps.iter().filter(|&&t| t > cutoff);
            let oldest_ms = live.next().copied();
            let count = oldest_ms.map_or(0, |_| 1 + live.count());
            WindowState {
                count: u32::try_from(count).unwrap_or(u32::MAX),
                recorded: false,
                oldest_ms,
            }
        });

        self.tick(now_ms);
        Ok(state)
    }

    async fn clear(&self, key: &str) -> Result<(), BackendError> {
        self.windows.remove(key);
        Ok(())
    }
}
