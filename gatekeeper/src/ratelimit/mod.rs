//! Sliding-window rate limiting.
//!
//! [`RateLimitStore`] turns backend window states into [`Decision`]s and
//! owns the failure policy: when the backend errors or times out, requests
//! are admitted and the failure is reported as a degraded audit event.
//!
//! # Invariants
//! - After an accepted request, at most `limit` timestamps lie strictly
//!   after `now - window`.
//! - Backend failures never reach the caller as errors from
//!   `check_and_record` or `peek`.

pub mod backend;
pub mod memory;
pub mod redis_backend;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use backend::{BackendError, WindowBackend, WindowState};
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink};
use crate::time::TimeSource;

/// Identifies one rate-limit window: `prefix:principal:route`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Deployment-wide scope prefix.
    pub prefix: String,
    /// Principal identifier.
    pub principal: String,
    /// Route identifier.
    pub route: String,
}

impl RateLimitKey {
    /// Build a key.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        principal: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            principal: principal.into(),
            route: route.into(),
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.prefix, self.principal, self.route)
    }
}

/// The outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests allowed per window.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the oldest counted request leaves the window, epoch seconds.
    pub reset_at: Option<u64>,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Decision {
    fn from_state(state: WindowState, limit: u32, window_secs: u64, allowed: bool) -> Self {
        let window_ms = window_secs.saturating_mul(1000);
        Self {
            allowed,
            limit,
            remaining: limit.saturating_sub(state.count),
            reset_at: state
                .oldest_ms
                .map(|oldest| oldest.saturating_add(window_ms).div_ceil(1000)),
            window_secs,
        }
    }

    /// The decision used when the backend cannot answer.
    #[must_use]
    pub const fn unknown(limit: u32, window_secs: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: None,
            window_secs,
        }
    }
}

/// Rate-limit checks over a [`WindowBackend`].
pub struct RateLimitStore {
    backend: Arc<dyn WindowBackend>,
    clock: Arc<dyn TimeSource>,
    audit: Arc<dyn AuditSink>,
    call_timeout: Option<Duration>,
}

impl fmt::Debug for RateLimitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitStore")
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl RateLimitStore {
    /// Create a store. `call_timeout` bounds every backend call.
    #[must_use]
    pub fn new(
        backend: Arc<dyn WindowBackend>,
        clock: Arc<dyn TimeSource>,
        audit: Arc<dyn AuditSink>,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            clock,
            audit,
            call_timeout,
        }
    }

    /// Check the window and record the request if it fits.
    ///
    /// Fails open: on backend failure the request is allowed and a degraded
    /// event is sent to the audit sink.
    pub async fn check_and_record(
        &self,
        key: &RateLimitKey,
        limit: u32,
        window_secs: u64,
    ) -> Decision {
        let now_ms = self.clock.now_ms();
        let rendered = key.to_string();
        let result = self
            .bounded(self.backend.record_if_below(
                &rendered,
                now_ms,
                window_secs.saturating_mul(1000),
                limit,
            ))
            .await;

        match result {
            Ok(state) => {
                let decision = Decision::from_state(state, limit, window_secs, state.recorded);
                if !decision.allowed {
                    tracing::warn!(
                        key = %rendered,
                        count = state.count,
                        limit,
                        window_secs,
                        "rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                tracing::error!(key = %rendered, error = %e, "rate limiting error, failing open");
                let event = AuditEvent::new(
                    now_ms,
                    AuditOutcome::Degraded {
                        key: rendered,
                        detail: e.to_string(),
                    },
                )
                .with_principal(key.principal.clone());
                self.audit.record(event).await;
                Decision::unknown(limit, window_secs)
            }
        }
    }

    /// Report the window without recording anything.
    ///
    /// On backend failure reports the full limit as remaining and no reset
    /// time.
    pub async fn peek(&self, key: &RateLimitKey, limit: u32, window_secs: u64) -> Decision {
        let rendered = key.to_string();
        let result = self
            .bounded(self.backend.inspect(
                &rendered,
                self.clock.now_ms(),
                window_secs.saturating_mul(1000),
            ))
            .await;

        match result {
            Ok(state) => Decision::from_state(state, limit, window_secs, state.count < limit),
            Err(e) => {
                tracing::warn!(key = %rendered, error = %e, "failed to get rate limit info");
                Decision::unknown(limit, window_secs)
            }
        }
    }

    /// Delete all recorded state for a key.
    ///
    /// # Errors
    /// Returns the backend error if the key could not be cleared.
    pub async fn reset(&self, key: &RateLimitKey) -> Result<(), BackendError> {
        let rendered = key.to_string();
        match self.bounded(self.backend.clear(&rendered)).await {
            Ok(()) => {
                tracing::info!(key = %rendered, "rate limit reset");
                Ok(())
            }
            Err(e) => {
                tracing::error!(key = %rendered, error = %e, "failed to reset rate limit");
                Err(e)
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackendError::Timeout(limit))?,
            None => call.await,
        }
    }
}
