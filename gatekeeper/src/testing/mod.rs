//! Test doubles for the audit and rate-limit seams.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::audit::{AuditEvent, AuditSink};
use crate::ratelimit::{BackendError, WindowBackend, WindowState};

/// An audit sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// A backend whose every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

#[async_trait]
impl WindowBackend for UnavailableBackend {
    async fn record_if_below(
        &self,
        _key: &str,
        _now_ms: u64,
        _window_ms: u64,
        _limit: u32,
    ) -> Result<WindowState, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }

    async fn inspect(
        &self,
        _key: &str,
        _now_ms: u64,
        _window_ms: u64,
    ) -> Result<WindowState, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }

    async fn clear(&self, _key: &str) -> Result<(), BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

/// A backend whose calls never complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalledBackend;

#[async_trait]
impl WindowBackend for StalledBackend {
    async fn record_if_below(
        &self,
        _key: &str,
        _now_ms: u64,
        _window_ms: u64,
        _limit: u32,
    ) -> Result<WindowState, BackendError> {
        std::future::pending().await
    }

    async fn inspect(
        &self,
        _key: &str,
        _now_ms: u64,
        _window_ms: u64,
    ) -> Result<WindowState, BackendError> {
        std::future::pending().await
    }

    async fn clear(&self, _key: &str) -> Result<(), BackendError> {
        std::future::pending().await
    }
}
