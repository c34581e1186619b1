//! Authentication and authorization audit events.
//!
//! The gate reports every rejection, and optionally every admission, to an
//! [`AuditSink`]. Audit records are not persisted by this crate.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use serde::Serialize;

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// Missing, malformed, tampered, expired or revoked credentials.
    Unauthenticated,
    /// Valid credentials without the required level or scope.
    Forbidden,
    /// The rate-limit window is full.
    RateLimited,
}

impl RejectionReason {
    /// Stable code used in response bodies and audit records.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What happened to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The request passed the gate.
    Admitted,
    /// The request was refused.
    Rejected {
        /// Public rejection category.
        reason: RejectionReason,
        /// Internal detail, never shown to the caller.
        detail: String,
    },
    /// The rate-limit store failed and the request was let through.
    Degraded {
        /// Rate-limit key being checked.
        key: String,
        /// Backend failure description.
        detail: String,
    },
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    /// Milliseconds since Unix epoch.
    pub timestamp_ms: u64,
    /// Outcome and its detail.
    #[serde(flatten)]
    pub outcome: AuditOutcome,
    /// Request path.
    pub route: Option<String>,
    /// HTTP method.
    pub method: Option<String>,
    /// Principal identifier, when known.
    pub principal: Option<String>,
    /// Caller address.
    pub client_addr: Option<IpAddr>,
}

impl AuditEvent {
    /// An event with no request context.
    #[must_use]
    pub const fn new(timestamp_ms: u64, outcome: AuditOutcome) -> Self {
        Self {
            timestamp_ms,
            outcome,
            route: None,
            method: None,
            principal: None,
            client_addr: None,
        }
    }

    /// Attach the request route and method.
    #[must_use]
    pub fn with_request(mut self, method: impl Into<String>, route: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.route = Some(route.into());
        self
    }

    /// Attach the principal identifier.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Attach the caller address.
    #[must_use]
    pub const fn with_client_addr(mut self, client_addr: Option<IpAddr>) -> Self {
        self.client_addr = client_addr;
        self
    }

    /// Short outcome label for log lines.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match &self.outcome {
            AuditOutcome::Admitted => "admitted",
            AuditOutcome::Rejected { reason, .. } => reason.code(),
            AuditOutcome::Degraded { .. } => "degraded",
        }
    }
}

/// Receives audit events.
///
/// Implementations must not fail the request: delivery problems are their
/// own to log.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event.
    async fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        let detail = match &event.outcome {
            AuditOutcome::Admitted => None,
            AuditOutcome::Rejected { detail, .. } | AuditOutcome::Degraded { detail, .. } => {
                Some(detail.as_str())
            }
        };
        let client_addr = event.client_addr.map(|ip| ip.to_string());

        match event.outcome {
            AuditOutcome::Admitted => tracing::info!(
                target: "audit",
                outcome = event.label(),
                timestamp_ms = event.timestamp_ms,
                method = event.method.as_deref(),
                route = event.route.as_deref(),
                principal = event.principal.as_deref(),
                client_addr = client_addr.as_deref(),
                "request admitted"
            ),
            AuditOutcome::Rejected { .. } => tracing::warn!(
                target: "audit",
                outcome = event.label(),
                timestamp_ms = event.timestamp_ms,
                method = event.method.as_deref(),
                route = event.route.as_deref(),
                principal = event.principal.as_deref(),
                client_addr = client_addr.as_deref(),
                detail,
                "request rejected"
            ),
            AuditOutcome::Degraded { ref key, .. } => tracing::warn!(
                target: "audit",
                outcome = event.label(),
                timestamp_ms = event.timestamp_ms,
                key = key.as_str(),
                method = event.method.as_deref(),
                route = event.route.as_deref(),
                principal = event.principal.as_deref(),
                detail,
                "rate limiting degraded, failing open"
            ),
        }
    }
}
