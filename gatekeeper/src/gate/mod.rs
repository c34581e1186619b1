//! The per-request authentication and authorization gate.
//!
//! # Pre-conditions
//! - The gate is built once at startup from its collaborators and shared by
//!   every request.
//!
//! # Post-conditions
//! - Every request ends `Admitted` or `Rejected`; every rejection produces
//!   exactly one audit event.
//! - Only admitted requests consume rate-limit capacity.
//!
//! # Invariants
//! - Checks run in a fixed order: token, credential status, permission and
//!   scope, rate limit. A request is rejected by the first check it fails.

pub mod policy;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

pub use policy::RoutePolicy;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink, RejectionReason};
use crate::auth::{
    AccessDenied, CredentialRegistry, KeyStatus, PermissionModel, Principal, ResourceScope,
    TokenCodec, TokenError,
};
use crate::ratelimit::{Decision, RateLimitKey, RateLimitStore};
use crate::time::TimeSource;

/// Gate-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSettings {
    /// Scope prefix for rate-limit keys.
    pub key_prefix: String,
    /// Requests per window when neither credential nor route overrides it.
    pub default_limit: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Whether admitted requests are audited too.
    pub audit_admitted: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            key_prefix: "api".to_string(),
            default_limit: 100,
            window_secs: 60,
            audit_admitted: false,
        }
    }
}

/// The parts of a request the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// Request path; also the rate-limit route identifier.
    pub path: &'a str,
    /// Bearer token, if one was presented.
    pub bearer: Option<&'a str>,
    /// Guild and channel named by the route's path parameters.
    pub scope: &'a ResourceScope,
    /// Caller address, if known.
    pub client_addr: Option<IpAddr>,
    /// Requirements of the matched route.
    pub policy: &'a RoutePolicy,
}

/// Internal detail of a rejection. Never shown to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The route requires a token and none was presented.
    MissingToken,
    /// The token failed to decode.
    Token(TokenError),
    /// The token names an API key the registry does not hold.
    CredentialUnknown,
    /// The token names a revoked API key.
    CredentialRevoked,
    /// The token names an API key past its own expiry.
    CredentialExpired,
    /// The credential registry could not be consulted.
    CredentialLookup(String),
    /// The principal lacks the level or scope.
    Access(AccessDenied),
    /// The rate-limit window is full.
    WindowFull,
}

impl AuthFailure {
    /// The public category this failure falls under.
    #[must_use]
    pub const fn reason(&self) -> RejectionReason {
        match self {
            Self::MissingToken
            | Self::Token(_)
            | Self::CredentialUnknown
            | Self::CredentialRevoked
            | Self::CredentialExpired
            | Self::CredentialLookup(_) => RejectionReason::Unauthenticated,
            Self::Access(_) => RejectionReason::Forbidden,
            Self::WindowFull => RejectionReason::RateLimited,
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "missing bearer token"),
            Self::Token(e) => write!(f, "{e}"),
            Self::CredentialUnknown => write!(f, "unknown credential"),
            Self::CredentialRevoked => write!(f, "credential revoked"),
            Self::CredentialExpired => write!(f, "credential expired"),
            Self::CredentialLookup(reason) => write!(f, "credential lookup failed: {reason}"),
            Self::Access(e) => write!(f, "{e}"),
            Self::WindowFull => write!(f, "rate limit exceeded"),
        }
    }
}

/// A request that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// The resolved caller.
    pub principal: Principal,
    /// The rate-limit decision that admitted it.
    pub decision: Decision,
}

/// A request that was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Why, internally.
    pub failure: AuthFailure,
    /// Current rate-limit state for response headers.
    pub decision: Decision,
}

impl Rejection {
    /// The public rejection category.
    #[must_use]
    pub const fn reason(&self) -> RejectionReason {
        self.failure.reason()
    }
}

/// A verified caller plus the limit attached to its credential.
struct Authenticated {
    principal: Principal,
    limit_override: Option<u32>,
}

/// Authenticates, authorizes and rate-limits requests.
pub struct AuthenticationGate {
    codec: Arc<TokenCodec>,
    permissions: PermissionModel,
    limiter: Arc<RateLimitStore>,
    audit: Arc<dyn AuditSink>,
    credentials: Arc<CredentialRegistry>,
    clock: Arc<dyn TimeSource>,
    settings: GateSettings,
}

impl fmt::Debug for AuthenticationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationGate")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AuthenticationGate {
    /// Assemble a gate from its collaborators.
    #[must_use]
    pub fn new(
        codec: Arc<TokenCodec>,
        permissions: PermissionModel,
        limiter: Arc<RateLimitStore>,
        audit: Arc<dyn AuditSink>,
        credentials: Arc<CredentialRegistry>,
        clock: Arc<dyn TimeSource>,
        settings: GateSettings,
    ) -> Self {
        Self {
            codec,
            permissions,
            limiter,
            audit,
            credentials,
            clock,
            settings,
        }
    }

    /// The token codec.
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// The credential registry.
    #[must_use]
    pub fn credentials(&self) -> &CredentialRegistry {
        &self.credentials
    }

    /// The rate-limit store.
    #[must_use]
    pub fn limiter(&self) -> &RateLimitStore {
        &self.limiter
    }

    /// The audit sink.
    #[must_use]
    pub fn audit(&self) -> &dyn AuditSink {
        self.audit.as_ref()
    }

    /// The clock.
    #[must_use]
    pub fn clock(&self) -> &dyn TimeSource {
        self.clock.as_ref()
    }

    /// Gate-wide settings.
    #[must_use]
    pub const fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// The rate-limit key for a principal on a route.
    #[must_use]
    pub fn rate_limit_key(&self, principal: &str, route: &str) -> RateLimitKey {
        RateLimitKey::new(self.settings.key_prefix.as_str(), principal, route)
    }

    /// Run a request through the gate.
    ///
    /// # Errors
    /// Returns a [`Rejection`] for the first check the request fails.
    pub async fn authorize(&self, request: &GateRequest<'_>) -> Result<Admission, Rejection> {
        let policy = request.policy;

        let authenticated = match self.authenticate(request).await {
            Ok(authenticated) => authenticated,
            Err(failure) => {
                let identifier = Principal::anonymous().identifier(request.client_addr);
                let limit = self.limit_for(None, policy);
                return Err(self.reject(request, None, &identifier, limit, failure).await);
            }
        };
        let principal = authenticated.principal;
        let identifier = principal.identifier(request.client_addr);
        let limit = self.limit_for(authenticated.limit_override, policy);

        if let Err(denied) = self
            .permissions
            .authorize(&principal, policy.required_level, request.scope)
        {
            return Err(self
                .reject(request, Some(&principal), &identifier, limit, AuthFailure::Access(denied))
                .await);
        }

        let key = self.rate_limit_key(&identifier, request.path);
        let decision = self
            .limiter
            .check_and_record(&key, limit, self.settings.window_secs)
            .await;
        if !decision.allowed {
            let rejection = Rejection {
                failure: AuthFailure::WindowFull,
                decision,
            };
            self.audit_rejection(request, Some(&identifier), &rejection).await;
            return Err(rejection);
        }

        if let Some(key_id) = &principal.key_id
            && let Err(e) = self.credentials.touch(key_id).await
        {
            tracing::warn!(key_id = %key_id, error = %e, "failed to record credential use");
        }

        tracing::debug!(
            principal = %identifier,
            method = request.method,
            route = request.path,
            remaining = decision.remaining,
            "request admitted"
        );
        if self.settings.audit_admitted {
            let event = AuditEvent::new(self.clock.now_ms(), AuditOutcome::Admitted)
                .with_request(request.method, request.path)
                .with_principal(identifier)
                .with_client_addr(request.client_addr);
            self.audit.record(event).await;
        }

        Ok(Admission {
            principal,
            decision,
        })
    }

    /// Resolve the caller from the bearer token, if any.
    async fn authenticate(&self, request: &GateRequest<'_>) -> Result<Authenticated, AuthFailure> {
        let Some(token) = request.bearer else {
            if request.policy.requires_auth {
                return Err(AuthFailure::MissingToken);
            }
            return Ok(Authenticated {
                principal: Principal::anonymous(),
                limit_override: None,
            });
        };

        let claims = self.codec.decode(token).map_err(|e| {
            tracing::warn!(error = %e, route = request.path, "bearer token rejected");
            AuthFailure::Token(e)
        })?;
        let principal = Principal::from_claims(claims);

        let limit_override = match &principal.key_id {
            None => None,
            Some(key_id) => match self.credentials.status(key_id).await {
                Ok(KeyStatus::Unknown) => return Err(AuthFailure::CredentialUnknown),
                Ok(KeyStatus::Active {
                    rate_limit_override,
                }) => rate_limit_override,
                Ok(KeyStatus::Revoked) => return Err(AuthFailure::CredentialRevoked),
                Ok(KeyStatus::Expired) => return Err(AuthFailure::CredentialExpired),
                Err(e) => return Err(AuthFailure::CredentialLookup(e.to_string())),
            },
        };

        Ok(Authenticated {
            principal,
            limit_override,
        })
    }

    /// Credential override, else route override, else the default.
    fn limit_for(&self, credential_override: Option<u32>, policy: &RoutePolicy) -> u32 {
        credential_override
            .or(policy.rate_limit)
            .unwrap_or(self.settings.default_limit)
    }

    /// Build an unauthenticated or forbidden rejection, carrying the
    /// caller's current window state.
    async fn reject(
        &self,
        request: &GateRequest<'_>,
        principal: Option<&Principal>,
        identifier: &str,
        limit: u32,
        failure: AuthFailure,
    ) -> Rejection {
        let key = self.rate_limit_key(identifier, request.path);
        let decision = self
            .limiter
            .peek(&key, limit, self.settings.window_secs)
            .await;
        let rejection = Rejection { failure, decision };

        let known = principal.filter(|p| !p.is_anonymous()).map(|_| identifier);
        self.audit_rejection(request, known, &rejection).await;
        rejection
    }

    async fn audit_rejection(
        &self,
        request: &GateRequest<'_>,
        identifier: Option<&str>,
        rejection: &Rejection,
    ) {
        tracing::debug!(
            reason = %rejection.reason(),
            detail = %rejection.failure,
            method = request.method,
            route = request.path,
            "request rejected"
        );

        let mut event = AuditEvent::new(
            self.clock.now_ms(),
            AuditOutcome::Rejected {
                reason: rejection.reason(),
                detail: rejection.failure.to_string(),
            },
        )
        .with_request(request.method, request.path)
        .with_client_addr(request.client_addr);
        if let Some(identifier) = identifier {
            event = event.with_principal(identifier);
        }
        self.audit.record(event).await;
    }
}
