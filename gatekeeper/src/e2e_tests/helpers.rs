//! Common helpers for end-to-end tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use tower::ServiceExt;

use crate::audit::{AuditEvent, AuditSink};
use crate::auth::{CredentialRegistry, PermissionModel, TokenCodec, TokenGrant};
use crate::gate::{AuthenticationGate, GateSettings};
use crate::ratelimit::{MemoryBackend, RateLimitStore, WindowBackend};
use crate::server::{self, AppState};
use crate::testing::RecordingAuditSink;
use crate::time::{ManualTimeSource, TimeSource};

pub const SECRET: &[u8] = b"e2e-test-secret-key-0123456789abcdef";
pub const CLIENT_ADDR: &str = "198.51.100.7:40000";

/// A response with its body parsed as JSON, when it is JSON.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl TestResponse {
    /// A header as a string, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The full router over a manual clock and a recording audit sink.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub clock: Arc<ManualTimeSource>,
    pub audit: Arc<RecordingAuditSink>,
}

impl TestApp {
    /// Default settings over the in-process backend.
    pub fn new() -> Self {
        Self::with(Arc::new(MemoryBackend::new()), GateSettings::default())
    }

    /// Custom settings over the in-process backend.
    pub fn with_settings(settings: GateSettings) -> Self {
        Self::with(Arc::new(MemoryBackend::new()), settings)
    }

    pub fn with(backend: Arc<dyn WindowBackend>, settings: GateSettings) -> Self {
        let clock = Arc::new(ManualTimeSource::default_start());
        let dyn_clock = Arc::clone(&clock) as Arc<dyn TimeSource>;
        let audit = Arc::new(RecordingAuditSink::new());
        let dyn_audit = Arc::clone(&audit) as Arc<dyn AuditSink>;

        let gate = AuthenticationGate::new(
            Arc::new(TokenCodec::new(SECRET, Arc::clone(&dyn_clock)).expect("valid secret")),
            PermissionModel,
            Arc::new(RateLimitStore::new(
                backend,
                Arc::clone(&dyn_clock),
                Arc::clone(&dyn_audit),
                None,
            )),
            dyn_audit,
            Arc::new(CredentialRegistry::in_memory(Arc::clone(&dyn_clock))),
            dyn_clock,
            settings,
        );
        let state = AppState {
            gate: Arc::new(gate),
            token_ttl: Duration::from_secs(3600),
        };

        Self {
            app: server::router(state.clone()),
            state,
            clock,
            audit,
        }
    }

    /// Sign a token for a grant, valid for an hour.
    pub fn token_for(&self, grant: &TokenGrant) -> String {
        self.state
            .gate
            .codec()
            .issue(grant, Duration::from_secs(3600), None)
            .expect("issue token")
            .0
            .into_string()
    }

    /// Seed the bootstrap admin key for `secret`, as startup does.
    pub async fn seed_admin(&self, secret: &str) -> String {
        self.state
            .gate
            .credentials()
            .seed_admin(secret)
            .await
            .expect("seed admin")
    }

    /// Audit events recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.audit.events()
    }

    /// Send a request through the router.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let mut request = builder.body(body).expect("valid request");
        let addr: SocketAddr = CLIENT_ADDR.parse().expect("valid socket address");
        request.extensions_mut().insert(ConnectInfo(addr));

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> TestResponse {
        self.send(Method::GET, uri, bearer, None).await
    }

    pub async fn post(
        &self,
        uri: &str,
        bearer: Option<&str>,
        body: serde_json::Value,
    ) -> TestResponse {
        self.send(Method::POST, uri, bearer, Some(body)).await
    }
}

/// A grant for a user holding `levels` within `guilds`.
pub fn user_grant(
    user_id: &str,
    levels: &[crate::auth::PermissionLevel],
    guilds: &[&str],
) -> TokenGrant {
    TokenGrant {
        user_id: Some(user_id.to_string()),
        permissions: levels.to_vec(),
        guild_ids: guilds.iter().map(ToString::to_string).collect(),
        ..TokenGrant::default()
    }
}
