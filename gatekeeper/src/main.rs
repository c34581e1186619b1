#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code to prevent panics on bad input.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::net::SocketAddr;
use std::sync::Arc;

use gatekeeper::audit::{AuditSink, TracingAuditSink};
use gatekeeper::auth::{
    CredentialRegistry, CredentialStore, MemoryCredentialStore, PermissionModel,
    RedisCredentialStore, TokenCodec,
};
use gatekeeper::config::{GateConfig, LogFormat};
use gatekeeper::ratelimit::{MemoryBackend, RateLimitStore, RedisBackend, WindowBackend};
use gatekeeper::server::{self, AppState};
use gatekeeper::shared_store::SharedStore;
use gatekeeper::time::{SystemTimeSource, TimeSource};
use gatekeeper::AuthenticationGate;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected for shared state
async fn main() {
    // Load configuration from environment variables
    let config = match GateConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // The subscriber depends on the config, so report directly.
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gatekeeper=info,audit=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    tracing::info!(
        "Loaded configuration: listen={}:{}, rate_limit={}/{}s, prefix={}",
        config.listen_host,
        config.listen_port,
        config.rate_limit_requests,
        config.rate_limit_window_secs,
        config.rate_limit_prefix
    );

    let clock: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    // The signing secret is required before any request is accepted.
    let codec = match TokenCodec::new(config.secret_key.as_bytes(), Arc::clone(&clock)) {
        Ok(codec) => Arc::new(codec),
        Err(e) => {
            tracing::error!("Failed to initialize token codec: {e}");
            std::process::exit(1);
        }
    };

    // Windows and credentials are shared across instances only through Redis.
    let (backend, credential_store): (Arc<dyn WindowBackend>, Arc<dyn CredentialStore>) =
        match &config.redis_url {
            Some(url) => match SharedStore::open(url) {
                Ok(store) => {
                    let store = Arc::new(store);
                    tracing::info!("using shared store for rate limits and credentials");
                    (
                        Arc::new(RedisBackend::new(Arc::clone(&store))),
                        Arc::new(RedisCredentialStore::new(store, config.rate_limit_prefix.clone())),
                    )
                }
                Err(e) => {
                    tracing::error!("Invalid GATE_REDIS_URL: {e}");
                    std::process::exit(1);
                }
            },
            None => {
                tracing::warn!("GATE_REDIS_URL not set; rate limits and credentials are per-process");
                (
                    Arc::new(MemoryBackend::new()),
                    Arc::new(MemoryCredentialStore::new()),
                )
            }
        };

    let limiter = Arc::new(RateLimitStore::new(
        backend,
        Arc::clone(&clock),
        Arc::clone(&audit),
        config.store_timeout,
    ));
    let credentials = Arc::new(CredentialRegistry::new(credential_store, Arc::clone(&clock)));

    if let Some(secret) = &config.admin_api_key {
        match credentials.seed_admin(secret).await {
            Ok(key_id) => tracing::info!(key_id = %key_id, "bootstrap admin key available"),
            Err(e) => {
                tracing::error!("Failed to seed bootstrap admin key: {e}");
                std::process::exit(1);
            }
        }
    }

    let gate = Arc::new(AuthenticationGate::new(
        codec,
        PermissionModel,
        limiter,
        audit,
        credentials,
        clock,
        config.gate_settings(),
    ));

    let state = AppState {
        gate,
        token_ttl: config.token_ttl,
    };
    let app = server::router(state);

    let addr = SocketAddr::new(config.listen_host, config.listen_port);
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind: {e}");
            std::process::exit(1);
        });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}
