//! HTTP surface: the router, its shared state and the gate middleware.

pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{MethodRouter, delete, get, post};

pub use error::ApiError;
pub use middleware::RouteGuard;

use crate::auth::PermissionLevel;
use crate::gate::{AuthenticationGate, RoutePolicy};

pub const HEALTH_PATH: &str = "/health";
pub const TOKEN_PATH: &str = "/v1/auth/token";
pub const WHOAMI_PATH: &str = "/v1/whoami";
pub const MESSAGES_PATH: &str = "/v1/guilds/{guild_id}/channels/{channel_id}/messages";
pub const SEARCH_PATH: &str = "/v1/guilds/{guild_id}/search";
pub const MODERATION_PATH: &str = "/v1/guilds/{guild_id}/channels/{channel_id}/moderation";
pub const CREDENTIALS_PATH: &str = "/v1/admin/credentials";
pub const CREDENTIAL_PATH: &str = "/v1/admin/credentials/{key_id}";
pub const RATE_LIMIT_RESET_PATH: &str = "/v1/admin/rate-limits/reset";

/// Requests per window allowed on the token exchange route.
pub const TOKEN_EXCHANGE_LIMIT: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    /// The gate, shared by every route.
    pub gate: Arc<AuthenticationGate>,
    /// Lifetime of tokens minted by the exchange and issuance routes.
    pub token_ttl: Duration,
}

/// Build the application router.
#[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected for shared state
pub fn router(state: AppState) -> Router {
    let guarded = |policy: RoutePolicy, route: MethodRouter<AppState>| {
        let guard = RouteGuard {
            gate: Arc::clone(&state.gate),
            policy: Arc::new(policy),
        };
        route.route_layer(axum::middleware::from_fn_with_state(
            guard,
            middleware::enforce,
        ))
    };

    let read_only = |template: &'static str| RoutePolicy::protected(template, PermissionLevel::ReadOnly);
    let admin = |template: &'static str| RoutePolicy::protected(template, PermissionLevel::Admin);

    Router::new()
        .route(HEALTH_PATH, get(handlers::health))
        .route(
            TOKEN_PATH,
            guarded(
                RoutePolicy::open(TOKEN_PATH).with_rate_limit(TOKEN_EXCHANGE_LIMIT),
                post(handlers::exchange_token),
            ),
        )
        .route(WHOAMI_PATH, guarded(read_only(WHOAMI_PATH), get(handlers::whoami)))
        .route(
            MESSAGES_PATH,
            guarded(read_only(MESSAGES_PATH), get(handlers::fetch_messages)).merge(guarded(
                RoutePolicy::protected(MESSAGES_PATH, PermissionLevel::ReadWrite),
                post(handlers::send_message),
            )),
        )
        .route(
            SEARCH_PATH,
            guarded(read_only(SEARCH_PATH), get(handlers::search_messages)),
        )
        .route(
            MODERATION_PATH,
            guarded(
                RoutePolicy::protected(MODERATION_PATH, PermissionLevel::Moderate),
                post(handlers::moderate),
            ),
        )
        .route(
            CREDENTIALS_PATH,
            guarded(admin(CREDENTIALS_PATH), post(handlers::issue_credential)),
        )
        .route(
            CREDENTIAL_PATH,
            guarded(admin(CREDENTIAL_PATH), delete(handlers::revoke_credential)),
        )
        .route(
            RATE_LIMIT_RESET_PATH,
            guarded(admin(RATE_LIMIT_RESET_PATH), post(handlers::reset_rate_limit)),
        )
        .with_state(state)
}
