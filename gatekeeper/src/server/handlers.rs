//! Route handlers.
//!
//! Handlers behind the gate read the admitted [`Principal`] from request
//! extensions. Chat operations answer `501` until a chat-platform client is
//! attached.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::audit::{AuditEvent, AuditOutcome, RejectionReason};
use crate::auth::{CredentialError, CredentialRequest, PermissionLevel, Principal};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub key_id: String,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Exchange an API key's raw secret for a bearer token.
pub async fn exchange_token(
    State(state): State<AppState>,
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Json(body): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let gate = &state.gate;
    match gate
        .credentials()
        .exchange(gate.codec(), &body.key_id, &body.secret, state.token_ttl)
        .await
    {
        Ok((token, exp)) => Ok(Json(TokenResponse {
            access_token: token.into_string(),
            token_type: "bearer".to_string(),
            expires_in: exp.saturating_sub(gate.clock().now_secs()),
        })),
        Err(e @ (CredentialError::LockPoisoned | CredentialError::Token(_))) => {
            Err(ApiError::Internal(e.to_string()))
        }
        Err(CredentialError::Store(reason)) => Err(ApiError::Unavailable(reason)),
        Err(e) => {
            tracing::warn!(key_id = %body.key_id, error = %e, "token exchange rejected");
            let event = AuditEvent::new(
                gate.clock().now_ms(),
                AuditOutcome::Rejected {
                    reason: RejectionReason::Unauthenticated,
                    detail: e.to_string(),
                },
            )
            .with_request("POST", super::TOKEN_PATH)
            .with_principal(body.key_id)
            .with_client_addr(Some(client.ip()));
            gate.audit().record(event).await;
            Err(ApiError::Unauthorized)
        }
    }
}

/// The caller as the gate resolved it.
pub async fn whoami(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}

pub async fn fetch_messages(
    Path((guild_id, channel_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    tracing::debug!(%guild_id, %channel_id, "fetch messages");
    Err(ApiError::NotImplemented("fetchMessages"))
}

pub async fn send_message(
    Path((guild_id, channel_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    tracing::debug!(%guild_id, %channel_id, "send message");
    Err(ApiError::NotImplemented("sendMessage"))
}

pub async fn search_messages(Path(guild_id): Path<String>) -> Result<StatusCode, ApiError> {
    tracing::debug!(%guild_id, "search messages");
    Err(ApiError::NotImplemented("searchMessages"))
}

pub async fn moderate(
    Path((guild_id, channel_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    tracing::debug!(%guild_id, %channel_id, "moderate");
    Err(ApiError::NotImplemented("moderate"))
}

#[derive(Debug, Deserialize)]
pub struct IssueCredentialRequest {
    pub name: String,
    pub permissions: Vec<PermissionLevel>,
    #[serde(default)]
    pub guild_ids: Vec<String>,
    #[serde(default)]
    pub channel_ids: Vec<String>,
    pub ttl_secs: Option<u64>,
    pub rate_limit_override: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IssueCredentialResponse {
    pub key_id: String,
    pub secret: String,
    pub token: String,
    pub expires_at: Option<u64>,
}

/// Issue an API key and a first token for it.
pub async fn issue_credential(
    State(state): State<AppState>,
    Extension(admin): Extension<Principal>,
    Json(body): Json<IssueCredentialRequest>,
) -> Result<(StatusCode, Json<IssueCredentialResponse>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }
    if body.permissions.is_empty() {
        return Err(ApiError::BadRequest(
            "at least one permission is required".to_string(),
        ));
    }
    if body.rate_limit_override == Some(0) {
        return Err(ApiError::BadRequest(
            "rate_limit_override must be positive".to_string(),
        ));
    }

    let gate = &state.gate;
    let registry = gate.credentials();
    let issued = registry
        .issue(CredentialRequest {
            name: body.name,
            permissions: body.permissions.into_iter().collect(),
            guild_scope: body.guild_ids.into_iter().collect::<BTreeSet<_>>(),
            channel_scope: body.channel_ids.into_iter().collect::<BTreeSet<_>>(),
            ttl: body.ttl_secs.map(Duration::from_secs),
            rate_limit_override: body.rate_limit_override,
        })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let (token, _) = registry
        .mint(gate.codec(), &issued.key_id, state.token_ttl)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    tracing::info!(
        key_id = %issued.key_id,
        by = %admin.identifier(None),
        "api key issued"
    );
    Ok((
        StatusCode::CREATED,
        Json(IssueCredentialResponse {
            key_id: issued.key_id,
            secret: issued.raw_secret,
            token: token.into_string(),
            expires_at: issued.expires_at,
        }),
    ))
}

/// Revoke an API key.
pub async fn revoke_credential(
    State(state): State<AppState>,
    Extension(admin): Extension<Principal>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.gate.credentials().revoke(&key_id).await {
        Ok(()) => {
            tracing::info!(key_id = %key_id, by = %admin.identifier(None), "api key revoked");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(CredentialError::NotFound(key_id)) => Err(ApiError::NotFound(key_id)),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetRateLimitRequest {
    /// Principal identifier: a key id, user id or `anonymous@<ip>`.
    pub identifier: String,
    /// Route identifier (request path).
    pub route: String,
}

/// Clear one rate-limit window.
pub async fn reset_rate_limit(
    State(state): State<AppState>,
    Extension(admin): Extension<Principal>,
    Json(body): Json<ResetRateLimitRequest>,
) -> Result<StatusCode, ApiError> {
    let key = state.gate.rate_limit_key(&body.identifier, &body.route);
    state
        .gate
        .limiter()
        .reset(&key)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    tracing::info!(key = %key, by = %admin.identifier(None), "rate limit reset by admin");
    Ok(StatusCode::NO_CONTENT)
}
