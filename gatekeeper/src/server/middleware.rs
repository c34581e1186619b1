//! Runs the gate in front of each protected route.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{ConnectInfo, RawPathParams, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::{ApiError, apply_rate_limit_headers};
use crate::gate::{AuthenticationGate, GateRequest, RoutePolicy};

/// Per-route middleware state: the shared gate and the route's policy.
#[derive(Clone)]
pub struct RouteGuard {
    pub(crate) gate: Arc<AuthenticationGate>,
    pub(crate) policy: Arc<RoutePolicy>,
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// Other schemes, and an empty token, count as no token.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authorize the request; forward it with its principal attached, or answer
/// with the rejection.
///
/// Scope comes from the decoded path parameters, the same values the
/// handler's `Path` extractor sees.
pub async fn enforce(
    State(guard): State<RouteGuard>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    mut request: Request,
    next: Next,
) -> Response {
    let scope = match params {
        Ok(params) => guard.policy.scope_from_params(params.iter()),
        Err(_) => guard.policy.scope_from_params(std::iter::empty::<(&str, &str)>()),
    };
    let Some(scope) = scope else {
        return ApiError::BadRequest("invalid path parameters".to_string()).into_response();
    };

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    // Owned so the request body is not borrowed across the await.
    let bearer = bearer_token(request.headers()).map(str::to_string);

    let outcome = guard
        .gate
        .authorize(&GateRequest {
            method: &method,
            path: &path,
            bearer: bearer.as_deref(),
            scope: &scope,
            client_addr,
            policy: &guard.policy,
        })
        .await;

    match outcome {
        Ok(admission) => {
            let decision = admission.decision;
            request.extensions_mut().insert(admission.principal);
            request.extensions_mut().insert(decision);

            let mut response = next.run(request).await;
            apply_rate_limit_headers(response.headers_mut(), &decision);
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}
