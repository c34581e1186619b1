//! HTTP error responses.
//!
//! Every error body is `{"error": <code>, "message": <generic text>}`.
//! Internal detail is logged or audited, never returned.

use std::fmt;

use axum::Json;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::audit::RejectionReason;
use crate::gate::Rejection;
use crate::ratelimit::Decision;

/// `X-RateLimit-Limit` header name.
pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining` header name.
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset` header name.
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(ErrorBody { error: code, message })).into_response()
}

/// Write the rate-limit headers for a decision. The reset header is
/// omitted when unknown.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if let Some(reset_at) = decision.reset_at {
        headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_at));
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let reason = self.reason();
        let (status, message) = match reason {
            RejectionReason::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "Could not validate credentials")
            }
            RejectionReason::Forbidden => (StatusCode::FORBIDDEN, "Insufficient permissions"),
            RejectionReason::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded")
            }
        };

        let mut response = error_response(status, reason.code(), message);
        let headers = response.headers_mut();
        apply_rate_limit_headers(headers, &self.decision);
        match reason {
            RejectionReason::Unauthenticated => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            RejectionReason::RateLimited => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(self.decision.window_secs));
            }
            RejectionReason::Forbidden => {}
        }
        response
    }
}

/// Errors returned by route handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request body is invalid.
    BadRequest(String),
    /// Credentials presented to a handler were rejected.
    Unauthorized,
    /// The named resource does not exist.
    NotFound(String),
    /// The operation has no backing implementation.
    NotImplemented(&'static str),
    /// A dependency could not be reached.
    Unavailable(String),
    /// An unexpected internal failure.
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(message) => write!(f, "bad request: {message}"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::NotFound(resource) => write!(f, "not found: {resource}"),
            Self::NotImplemented(operation) => write!(f, "not implemented: {operation}"),
            Self::Unavailable(reason) => write!(f, "service unavailable: {reason}"),
            Self::Internal(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            Self::Unauthorized => {
                let mut response = error_response(
                    StatusCode::UNAUTHORIZED,
                    RejectionReason::Unauthenticated.code(),
                    "Could not validate credentials",
                );
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                response
            }
            Self::NotFound(_) => error_response(StatusCode::NOT_FOUND, "not_found", "Not found"),
            Self::NotImplemented(operation) => error_response(
                StatusCode::NOT_IMPLEMENTED,
                "not_implemented",
                &format!("{operation} is not available"),
            ),
            Self::Unavailable(reason) => {
                tracing::error!(reason = %reason, "dependency unavailable");
                error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "Service temporarily unavailable",
                )
            }
            Self::Internal(reason) => {
                tracing::error!(reason = %reason, "internal error");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error",
                )
            }
        }
    }
}
