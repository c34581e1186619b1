//! Requests without usable credentials.

use axum::http::StatusCode;

use crate::auth::PermissionLevel;
use crate::e2e_tests::helpers::*;

#[tokio::test]
async fn test_health_is_ungated() {
    let test = TestApp::new();

    let resp = test.get("/health", None).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["status"], "healthy");
    assert!(resp.header("x-ratelimit-limit").is_none());
    assert!(test.events().is_empty());
}

#[tokio::test]
async fn test_missing_token() {
    let test = TestApp::new();

    let resp = test.get("/v1/whoami", None).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.header("www-authenticate"), Some("Bearer"));
    assert_eq!(resp.header("x-ratelimit-limit"), Some("100"));
    assert_eq!(resp.header("x-ratelimit-remaining"), Some("100"));
    assert_eq!(resp.body["error"], "unauthenticated");
    assert!(resp.body["message"].is_string());

    let events = test.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].method.as_deref(), Some("GET"));
    assert_eq!(events[0].principal, None);
}

#[tokio::test]
async fn test_tampered_and_expired_tokens() {
    let test = TestApp::new();
    let token = test.token_for(&user_grant("u", &[PermissionLevel::Admin], &[]));

    let mut tampered = token.clone().into_bytes();
    let last = tampered.len() - 2;
    tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).expect("ascii token");
    assert_eq!(
        test.get("/v1/whoami", Some(&tampered)).await.status,
        StatusCode::UNAUTHORIZED
    );

    assert_eq!(
        test.get("/v1/whoami", Some("garbage")).await.status,
        StatusCode::UNAUTHORIZED
    );

    assert_eq!(test.get("/v1/whoami", Some(&token)).await.status, StatusCode::OK);
    test.clock.advance_secs(3600);
    assert_eq!(
        test.get("/v1/whoami", Some(&token)).await.status,
        StatusCode::UNAUTHORIZED
    );

    let details: Vec<String> = test
        .events()
        .into_iter()
        .filter_map(|e| match e.outcome {
            crate::audit::AuditOutcome::Rejected { detail, .. } => Some(detail),
            _ => None,
        })
        .collect();
    assert_eq!(
        details,
        vec![
            "invalid token signature".to_string(),
            "malformed token".to_string(),
            "token has expired".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_non_bearer_scheme_is_missing_token() {
    let test = TestApp::new();
    let request = axum::http::Request::builder()
        .uri("/v1/whoami")
        .header("authorization", "Basic dXNlcjpwYXNz")
        .body(axum::body::Body::empty())
        .expect("valid request");

    let response = tower::ServiceExt::oneshot(test.app.clone(), request)
        .await
        .expect("router is infallible");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
