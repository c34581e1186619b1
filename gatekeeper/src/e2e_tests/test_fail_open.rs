//! Requests keep flowing when the rate-limit store is down.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::audit::AuditOutcome;
use crate::auth::PermissionLevel;
use crate::e2e_tests::helpers::*;
use crate::gate::GateSettings;
use crate::testing::UnavailableBackend;

#[tokio::test]
async fn test_unavailable_store_admits_and_reports() {
    let test = TestApp::with(Arc::new(UnavailableBackend), GateSettings::default());
    let token = test.token_for(&user_grant("u", &[PermissionLevel::ReadOnly], &[]));

    for _ in 0..3 {
        let resp = test.get("/v1/whoami", Some(&token)).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.header("x-ratelimit-remaining"), Some("100"));
        assert!(resp.header("x-ratelimit-reset").is_none());
    }

    let events = test.events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| matches!(
        &e.outcome,
        AuditOutcome::Degraded { key, .. } if key == "api:u:/v1/whoami"
    )));
}

#[tokio::test]
async fn test_unavailable_store_still_rejects_bad_tokens() {
    let test = TestApp::with(Arc::new(UnavailableBackend), GateSettings::default());

    let resp = test.get("/v1/whoami", Some("a.b.c")).await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.header("x-ratelimit-remaining"), Some("100"));
}
