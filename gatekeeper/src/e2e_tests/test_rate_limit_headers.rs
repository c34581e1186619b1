//! Rate-limit headers across a full window.

use axum::http::StatusCode;
use serde_json::json;

use crate::auth::PermissionLevel;
use crate::e2e_tests::helpers::*;
use crate::time::TimeSource;
use crate::gate::GateSettings;

fn limited(limit: u32) -> TestApp {
    TestApp::with_settings(GateSettings {
        default_limit: limit,
        window_secs: 60,
        ..GateSettings::default()
    })
}

#[tokio::test]
async fn test_six_requests_with_limit_five() {
    let test = limited(5);
    let token = test.token_for(&user_grant("u", &[PermissionLevel::ReadOnly], &[]));
    let reset = (test.clock.now_secs() + 60).to_string();

    for remaining in ["4", "3", "2", "1", "0"] {
        let resp = test.get("/v1/whoami", Some(&token)).await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.header("x-ratelimit-limit"), Some("5"));
        assert_eq!(resp.header("x-ratelimit-remaining"), Some(remaining));
        assert_eq!(resp.header("x-ratelimit-reset"), Some(reset.as_str()));
    }

    let resp = test.get("/v1/whoami", Some(&token)).await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.header("retry-after"), Some("60"));
    assert_eq!(resp.header("x-ratelimit-remaining"), Some("0"));
    assert_eq!(resp.body["error"], "rate_limited");

    let events = test.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label(), "rate_limited");
    assert_eq!(events[0].principal.as_deref(), Some("u"));
}

#[tokio::test]
async fn test_window_reopens_after_idle_period() {
    let test = limited(1);
    let token = test.token_for(&user_grant("u", &[PermissionLevel::ReadOnly], &[]));

    assert_eq!(test.get("/v1/whoami", Some(&token)).await.status, StatusCode::OK);
    assert_eq!(
        test.get("/v1/whoami", Some(&token)).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    test.clock.advance_secs(60);
    assert_eq!(test.get("/v1/whoami", Some(&token)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_windows_are_per_route_and_principal() {
    let test = limited(1);
    let alice = test.token_for(&user_grant("alice", &[PermissionLevel::ReadOnly], &[]));
    let bob = test.token_for(&user_grant("bob", &[PermissionLevel::ReadOnly], &[]));

    assert_eq!(test.get("/v1/whoami", Some(&alice)).await.status, StatusCode::OK);
    assert_eq!(test.get("/v1/whoami", Some(&bob)).await.status, StatusCode::OK);
    // Same route template, different concrete path.
    assert_eq!(
        test.get("/v1/guilds/g1/search", Some(&alice)).await.status,
        StatusCode::NOT_IMPLEMENTED
    );
    assert_eq!(
        test.get("/v1/guilds/g2/search", Some(&alice)).await.status,
        StatusCode::NOT_IMPLEMENTED
    );
}

#[tokio::test]
async fn test_admin_reset_reopens_window() {
    let test = limited(1);
    let user = test.token_for(&user_grant("u", &[PermissionLevel::ReadOnly], &[]));
    let admin = test.token_for(&user_grant("root", &[PermissionLevel::Admin], &[]));

    test.get("/v1/whoami", Some(&user)).await;
    assert_eq!(
        test.get("/v1/whoami", Some(&user)).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );

    let resp = test
        .post(
            "/v1/admin/rate-limits/reset",
            Some(&admin),
            json!({"identifier": "u", "route": "/v1/whoami"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);
    assert_eq!(test.get("/v1/whoami", Some(&user)).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_token_route_uses_stricter_limit() {
    let test = TestApp::new();

    for _ in 0..10 {
        let resp = test
            .post("/v1/auth/token", None, json!({"key_id": "key_x", "secret": "nope"}))
            .await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp.header("x-ratelimit-limit"), Some("10"));
    }
    let resp = test
        .post("/v1/auth/token", None, json!({"key_id": "key_x", "secret": "nope"}))
        .await;
    assert_eq!(resp.status, StatusCode::TOO_MANY_REQUESTS);
}
