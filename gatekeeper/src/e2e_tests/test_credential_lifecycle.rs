//! Issue, exchange, use and revoke an API key over HTTP.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::auth::PermissionLevel;
use crate::e2e_tests::helpers::*;
use crate::time::TimeSource;

#[tokio::test]
async fn test_issue_exchange_revoke() {
    let test = TestApp::new();
    let admin = test.token_for(&user_grant("root", &[PermissionLevel::Admin], &[]));

    let resp = test
        .post(
            "/v1/admin/credentials",
            Some(&admin),
            json!({
                "name": "bot",
                "permissions": ["read_write"],
                "guild_ids": ["g1"],
                "ttl_secs": 7200,
            }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let key_id = resp.body["key_id"].as_str().expect("key_id").to_string();
    let secret = resp.body["secret"].as_str().expect("secret").to_string();
    let issued_token = resp.body["token"].as_str().expect("token").to_string();
    assert!(key_id.starts_with("key_"));
    assert_eq!(resp.body["expires_at"], test.clock.now_secs() + 7200);

    // The token returned at issuance works.
    let resp = test.get("/v1/whoami", Some(&issued_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["key_id"], key_id.as_str());

    // Exchange the raw secret for a fresh token.
    let resp = test
        .post(
            "/v1/auth/token",
            None,
            json!({"key_id": key_id, "secret": secret}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["token_type"], "bearer");
    assert_eq!(resp.body["expires_in"], 3600);
    let token = resp.body["access_token"].as_str().expect("access_token").to_string();

    let resp = test
        .post(
            "/v1/guilds/g1/channels/c1/messages",
            Some(&token),
            json!({"content": "hello"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);

    // Revoke; both tokens stop working.
    let resp = test
        .send(
            Method::DELETE,
            &format!("/v1/admin/credentials/{key_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    for bearer in [&token, &issued_token] {
        let resp = test.get("/v1/whoami", Some(bearer)).await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
        assert_eq!(resp.header("www-authenticate"), Some("Bearer"));
    }

    let resp = test
        .post(
            "/v1/auth/token",
            None,
            json!({"key_id": key_id, "secret": secret}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_exchange_with_wrong_secret() {
    let test = TestApp::new();
    let admin = test.token_for(&user_grant("root", &[PermissionLevel::Admin], &[]));

    let resp = test
        .post(
            "/v1/admin/credentials",
            Some(&admin),
            json!({"name": "bot", "permissions": ["read_only"]}),
        )
        .await;
    let key_id = resp.body["key_id"].as_str().expect("key_id").to_string();

    let resp = test
        .post(
            "/v1/auth/token",
            None,
            json!({"key_id": key_id, "secret": "guess"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp.body["error"], "unauthenticated");

    let events = test.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].principal.as_deref(), Some(key_id.as_str()));
    assert_eq!(
        events[0].client_addr.map(|ip| ip.to_string()).as_deref(),
        Some("198.51.100.7")
    );
}

#[tokio::test]
async fn test_credential_rate_limit_override() {
    let test = TestApp::new();
    let admin = test.token_for(&user_grant("root", &[PermissionLevel::Admin], &[]));

    let resp = test
        .post(
            "/v1/admin/credentials",
            Some(&admin),
            json!({
                "name": "slow-bot",
                "permissions": ["read_only"],
                "rate_limit_override": 2,
            }),
        )
        .await;
    let token = resp.body["token"].as_str().expect("token").to_string();

    let resp = test.get("/v1/whoami", Some(&token)).await;
    assert_eq!(resp.header("x-ratelimit-limit"), Some("2"));
    test.get("/v1/whoami", Some(&token)).await;
    assert_eq!(
        test.get("/v1/whoami", Some(&token)).await.status,
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_issue_validation_and_unknown_revoke() {
    let test = TestApp::new();
    let admin = test.token_for(&user_grant("root", &[PermissionLevel::Admin], &[]));

    let resp = test
        .post(
            "/v1/admin/credentials",
            Some(&admin),
            json!({"name": "bot", "permissions": []}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = test
        .send(
            Method::DELETE,
            "/v1/admin/credentials/key_missing",
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}
