//! A read-only token scoped to one guild.

use axum::http::StatusCode;
use serde_json::json;

use crate::auth::PermissionLevel;
use crate::e2e_tests::helpers::*;

#[tokio::test]
async fn test_read_only_token_in_one_guild() {
    let test = TestApp::new();
    let token = test.token_for(&user_grant("reader", &[PermissionLevel::ReadOnly], &["g1"]));

    // ReadWrite on g1: insufficient level.
    let resp = test
        .post(
            "/v1/guilds/g1/channels/c1/messages",
            Some(&token),
            json!({"content": "hi"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.body["error"], "forbidden");
    assert!(resp.header("x-ratelimit-limit").is_some());

    // ReadOnly on g2: out of scope.
    let resp = test.get("/v1/guilds/g2/search", Some(&token)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    // ReadOnly on g1: admitted, then the handler answers.
    let resp = test
        .get("/v1/guilds/g1/channels/c1/messages", Some(&token))
        .await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(resp.header("x-ratelimit-remaining"), Some("99"));

    let events = test.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.label() == "forbidden"));
    assert_eq!(events[1].route.as_deref(), Some("/v1/guilds/g2/search"));
    assert_eq!(events[1].client_addr.map(|ip| ip.to_string()).as_deref(), Some("198.51.100.7"));
}

#[tokio::test]
async fn test_scope_uses_decoded_path_segments() {
    let test = TestApp::new();
    let g1_reader = test.token_for(&user_grant("reader", &[PermissionLevel::ReadOnly], &["g1"]));
    let g2_reader = test.token_for(&user_grant("other", &[PermissionLevel::ReadOnly], &["g2"]));

    // `g%31` is `g1` to the handler, so it is `g1` to the gate too.
    let resp = test.get("/v1/guilds/g%31/search", Some(&g1_reader)).await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);

    let resp = test.get("/v1/guilds/g%31/search", Some(&g2_reader)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);

    let resp = test
        .get("/v1/guilds/g%31/channels/c%31/messages", Some(&g1_reader))
        .await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_whoami_returns_principal() {
    let test = TestApp::new();
    let token = test.token_for(&user_grant(
        "mod",
        &[PermissionLevel::ReadOnly, PermissionLevel::Moderate],
        &[],
    ));

    let resp = test.get("/v1/whoami", Some(&token)).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body["user_id"], "mod");
    assert_eq!(resp.body["permissions"], json!(["read_only", "moderate"]));
}

#[tokio::test]
async fn test_moderate_and_admin_levels() {
    let test = TestApp::new();
    let moderator = test.token_for(&user_grant("mod", &[PermissionLevel::Moderate], &[]));

    let resp = test
        .post(
            "/v1/guilds/g1/channels/c1/moderation",
            Some(&moderator),
            json!({"action": "timeout"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);

    // Moderate implies ReadWrite.
    let resp = test
        .post(
            "/v1/guilds/g1/channels/c1/messages",
            Some(&moderator),
            json!({"content": "hi"}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::NOT_IMPLEMENTED);

    let resp = test
        .post(
            "/v1/admin/credentials",
            Some(&moderator),
            json!({"name": "x", "permissions": ["read_only"]}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
}
