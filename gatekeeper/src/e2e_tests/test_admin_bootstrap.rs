//! A fresh server reaches its admin routes through the bootstrap key.

use axum::http::{Method, StatusCode};
use serde_json::json;

use crate::e2e_tests::helpers::*;

const ADMIN_SECRET: &str = "bootstrap-admin-secret-0123";

#[tokio::test]
async fn test_bootstrap_key_exchanges_for_admin_token() {
    let test = TestApp::new();
    let key_id = test.seed_admin(ADMIN_SECRET).await;

    let resp = test
        .post(
            "/v1/auth/token",
            None,
            json!({"key_id": key_id, "secret": ADMIN_SECRET}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::OK);
    let admin = resp.body["access_token"].as_str().expect("access_token").to_string();

    let resp = test
        .post(
            "/v1/admin/credentials",
            Some(&admin),
            json!({"name": "first-bot", "permissions": ["read_only"]}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let bot_token = resp.body["token"].as_str().expect("token").to_string();

    let resp = test.get("/v1/whoami", Some(&bot_token)).await;
    assert_eq!(resp.status, StatusCode::OK);
}

#[tokio::test]
async fn test_revoked_bootstrap_key_stays_revoked_after_reseed() {
    let test = TestApp::new();
    let key_id = test.seed_admin(ADMIN_SECRET).await;

    let resp = test
        .post(
            "/v1/auth/token",
            None,
            json!({"key_id": key_id, "secret": ADMIN_SECRET}),
        )
        .await;
    let admin = resp.body["access_token"].as_str().expect("access_token").to_string();

    let resp = test
        .send(
            Method::DELETE,
            &format!("/v1/admin/credentials/{key_id}"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    assert_eq!(test.seed_admin(ADMIN_SECRET).await, key_id);
    let resp = test
        .post(
            "/v1/auth/token",
            None,
            json!({"key_id": key_id, "secret": ADMIN_SECRET}),
        )
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        test.get("/v1/whoami", Some(&admin)).await.status,
        StatusCode::UNAUTHORIZED
    );
}
