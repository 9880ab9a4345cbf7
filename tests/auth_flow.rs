mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn login_and_me_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    let me = app.get("/api/auth/me", Some(&token)).await?;
    assert_eq!(me.status(), StatusCode::OK);
    let body = body_to_json(me.into_body()).await?;
    assert_eq!(body["email"], "officer@lender.test");
    assert_eq!(body["role"], "LO");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn rejects_bad_password_and_missing_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;

    let bad = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "officer@lender.test", "password": "wrong" }),
            None,
        )
        .await?;
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

    let unauthenticated = app.get("/api/loans", None).await?;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn inactive_users_cannot_authenticate() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user_with_status("gone@lender.test", "secret-pass", "LO", false)
        .await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "email": "gone@lender.test", "password": "secret-pass" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deactivation_revokes_existing_tokens() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let target = app
        .insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    app.insert_user("admin@lender.test", "admin-pass", "ADMIN")
        .await?;
    let officer_token = app.login_token("officer@lender.test", "secret-pass").await?;
    let admin_token = app.login_token("admin@lender.test", "admin-pass").await?;

    let toggled = app
        .put_json(
            &format!("/api/users/{target}/status"),
            &json!({}),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(toggled.status(), StatusCode::OK);

    // The bearer token still decodes, but the live user row is inactive.
    let denied = app.get("/api/loans", Some(&officer_token)).await?;
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
