mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn broadcast_reaches_only_active_role_holders() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@lender.test", "admin-pass", "ADMIN")
        .await?;
    for index in 0..5 {
        app.insert_user(&format!("lo{index}@lender.test"), "lo-pass", "LO")
            .await?;
    }
    for index in 0..2 {
        app.insert_user_with_status(
            &format!("inactive{index}@lender.test"),
            "lo-pass",
            "LO",
            false,
        )
        .await?;
    }
    app.insert_user("partner@lender.test", "partner-pass", "PRODUCTION_PARTNER")
        .await?;
    let admin_token = app.login_token("admin@lender.test", "admin-pass").await?;

    let broadcast = app
        .post_json(
            "/api/notifications/broadcast",
            &json!({
                "title": "Rate sheet updated",
                "message": "Today's pricing is live.",
                "type": "INFO",
                "roles": ["LO"]
            }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(broadcast.status(), StatusCode::CREATED);
    let body = body_to_json(broadcast.into_body()).await?;
    assert_eq!(body["count"], 5);

    // One recipient sees exactly one unread notification.
    let lo_token = app.login_token("lo0@lender.test", "lo-pass").await?;
    let list = app.get("/api/notifications", Some(&lo_token)).await?;
    let body = body_to_json(list.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["unreadCount"], 1);

    // The production partner holds no LO role and gets nothing.
    let partner_token = app.login_token("partner@lender.test", "partner-pass").await?;
    let list = app.get("/api/notifications", Some(&partner_token)).await?;
    let body = body_to_json(list.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn broadcast_requires_admin() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    let denied = app
        .post_json(
            "/api/notifications/broadcast",
            &json!({
                "title": "Hello",
                "message": "World",
                "type": "INFO"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn read_flags_and_cleanup_flow() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let officer = app
        .insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    app.insert_user("admin@lender.test", "admin-pass", "ADMIN")
        .await?;
    let officer_token = app.login_token("officer@lender.test", "secret-pass").await?;
    let admin_token = app.login_token("admin@lender.test", "admin-pass").await?;

    for index in 0..3 {
        let created = app
            .post_json(
                "/api/notifications",
                &json!({
                    "title": format!("Alert {index}"),
                    "message": "Check the pipeline.",
                    "type": "WARNING",
                    "userId": officer
                }),
                Some(&admin_token),
            )
            .await?;
        assert_eq!(created.status(), StatusCode::CREATED);
    }

    let list = app.get("/api/notifications", Some(&officer_token)).await?;
    let body = body_to_json(list.into_body()).await?;
    let first_id = body["data"][0]["id"].as_str().unwrap().to_string();
    assert_eq!(body["unreadCount"], 3);

    let marked = app
        .put_json(
            &format!("/api/notifications/{first_id}/read"),
            &json!({}),
            Some(&officer_token),
        )
        .await?;
    assert_eq!(marked.status(), StatusCode::OK);
    let body = body_to_json(marked.into_body()).await?;
    assert_eq!(body["isRead"], true);

    let marked_all = app
        .put_json("/api/notifications/read-all", &json!({}), Some(&officer_token))
        .await?;
    let body = body_to_json(marked_all.into_body()).await?;
    assert_eq!(body["updatedCount"], 2);

    let cleared = app
        .delete("/api/notifications/clear-read", Some(&officer_token))
        .await?;
    assert_eq!(cleared.status(), StatusCode::OK);
    let body = body_to_json(cleared.into_body()).await?;
    assert_eq!(body["deletedCount"], 3);

    let summary = app
        .get("/api/notifications/summary", Some(&officer_token))
        .await?;
    let body = body_to_json(summary.into_body()).await?;
    assert_eq!(body["total"], 0);
    assert_eq!(body["unread"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn notifications_are_private_to_their_owner() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let alice = app
        .insert_user("alice@lender.test", "alice-pass", "LO")
        .await?;
    app.insert_user("bob@lender.test", "bob-pass", "LO").await?;
    app.insert_user("admin@lender.test", "admin-pass", "ADMIN")
        .await?;
    let bob_token = app.login_token("bob@lender.test", "bob-pass").await?;
    let admin_token = app.login_token("admin@lender.test", "admin-pass").await?;

    let created = app
        .post_json(
            "/api/notifications",
            &json!({
                "title": "For Alice",
                "message": "Private note.",
                "type": "INFO",
                "userId": alice
            }),
            Some(&admin_token),
        )
        .await?;
    let body = body_to_json(created.into_body()).await?;
    let notification_id = body["id"].as_str().unwrap().to_string();

    let bob_read = app
        .put_json(
            &format!("/api/notifications/{notification_id}/read"),
            &json!({}),
            Some(&bob_token),
        )
        .await?;
    assert_eq!(bob_read.status(), StatusCode::NOT_FOUND);

    let bob_delete = app
        .delete(
            &format!("/api/notifications/{notification_id}"),
            Some(&bob_token),
        )
        .await?;
    assert_eq!(bob_delete.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
