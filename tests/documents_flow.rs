mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

async fn create_loan(app: &TestApp, token: &str) -> Result<String> {
    let response = app
        .post_json(
            "/api/loans",
            &json!({
                "borrowerName": "Dana Whitfield",
                "propertyAddress": "12 Orchard Lane, Springfield",
                "loanType": "CONVENTIONAL",
                "loanAmount": "450000.00",
                "targetCloseDate": "2026-11-01T00:00:00Z"
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let loan = body_to_json(response.into_body()).await?;
    Ok(loan["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn upload_flips_requirement_to_received() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;
    let loan_id = create_loan(&app, &token).await?;

    let created = app
        .post_json(
            "/api/documents",
            &json!({
                "name": "W-2 Statement",
                "type": "Income Verification",
                "loanId": loan_id
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let document = body_to_json(created.into_body()).await?;
    assert_eq!(document["status"], "REQUIRED");
    assert_eq!(document["hasFile"], false);
    let document_id = document["id"].as_str().unwrap().to_string();

    let uploaded = app
        .upload_file(
            &format!("/api/documents/{document_id}/upload"),
            "w2-2025.pdf",
            "application/pdf",
            b"%PDF-1.7 payload",
            &token,
        )
        .await?;
    assert_eq!(uploaded.status(), StatusCode::OK);
    let document = body_to_json(uploaded.into_body()).await?;
    assert_eq!(document["status"], "RECEIVED");
    assert_eq!(document["hasFile"], true);
    assert!(document["uploadedAt"].is_string());
    assert_eq!(app.storage().object_count().await, 1);

    let download = app
        .get(&format!("/api/documents/{document_id}/download"), Some(&token))
        .await?;
    assert_eq!(download.status(), StatusCode::OK);
    let body = body_to_json(download.into_body()).await?;
    assert!(body["url"].as_str().unwrap().starts_with("https://fake-storage/"));
    assert_eq!(body["filename"], "W-2 Statement");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn upload_rejects_disallowed_file_types() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;
    let loan_id = create_loan(&app, &token).await?;

    let created = app
        .post_json(
            "/api/documents",
            &json!({
                "name": "Bank Statement",
                "type": "Asset Verification",
                "loanId": loan_id
            }),
            Some(&token),
        )
        .await?;
    let document = body_to_json(created.into_body()).await?;
    let document_id = document["id"].as_str().unwrap().to_string();

    let rejected = app
        .upload_file(
            &format!("/api/documents/{document_id}/upload"),
            "statement.exe",
            "application/octet-stream",
            b"MZ...",
            &token,
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.storage().object_count().await, 0);

    // Download before any upload reads as missing.
    let download = app
        .get(&format!("/api/documents/{document_id}/download"), Some(&token))
        .await?;
    assert_eq!(download.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn delete_removes_the_stored_object() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;
    let loan_id = create_loan(&app, &token).await?;

    let created = app
        .post_json(
            "/api/documents",
            &json!({
                "name": "Appraisal",
                "type": "Property",
                "loanId": loan_id
            }),
            Some(&token),
        )
        .await?;
    let document = body_to_json(created.into_body()).await?;
    let document_id = document["id"].as_str().unwrap().to_string();

    let uploaded = app
        .upload_file(
            &format!("/api/documents/{document_id}/upload"),
            "appraisal.pdf",
            "application/pdf",
            b"%PDF-1.7 appraisal",
            &token,
        )
        .await?;
    assert_eq!(uploaded.status(), StatusCode::OK);
    assert_eq!(app.storage().object_count().await, 1);

    let deleted = app
        .delete(&format!("/api/documents/{document_id}"), Some(&token))
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage().object_count().await, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn documents_follow_the_loan_scope() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("alice@lender.test", "alice-pass", "LO")
        .await?;
    app.insert_user("bob@lender.test", "bob-pass", "LO").await?;
    let alice_token = app.login_token("alice@lender.test", "alice-pass").await?;
    let bob_token = app.login_token("bob@lender.test", "bob-pass").await?;
    let loan_id = create_loan(&app, &alice_token).await?;

    let created = app
        .post_json(
            "/api/documents",
            &json!({
                "name": "W-2 Statement",
                "type": "Income Verification",
                "loanId": loan_id
            }),
            Some(&alice_token),
        )
        .await?;
    let document = body_to_json(created.into_body()).await?;
    let document_id = document["id"].as_str().unwrap().to_string();

    let bob_list = app.get("/api/documents", Some(&bob_token)).await?;
    let body = body_to_json(bob_list.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let bob_update = app
        .put_json(
            &format!("/api/documents/{document_id}"),
            &json!({ "status": "APPROVED" }),
            Some(&bob_token),
        )
        .await?;
    assert_eq!(bob_update.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
