mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use diesel::dsl::count_star;
use diesel::prelude::*;
use loancrm::contacts::Contact;
use loancrm::models::Task;
use loancrm::schema::{loans, stage_history, tasks};
use serde_json::json;
use uuid::Uuid;

fn fixture_contact() -> Contact {
    Contact {
        id: "ghl-42".to_string(),
        first_name: Some("Dana".to_string()),
        last_name: Some("Whitfield".to_string()),
        email: Some("dana@example.com".to_string()),
        phone: Some("+1-555-0100".to_string()),
        address: Some("12 Orchard Lane, Springfield".to_string()),
        tags: vec!["FHA".to_string()],
    }
}

#[tokio::test]
async fn import_creates_loan_history_and_follow_up_task() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;
    app.contacts().seed(fixture_contact()).await;

    let imported = app
        .post_json(
            "/api/leads/import/ghl-42",
            &json!({
                "loanAmount": "275000.00",
                "targetCloseDate": "2026-12-15T00:00:00Z"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(imported.status(), StatusCode::CREATED);
    let body = body_to_json(imported.into_body()).await?;

    let loan = &body["loan"];
    assert_eq!(loan["borrowerName"], "Dana Whitfield");
    assert_eq!(loan["loanType"], "FHA");
    assert_eq!(loan["currentStage"], "New Lead");
    assert_eq!(body["sourceContact"]["id"], "ghl-42");
    let loan_id: Uuid = loan["id"].as_str().unwrap().parse()?;

    let (history_count, follow_ups) = app
        .with_conn(move |conn| {
            let history: i64 = stage_history::table
                .filter(stage_history::loan_id.eq(loan_id))
                .filter(stage_history::exited_at.is_null())
                .select(count_star())
                .first(conn)?;
            let follow_ups: Vec<Task> = tasks::table
                .filter(tasks::loan_id.eq(Some(loan_id)))
                .load(conn)?;
            Ok((history, follow_ups))
        })
        .await?;

    assert_eq!(history_count, 1);
    assert_eq!(follow_ups.len(), 1);
    assert_eq!(follow_ups[0].priority, "HIGH");
    assert_eq!(follow_ups[0].task_type, "Call");
    assert!(follow_ups[0].due_date.is_some());

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn import_of_unknown_contact_writes_nothing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    let missing = app
        .post_json(
            "/api/leads/import/no-such-contact",
            &json!({
                "loanAmount": "275000.00",
                "targetCloseDate": "2026-12-15T00:00:00Z"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let loan_count = app
        .with_conn(|conn| {
            let count: i64 = loans::table.select(count_star()).first(conn)?;
            Ok(count)
        })
        .await?;
    assert_eq!(loan_count, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sync_updates_existing_directory_contact() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;
    app.contacts().seed(fixture_contact()).await;

    let imported = app
        .post_json(
            "/api/leads/import/ghl-42",
            &json!({
                "loanAmount": "275000.00",
                "targetCloseDate": "2026-12-15T00:00:00Z"
            }),
            Some(&token),
        )
        .await?;
    let body = body_to_json(imported.into_body()).await?;
    let loan_id = body["loan"]["id"].as_str().unwrap().to_string();

    let synced = app
        .post_json(&format!("/api/leads/sync/{loan_id}"), &json!({}), Some(&token))
        .await?;
    assert_eq!(synced.status(), StatusCode::OK);
    let body = body_to_json(synced.into_body()).await?;
    assert_eq!(body["action"], "updated");
    assert_eq!(body["contact"]["id"], "ghl-42");
    let tags = body["contact"]["tags"].as_array().unwrap();
    assert!(tags.iter().any(|tag| tag == "FHA"));
    assert!(tags.iter().any(|tag| tag == "New Lead"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn lead_sources_upsert_and_summary() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("admin@lender.test", "admin-pass", "ADMIN")
        .await?;
    app.insert_user("partner@lender.test", "partner-pass", "PRODUCTION_PARTNER")
        .await?;
    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let admin_token = app.login_token("admin@lender.test", "admin-pass").await?;
    let partner_token = app.login_token("partner@lender.test", "partner-pass").await?;
    let officer_token = app.login_token("officer@lender.test", "secret-pass").await?;

    let created = app
        .post_json(
            "/api/leads/sources",
            &json!({ "name": "Zillow", "totalLeads": 40, "convertedLeads": 10 }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::OK);
    let body = body_to_json(created.into_body()).await?;
    assert_eq!(body["conversionRate"], "25.00");

    // Upsert by name keeps a single row.
    let updated = app
        .post_json(
            "/api/leads/sources",
            &json!({ "name": "Zillow", "totalLeads": 60, "convertedLeads": 20 }),
            Some(&admin_token),
        )
        .await?;
    let body = body_to_json(updated.into_body()).await?;
    assert_eq!(body["totalLeads"], 60);

    let listed = app.get("/api/leads/sources", Some(&partner_token)).await?;
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_to_json(listed.into_body()).await?;
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
    assert_eq!(body["summary"]["totalLeads"], 60);
    assert_eq!(body["summary"]["averageConversion"], 33.33);

    // Plain officers have no access to marketing analytics.
    let denied = app.get("/api/leads/sources", Some(&officer_token)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let denied_post = app
        .post_json(
            "/api/leads/sources",
            &json!({ "name": "Referral" }),
            Some(&partner_token),
        )
        .await?;
    assert_eq!(denied_post.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn external_listing_requires_a_permitted_role() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("assistant@lender.test", "loa-pass", "LOA")
        .await?;
    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let loa_token = app.login_token("assistant@lender.test", "loa-pass").await?;
    let officer_token = app.login_token("officer@lender.test", "secret-pass").await?;
    app.contacts().seed(fixture_contact()).await;

    let denied = app.get("/api/leads/external", Some(&loa_token)).await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let listed = app.get("/api/leads/external", Some(&officer_token)).await?;
    assert_eq!(listed.status(), StatusCode::OK);
    let body = body_to_json(listed.into_body()).await?;
    assert_eq!(body["contacts"].as_array().unwrap().len(), 1);

    app.cleanup().await?;
    Ok(())
}
