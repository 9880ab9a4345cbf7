mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn overlapping_appointments_are_rejected() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    let first = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Rate review",
                "startTime": "2026-09-01T10:00:00Z",
                "endTime": "2026-09-01T10:45:00Z",
                "category": "Client Meeting"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = body_to_json(first.into_body()).await?;
    let first_id = first_body["id"].as_str().unwrap();

    // Starts inside the existing block.
    let overlapping = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Loan walkthrough",
                "startTime": "2026-09-01T10:30:00Z",
                "endTime": "2026-09-01T11:00:00Z",
                "category": "Client Meeting"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(overlapping.status(), StatusCode::CONFLICT);
    let conflict = body_to_json(overlapping.into_body()).await?;
    assert_eq!(conflict["conflictingAppointment"]["id"], first_id);
    assert_eq!(conflict["conflictingAppointment"]["title"], "Rate review");

    // Touching boundary is allowed: half-open intervals.
    let adjacent = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Loan walkthrough",
                "startTime": "2026-09-01T10:45:00Z",
                "endTime": "2026-09-01T11:15:00Z",
                "category": "Client Meeting"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(adjacent.status(), StatusCode::CREATED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn fully_contained_intervals_conflict() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    let existing = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Mid-morning sync",
                "startTime": "2026-09-02T10:15:00Z",
                "endTime": "2026-09-02T10:30:00Z",
                "category": "Internal"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(existing.status(), StatusCode::CREATED);

    // The candidate swallows the existing block whole.
    let surrounding = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Long planning block",
                "startTime": "2026-09-02T10:00:00Z",
                "endTime": "2026-09-02T11:00:00Z",
                "category": "Internal"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(surrounding.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn updates_enforce_the_invariant_and_exclude_self() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    let first = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Morning review",
                "startTime": "2026-09-03T09:00:00Z",
                "endTime": "2026-09-03T09:30:00Z",
                "category": "Internal"
            }),
            Some(&token),
        )
        .await?;
    let first_body = body_to_json(first.into_body()).await?;
    let first_id = first_body["id"].as_str().unwrap().to_string();

    let second = app
        .post_json(
            "/api/appointments",
            &json!({
                "title": "Afternoon review",
                "startTime": "2026-09-03T14:00:00Z",
                "endTime": "2026-09-03T14:30:00Z",
                "category": "Internal"
            }),
            Some(&token),
        )
        .await?;
    let second_body = body_to_json(second.into_body()).await?;
    let second_id = second_body["id"].as_str().unwrap().to_string();

    // Rescheduling only its own start must not self-conflict.
    let nudged = app
        .put_json(
            &format!("/api/appointments/{first_id}"),
            &json!({ "startTime": "2026-09-03T09:10:00Z" }),
            Some(&token),
        )
        .await?;
    assert_eq!(nudged.status(), StatusCode::OK);

    // Moving the second onto the first is rejected.
    let collided = app
        .put_json(
            &format!("/api/appointments/{second_id}"),
            &json!({
                "startTime": "2026-09-03T09:15:00Z",
                "endTime": "2026-09-03T09:45:00Z"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(collided.status(), StatusCode::CONFLICT);

    let inverted = app
        .put_json(
            &format!("/api/appointments/{second_id}"),
            &json!({ "endTime": "2026-09-03T13:00:00Z" }),
            Some(&token),
        )
        .await?;
    assert_eq!(inverted.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn different_owners_may_overlap() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("alice@lender.test", "alice-pass", "LO")
        .await?;
    app.insert_user("bob@lender.test", "bob-pass", "LO").await?;
    let alice_token = app.login_token("alice@lender.test", "alice-pass").await?;
    let bob_token = app.login_token("bob@lender.test", "bob-pass").await?;

    let slot = json!({
        "title": "Team standup",
        "startTime": "2026-09-04T09:00:00Z",
        "endTime": "2026-09-04T09:30:00Z",
        "category": "Internal"
    });

    let alice = app
        .post_json("/api/appointments", &slot, Some(&alice_token))
        .await?;
    assert_eq!(alice.status(), StatusCode::CREATED);
    let bob = app
        .post_json("/api/appointments", &slot, Some(&bob_token))
        .await?;
    assert_eq!(bob.status(), StatusCode::CREATED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn calendar_groups_by_day() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("officer@lender.test", "secret-pass", "LO")
        .await?;
    let token = app.login_token("officer@lender.test", "secret-pass").await?;

    for (start, end) in [
        ("2026-09-10T09:00:00Z", "2026-09-10T09:30:00Z"),
        ("2026-09-10T15:00:00Z", "2026-09-10T15:30:00Z"),
        ("2026-09-21T09:00:00Z", "2026-09-21T09:30:00Z"),
    ] {
        let created = app
            .post_json(
                "/api/appointments",
                &json!({
                    "title": "Client call",
                    "startTime": start,
                    "endTime": end,
                    "category": "Client Meeting"
                }),
                Some(&token),
            )
            .await?;
        assert_eq!(created.status(), StatusCode::CREATED);
    }

    let calendar = app
        .get("/api/appointments/calendar/2026/9", Some(&token))
        .await?;
    assert_eq!(calendar.status(), StatusCode::OK);
    let body = body_to_json(calendar.into_body()).await?;
    assert_eq!(body["total"], 3);
    assert_eq!(body["appointments"]["2026-09-10"].as_array().unwrap().len(), 2);
    assert_eq!(body["appointments"]["2026-09-21"].as_array().unwrap().len(), 1);

    app.cleanup().await?;
    Ok(())
}
