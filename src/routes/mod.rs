use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod appointments;
pub mod auth;
pub mod communications;
pub mod dashboard;
pub mod documents;
pub mod health;
pub mod leads;
pub mod loans;
pub mod notifications;
pub mod tasks;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let loans_routes = Router::new()
        .route("/", get(loans::list_loans).post(loans::create_loan))
        .route("/pipeline/stages", get(loans::pipeline_stages))
        .route(
            "/:id",
            get(loans::get_loan)
                .put(loans::update_loan)
                .delete(loans::delete_loan),
        );

    let tasks_routes = Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route("/summary", get(tasks::task_summary))
        .route(
            "/:id",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/:id/complete", put(tasks::complete_task));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            put(documents::update_document).delete(documents::delete_document),
        )
        .route("/:id/upload", post(documents::upload_document))
        .route("/:id/download", get(documents::download_document));

    let communications_routes = Router::new()
        .route(
            "/",
            get(communications::list_communications).post(communications::create_communication),
        )
        .route("/recent", get(communications::recent_communications))
        .route("/stats", get(communications::communication_stats))
        .route(
            "/:id",
            put(communications::update_communication)
                .delete(communications::delete_communication),
        );

    let notifications_routes = Router::new()
        .route(
            "/",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route("/broadcast", post(notifications::broadcast_notification))
        .route("/summary", get(notifications::notification_summary))
        .route("/read-all", put(notifications::mark_all_read))
        .route(
            "/clear-read",
            axum::routing::delete(notifications::clear_read),
        )
        .route("/:id/read", put(notifications::mark_read))
        .route(
            "/:id",
            axum::routing::delete(notifications::delete_notification),
        );

    let appointments_routes = Router::new()
        .route(
            "/",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route("/today", get(appointments::today_appointments))
        .route("/upcoming", get(appointments::upcoming_appointments))
        .route("/categories", get(appointments::appointment_categories))
        .route(
            "/calendar/:year/:month",
            get(appointments::calendar_appointments),
        )
        .route(
            "/:id",
            put(appointments::update_appointment).delete(appointments::delete_appointment),
        );

    let dashboard_routes = Router::new()
        .route("/overview", get(dashboard::overview))
        .route("/performance", get(dashboard::performance))
        .route("/analytics", get(dashboard::analytics));

    let users_routes = Router::new()
        .route("/", get(users::list_users))
        .route(
            "/profile",
            get(users::get_profile).put(users::update_profile),
        )
        .route("/:id/permissions", put(users::update_permissions))
        .route("/:id/status", put(users::update_status));

    let leads_routes = Router::new()
        .route("/external", get(leads::external_leads))
        .route("/import/:contact_id", post(leads::import_lead))
        .route("/sync/:loan_id", post(leads::sync_lead))
        .route(
            "/sources",
            get(leads::lead_sources).post(leads::upsert_lead_source),
        );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/loans", loans_routes)
        .nest("/api/tasks", tasks_routes)
        .nest("/api/documents", documents_routes)
        .nest("/api/communications", communications_routes)
        .nest("/api/notifications", notifications_routes)
        .nest("/api/appointments", appointments_routes)
        .nest("/api/dashboard", dashboard_routes)
        .nest("/api/users", users_routes)
        .nest("/api/leads", leads_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    let body_limit = state.config.max_upload_bytes as usize + 64 * 1024;

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
}
