use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{self, Action, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{NewNotification, Notification};
use crate::schema::{notifications, users};
use crate::state::AppState;
use crate::utils::{
    pagination::{PageQuery, Paginated},
    to_iso,
};

pub const NOTIFICATION_TYPES: &[&str] = &["INFO", "WARNING", "ERROR", "SUCCESS"];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notif_type: String,
    pub is_read: bool,
    pub created_at: String,
}

impl From<Notification> for NotificationResponse {
    fn from(notification: Notification) -> Self {
        Self {
            id: notification.id,
            title: notification.title,
            message: notification.message,
            notif_type: notification.notif_type,
            is_read: notification.is_read,
            created_at: to_iso(notification.created_at),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationListQuery {
    pub unread: Option<bool>,
    #[serde(rename = "type")]
    pub notif_type: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationListResponse {
    pub data: Vec<NotificationResponse>,
    pub unread_count: i64,
    pub pagination: crate::utils::pagination::Pagination,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<NotificationListResponse>> {
    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    if let Some(notif_type) = params.notif_type.as_deref() {
        if !NOTIFICATION_TYPES.contains(&notif_type) {
            return Err(AppError::validation(vec![FieldError::new(
                "type",
                "unknown notification type",
            )]));
        }
    }

    let mut conn = state.db()?;

    let mut query = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .select(count_star())
        .into_boxed();

    if params.unread == Some(true) {
        query = query.filter(notifications::is_read.eq(false));
        count_query = count_query.filter(notifications::is_read.eq(false));
    }
    if let Some(ref notif_type) = params.notif_type {
        query = query.filter(notifications::notif_type.eq(notif_type.clone()));
        count_query = count_query.filter(notifications::notif_type.eq(notif_type.clone()));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<Notification> = query
        .order(notifications::created_at.desc())
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    let unread_count: i64 = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::is_read.eq(false))
        .select(count_star())
        .first(&mut conn)?;

    let paginated = Paginated::new(
        rows.into_iter().map(NotificationResponse::from).collect(),
        total,
        page,
    );

    Ok(Json(NotificationListResponse {
        data: paginated.data,
        unread_count,
        pagination: paginated.pagination,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notif_type: String,
    pub user_id: Uuid,
}

fn validate_notification_content(
    title: &str,
    message: &str,
    notif_type: &str,
) -> AppResult<(String, String)> {
    let mut errors = Vec::new();
    let title = title.trim().to_string();
    if title.is_empty() || title.len() > 200 {
        errors.push(FieldError::new("title", "must be 1 to 200 characters"));
    }
    let message = message.trim().to_string();
    if message.is_empty() || message.len() > 1000 {
        errors.push(FieldError::new("message", "must be 1 to 1000 characters"));
    }
    if !NOTIFICATION_TYPES.contains(&notif_type) {
        errors.push(FieldError::new("type", "unknown notification type"));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }
    Ok((title, message))
}

pub async fn create_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateNotificationRequest>,
) -> AppResult<(StatusCode, Json<NotificationResponse>)> {
    if !access::can(&user, Action::SendNotifications) {
        return Err(AppError::forbidden());
    }

    let (title, message) =
        validate_notification_content(&payload.title, &payload.message, &payload.notif_type)?;

    let mut conn = state.db()?;
    let target_exists: i64 = users::table
        .filter(users::id.eq(payload.user_id))
        .select(count_star())
        .first(&mut conn)?;
    if target_exists == 0 {
        return Err(AppError::not_found());
    }

    let new_notification = NewNotification {
        id: Uuid::new_v4(),
        user_id: payload.user_id,
        title,
        message,
        notif_type: payload.notif_type,
    };

    diesel::insert_into(notifications::table)
        .values(&new_notification)
        .execute(&mut conn)?;

    let notification: Notification = notifications::table
        .find(new_notification.id)
        .first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(notification.into())))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notif_type: String,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub count: usize,
}

/// Fan-out create across the resolved recipient set: an explicit id list, a
/// role list (primary role or granted permission), or every active user.
/// Inactive users never receive a broadcast.
pub async fn broadcast_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<BroadcastRequest>,
) -> AppResult<(StatusCode, Json<BroadcastResponse>)> {
    if !access::can(&user, Action::SendNotifications) {
        return Err(AppError::forbidden());
    }

    let (title, message) =
        validate_notification_content(&payload.title, &payload.message, &payload.notif_type)?;

    let roles: Vec<String> = payload
        .roles
        .iter()
        .map(|value| {
            Role::parse(value)
                .map(|role| role.as_str().to_string())
                .ok_or_else(|| {
                    AppError::validation(vec![FieldError::new("roles", "unknown role")])
                })
        })
        .collect::<Result<_, _>>()?;

    let mut conn = state.db()?;

    let target_ids: Vec<Uuid> = if !payload.user_ids.is_empty() {
        users::table
            .filter(users::id.eq_any(&payload.user_ids))
            .filter(users::is_active.eq(true))
            .select(users::id)
            .load(&mut conn)?
    } else if !roles.is_empty() {
        users::table
            .filter(
                users::primary_role
                    .eq_any(&roles)
                    .or(users::permissions.overlaps_with(&roles)),
            )
            .filter(users::is_active.eq(true))
            .select(users::id)
            .load(&mut conn)?
    } else {
        users::table
            .filter(users::is_active.eq(true))
            .select(users::id)
            .load(&mut conn)?
    };

    let rows: Vec<NewNotification> = target_ids
        .iter()
        .map(|target_id| NewNotification {
            id: Uuid::new_v4(),
            user_id: *target_id,
            title: title.clone(),
            message: message.clone(),
            notif_type: payload.notif_type.clone(),
        })
        .collect();

    if !rows.is_empty() {
        diesel::insert_into(notifications::table)
            .values(&rows)
            .execute(&mut conn)?;
    }

    info!(recipients = target_ids.len(), "notification broadcast");
    Ok((
        StatusCode::CREATED,
        Json(BroadcastResponse {
            count: target_ids.len(),
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCount {
    pub key: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSummaryResponse {
    pub total: i64,
    pub unread: i64,
    pub by_type: Vec<GroupCount>,
    pub recent: Vec<NotificationResponse>,
}

pub async fn notification_summary(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<NotificationSummaryResponse>> {
    let mut conn = state.db()?;

    let total: i64 = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .select(count_star())
        .first(&mut conn)?;

    let unread: i64 = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::is_read.eq(false))
        .select(count_star())
        .first(&mut conn)?;

    let by_type: Vec<(String, i64)> = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::is_read.eq(false))
        .group_by(notifications::notif_type)
        .select((notifications::notif_type, count_star()))
        .load(&mut conn)?;

    let recent: Vec<Notification> = notifications::table
        .filter(notifications::user_id.eq(user.user_id))
        .filter(notifications::is_read.eq(false))
        .order(notifications::created_at.desc())
        .limit(5)
        .load(&mut conn)?;

    Ok(Json(NotificationSummaryResponse {
        total,
        unread,
        by_type: by_type
            .into_iter()
            .map(|(key, count)| GroupCount { key, count })
            .collect(),
        recent: recent.into_iter().map(NotificationResponse::from).collect(),
    }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<NotificationResponse>> {
    let mut conn = state.db()?;
    let notification: Notification = notifications::table
        .find(notification_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if notification.user_id != user.user_id {
        return Err(AppError::not_found());
    }

    diesel::update(notifications::table.find(notification_id))
        .set(notifications::is_read.eq(true))
        .execute(&mut conn)?;

    let updated: Notification = notifications::table.find(notification_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResponse {
    pub updated_count: usize,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<BulkUpdateResponse>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    Ok(Json(BulkUpdateResponse {
        updated_count: updated,
    }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let notification: Notification = notifications::table
        .find(notification_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if notification.user_id != user.user_id {
        return Err(AppError::not_found());
    }

    diesel::delete(notifications::table.find(notification_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteResponse {
    pub deleted_count: usize,
}

pub async fn clear_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<BulkDeleteResponse>> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(true)),
    )
    .execute(&mut conn)?;

    Ok(Json(BulkDeleteResponse {
        deleted_count: deleted,
    }))
}
