use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::Json;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{self, Action, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::User;
use crate::schema::{loans, tasks, users};
use crate::state::AppState;
use crate::utils::{
    is_valid_email,
    pagination::{PageQuery, Paginated},
    to_iso,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileResponse {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub primary_role: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl From<User> for UserProfileResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            primary_role: user.primary_role,
            permissions: user.permissions,
            is_active: user.is_active,
            created_at: to_iso(user.created_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListItem {
    #[serde(flatten)]
    pub profile: UserProfileResponse,
    pub loan_count: i64,
    pub task_count: i64,
}

#[derive(Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(params): Query<UserListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Paginated<UserListItem>>> {
    if !access::can(&user, Action::ManageUsers) {
        return Err(AppError::forbidden());
    }

    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    if let Some(role) = params.role.as_deref() {
        if Role::parse(role).is_none() {
            return Err(AppError::validation(vec![FieldError::new(
                "role",
                "unknown role",
            )]));
        }
    }

    let mut conn = state.db()?;

    let mut query = users::table.into_boxed();
    let mut count_query = users::table.select(count_star()).into_boxed();
    if let Some(ref role) = params.role {
        query = query.filter(users::primary_role.eq(role.clone()));
        count_query = count_query.filter(users::primary_role.eq(role.clone()));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<User> = query
        .order(users::created_at.desc())
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    let loan_counts: Vec<(Uuid, i64)> = loans::table
        .group_by(loans::loan_officer_id)
        .select((loans::loan_officer_id, count_star()))
        .load(&mut conn)?;
    let task_counts: Vec<(Uuid, i64)> = tasks::table
        .group_by(tasks::user_id)
        .select((tasks::user_id, count_star()))
        .load(&mut conn)?;

    let loan_map: HashMap<Uuid, i64> = loan_counts.into_iter().collect();
    let task_map: HashMap<Uuid, i64> = task_counts.into_iter().collect();

    let data = rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            UserListItem {
                profile: row.into(),
                loan_count: *loan_map.get(&id).unwrap_or(&0),
                task_count: *task_map.get(&id).unwrap_or(&0),
            }
        })
        .collect();

    Ok(Json(Paginated::new(data, total, page)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserProfileResponse>> {
    let mut conn = state.db()?;
    let row: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(row.into()))
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserProfileResponse>> {
    let mut errors = Vec::new();
    let mut new_name: Option<String> = None;
    if let Some(ref name) = payload.name {
        let trimmed = name.trim();
        if trimmed.len() < 2 {
            errors.push(FieldError::new("name", "must be at least 2 characters"));
        } else {
            new_name = Some(trimmed.to_string());
        }
    }
    let mut new_email: Option<String> = None;
    if let Some(ref email) = payload.email {
        if !is_valid_email(email) {
            errors.push(FieldError::new("email", "must be a valid email"));
        } else {
            new_email = Some(email.clone());
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let mut conn = state.db()?;

    if let Some(ref email) = new_email {
        let taken: i64 = users::table
            .filter(users::email.eq(email))
            .filter(users::id.ne(user.user_id))
            .select(count_star())
            .first(&mut conn)?;
        if taken > 0 {
            return Err(AppError::conflict("email already taken"));
        }
    }

    if let Some(name) = new_name {
        diesel::update(users::table.find(user.user_id))
            .set(users::name.eq(name))
            .execute(&mut conn)?;
    }
    if let Some(email) = new_email {
        diesel::update(users::table.find(user.user_id))
            .set(users::email.eq(email))
            .execute(&mut conn)?;
    }

    let row: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(row.into()))
}

#[derive(Deserialize)]
pub struct UpdatePermissionsRequest {
    pub permissions: Vec<String>,
}

pub async fn update_permissions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdatePermissionsRequest>,
) -> AppResult<Json<UserProfileResponse>> {
    if !access::can(&user, Action::ManageUsers) {
        return Err(AppError::forbidden());
    }

    let mut permissions = Vec::new();
    for value in &payload.permissions {
        match Role::parse(value) {
            Some(role) => permissions.push(role.as_str().to_string()),
            None => {
                return Err(AppError::validation(vec![FieldError::new(
                    "permissions",
                    "unknown role",
                )]))
            }
        }
    }

    let mut conn = state.db()?;
    let target: User = users::table
        .find(user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    // The effective permission set always contains the primary role.
    if !permissions.contains(&target.primary_role) {
        permissions.insert(0, target.primary_role.clone());
    }

    diesel::update(users::table.find(user_id))
        .set(users::permissions.eq(&permissions))
        .execute(&mut conn)?;

    info!(target = %user_id, ?permissions, "user permissions updated");

    let row: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(row.into()))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserProfileResponse>> {
    if !access::can(&user, Action::ManageUsers) {
        return Err(AppError::forbidden());
    }

    let mut conn = state.db()?;
    let target: User = users::table
        .find(user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    diesel::update(users::table.find(user_id))
        .set(users::is_active.eq(!target.is_active))
        .execute(&mut conn)?;

    info!(target = %user_id, active = !target.is_active, "user status toggled");

    let row: User = users::table.find(user_id).first(&mut conn)?;
    Ok(Json(row.into()))
}
