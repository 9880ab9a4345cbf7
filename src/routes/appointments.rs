use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Appointment, NewAppointment};
use crate::schema::appointments;
use crate::state::AppState;
use crate::utils::{
    pagination::{PageQuery, Paginated},
    parse_iso_datetime, to_iso,
};

pub const DEFAULT_COLOR: &str = "#3b82f6";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub category: String,
    pub color: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Appointment> for AppointmentResponse {
    fn from(appointment: Appointment) -> Self {
        Self {
            id: appointment.id,
            title: appointment.title,
            description: appointment.description,
            start_time: to_iso(appointment.start_time),
            end_time: to_iso(appointment.end_time),
            category: appointment.category,
            color: appointment.color,
            created_at: to_iso(appointment.created_at),
            updated_at: to_iso(appointment.updated_at),
        }
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|ch| ch.is_ascii_hexdigit())
}

/// Finds the first live appointment of `user_id` overlapping `[start, end)`.
/// The three cases mirror how a candidate can collide with an existing
/// block: it starts inside one, ends inside one, or swallows one whole.
/// Touching boundaries (`existing.end == start`) are not a conflict.
fn find_conflict(
    conn: &mut PgConnection,
    user_id: Uuid,
    start: NaiveDateTime,
    end: NaiveDateTime,
    exclude: Option<Uuid>,
) -> AppResult<Option<Appointment>> {
    let mut query = appointments::table
        .filter(appointments::user_id.eq(user_id))
        .filter(
            (appointments::start_time
                .le(start)
                .and(appointments::end_time.gt(start)))
            .or(appointments::start_time
                .lt(end)
                .and(appointments::end_time.ge(end)))
            .or(appointments::start_time
                .ge(start)
                .and(appointments::end_time.le(end))),
        )
        .into_boxed();

    if let Some(exclude_id) = exclude {
        query = query.filter(appointments::id.ne(exclude_id));
    }

    Ok(query.first(conn).optional()?)
}

fn conflict_error(blocking: Appointment) -> AppError {
    AppError::conflict("time slot conflicts with an existing appointment").with_detail(
        "conflictingAppointment",
        json!({
            "id": blocking.id,
            "title": blocking.title,
            "startTime": to_iso(blocking.start_time),
            "endTime": to_iso(blocking.end_time),
        }),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentListQuery {
    pub date: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub category: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    Query(params): Query<AppointmentListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Paginated<AppointmentResponse>>> {
    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    let mut errors = Vec::new();
    let day = match params.date.as_deref() {
        Some(raw) => match parse_iso_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => {
                errors.push(FieldError::new("date", "must be an ISO-8601 date"));
                None
            }
        },
        None => None,
    };
    let range_start = match params.start_date.as_deref() {
        Some(raw) => match parse_iso_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => {
                errors.push(FieldError::new("startDate", "must be an ISO-8601 date"));
                None
            }
        },
        None => None,
    };
    let range_end = match params.end_date.as_deref() {
        Some(raw) => match parse_iso_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => {
                errors.push(FieldError::new("endDate", "must be an ISO-8601 date"));
                None
            }
        },
        None => None,
    };
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let mut conn = state.db()?;
    let mut query = appointments::table
        .filter(appointments::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = appointments::table
        .filter(appointments::user_id.eq(user.user_id))
        .select(count_star())
        .into_boxed();

    if let Some(day) = day {
        let start_of_day = day
            .date()
            .and_hms_opt(0, 0, 0)
            .unwrap_or(day);
        let end_of_day = start_of_day + ChronoDuration::days(1);
        query = query
            .filter(appointments::start_time.ge(start_of_day))
            .filter(appointments::start_time.lt(end_of_day));
        count_query = count_query
            .filter(appointments::start_time.ge(start_of_day))
            .filter(appointments::start_time.lt(end_of_day));
    } else if let (Some(range_start), Some(range_end)) = (range_start, range_end) {
        query = query
            .filter(appointments::start_time.ge(range_start))
            .filter(appointments::start_time.le(range_end));
        count_query = count_query
            .filter(appointments::start_time.ge(range_start))
            .filter(appointments::start_time.le(range_end));
    }
    if let Some(ref category) = params.category {
        query = query.filter(appointments::category.eq(category.clone()));
        count_query = count_query.filter(appointments::category.eq(category.clone()));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<Appointment> = query
        .order(appointments::start_time.asc())
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    Ok(Json(Paginated::new(
        rows.into_iter().map(AppointmentResponse::from).collect(),
        total,
        page,
    )))
}

pub async fn today_appointments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AppointmentResponse>>> {
    let start_of_day = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| Utc::now().naive_utc());
    let end_of_day = start_of_day + ChronoDuration::days(1);

    let mut conn = state.db()?;
    let rows: Vec<Appointment> = appointments::table
        .filter(appointments::user_id.eq(user.user_id))
        .filter(appointments::start_time.ge(start_of_day))
        .filter(appointments::start_time.lt(end_of_day))
        .order(appointments::start_time.asc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter().map(AppointmentResponse::from).collect(),
    ))
}

#[derive(Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn upcoming_appointments(
    State(state): State<AppState>,
    Query(params): Query<UpcomingQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<AppointmentResponse>>> {
    let days = params.days.unwrap_or(7).clamp(1, 30);
    let limit = params.limit.unwrap_or(10).clamp(1, 20);

    let now = Utc::now().naive_utc();
    let horizon = now + ChronoDuration::days(days);

    let mut conn = state.db()?;
    let rows: Vec<Appointment> = appointments::table
        .filter(appointments::user_id.eq(user.user_id))
        .filter(appointments::start_time.ge(now))
        .filter(appointments::start_time.le(horizon))
        .order(appointments::start_time.asc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter().map(AppointmentResponse::from).collect(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub category: String,
    pub color: Option<String>,
}

pub async fn create_appointment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateAppointmentRequest>,
) -> AppResult<(StatusCode, Json<AppointmentResponse>)> {
    let mut errors = Vec::new();

    let title = payload.title.trim().to_string();
    if title.is_empty() || title.len() > 200 {
        errors.push(FieldError::new("title", "must be 1 to 200 characters"));
    }
    let category = payload.category.trim().to_string();
    if category.is_empty() {
        errors.push(FieldError::new("category", "must not be empty"));
    }
    let color = payload.color.unwrap_or_else(|| DEFAULT_COLOR.to_string());
    if !is_hex_color(&color) {
        errors.push(FieldError::new("color", "must be a #rrggbb color"));
    }
    let start = match parse_iso_datetime(&payload.start_time) {
        Some(parsed) => Some(parsed),
        None => {
            errors.push(FieldError::new("startTime", "must be an ISO-8601 date"));
            None
        }
    };
    let end = match parse_iso_datetime(&payload.end_time) {
        Some(parsed) => Some(parsed),
        None => {
            errors.push(FieldError::new("endTime", "must be an ISO-8601 date"));
            None
        }
    };
    let (Some(start), Some(end)) = (start, end) else {
        return Err(AppError::validation(errors));
    };
    if start >= end {
        errors.push(FieldError::new("endTime", "must be after startTime"));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let mut conn = state.db()?;
    if let Some(blocking) = find_conflict(&mut conn, user.user_id, start, end, None)? {
        return Err(conflict_error(blocking));
    }

    let new_appointment = NewAppointment {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        title,
        description: payload.description,
        start_time: start,
        end_time: end,
        category,
        color,
    };

    diesel::insert_into(appointments::table)
        .values(&new_appointment)
        .execute(&mut conn)?;

    let appointment: Appointment = appointments::table
        .find(new_appointment.id)
        .first(&mut conn)?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAppointmentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub category: Option<String>,
    pub color: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = appointments)]
struct AppointmentChangeset {
    title: Option<String>,
    description: Option<String>,
    start_time: Option<NaiveDateTime>,
    end_time: Option<NaiveDateTime>,
    category: Option<String>,
    color: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateAppointmentRequest>,
) -> AppResult<Json<AppointmentResponse>> {
    let mut conn = state.db()?;
    let existing: Appointment = appointments::table
        .find(appointment_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if existing.user_id != user.user_id {
        return Err(AppError::not_found());
    }

    let mut errors = Vec::new();
    let mut changeset = AppointmentChangeset::default();

    if let Some(ref title) = payload.title {
        let trimmed = title.trim();
        if trimmed.is_empty() || trimmed.len() > 200 {
            errors.push(FieldError::new("title", "must be 1 to 200 characters"));
        } else {
            changeset.title = Some(trimmed.to_string());
        }
    }
    if let Some(ref description) = payload.description {
        changeset.description = Some(description.clone());
    }
    if let Some(ref category) = payload.category {
        if category.trim().is_empty() {
            errors.push(FieldError::new("category", "must not be empty"));
        } else {
            changeset.category = Some(category.trim().to_string());
        }
    }
    if let Some(ref color) = payload.color {
        if !is_hex_color(color) {
            errors.push(FieldError::new("color", "must be a #rrggbb color"));
        } else {
            changeset.color = Some(color.clone());
        }
    }
    if let Some(ref raw) = payload.start_time {
        match parse_iso_datetime(raw) {
            Some(parsed) => changeset.start_time = Some(parsed),
            None => errors.push(FieldError::new("startTime", "must be an ISO-8601 date")),
        }
    }
    if let Some(ref raw) = payload.end_time {
        match parse_iso_datetime(raw) {
            Some(parsed) => changeset.end_time = Some(parsed),
            None => errors.push(FieldError::new("endTime", "must be an ISO-8601 date")),
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    // The no-overlap invariant is checked against the effective interval,
    // even when only one endpoint moves.
    let effective_start = changeset.start_time.unwrap_or(existing.start_time);
    let effective_end = changeset.end_time.unwrap_or(existing.end_time);
    if effective_start >= effective_end {
        return Err(AppError::validation(vec![FieldError::new(
            "endTime",
            "must be after startTime",
        )]));
    }
    if changeset.start_time.is_some() || changeset.end_time.is_some() {
        if let Some(blocking) = find_conflict(
            &mut conn,
            user.user_id,
            effective_start,
            effective_end,
            Some(appointment_id),
        )? {
            return Err(conflict_error(blocking));
        }
    }

    changeset.updated_at = Some(Utc::now().naive_utc());
    diesel::update(appointments::table.find(appointment_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(Json(updated.into()))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let existing: Appointment = appointments::table
        .find(appointment_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if existing.user_id != user.user_id {
        return Err(AppError::not_found());
    }

    diesel::delete(appointments::table.find(appointment_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarResponse {
    pub year: i32,
    pub month: u32,
    pub appointments: BTreeMap<String, Vec<AppointmentResponse>>,
    pub total: usize,
}

pub async fn calendar_appointments(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
    user: AuthenticatedUser,
) -> AppResult<Json<CalendarResponse>> {
    let month_start = NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| {
            AppError::validation(vec![FieldError::new("month", "invalid calendar month")])
        })?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .and_then(|date| date.and_hms_opt(0, 0, 0))
    .ok_or_else(|| {
        AppError::validation(vec![FieldError::new("month", "invalid calendar month")])
    })?;

    let mut conn = state.db()?;
    let rows: Vec<Appointment> = appointments::table
        .filter(appointments::user_id.eq(user.user_id))
        .filter(appointments::start_time.ge(month_start))
        .filter(appointments::start_time.lt(next_month))
        .order(appointments::start_time.asc())
        .load(&mut conn)?;

    let total = rows.len();
    let mut by_date: BTreeMap<String, Vec<AppointmentResponse>> = BTreeMap::new();
    for appointment in rows {
        by_date
            .entry(appointment.start_time.date().to_string())
            .or_default()
            .push(appointment.into());
    }

    Ok(Json(CalendarResponse {
        year,
        month,
        appointments: by_date,
        total,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

pub async fn appointment_categories(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CategoryCount>>> {
    let mut conn = state.db()?;
    let mut rows: Vec<(String, i64)> = appointments::table
        .filter(appointments::user_id.eq(user.user_id))
        .group_by(appointments::category)
        .select((appointments::category, count_star()))
        .load(&mut conn)?;

    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    Ok(Json(
        rows.into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::is_hex_color;

    #[test]
    fn hex_colors_require_hash_and_six_hex_digits() {
        assert!(is_hex_color("#3b82f6"));
        assert!(is_hex_color("#FF0000"));
        assert!(!is_hex_color("3b82f6"));
        assert!(!is_hex_color("#3b82f"));
        assert!(!is_hex_color("#3b82fg"));
    }
}
