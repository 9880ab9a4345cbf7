use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{self, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Communication, Loan, NewCommunication};
use crate::schema::{communications, loans, users};
use crate::state::AppState;
use crate::utils::{
    pagination::{PageQuery, Paginated},
    period_days, to_iso,
};

pub const COMMUNICATION_TYPES: &[&str] = &["EMAIL", "PHONE", "SMS", "MEETING", "NOTE"];
pub const COMMUNICATION_DIRECTIONS: &[&str] = &["inbound", "outbound"];

type LoanRef = Option<(Uuid, String, String)>;
type AuthorRef = (Uuid, String);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationLoanSummary {
    pub id: Uuid,
    pub loan_number: String,
    pub borrower_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationUserSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub comm_type: String,
    pub direction: String,
    pub subject: Option<String>,
    pub message: String,
    pub loan: Option<CommunicationLoanSummary>,
    pub user: CommunicationUserSummary,
    pub created_at: String,
}

fn to_communication_response(
    communication: Communication,
    loan: LoanRef,
    author: AuthorRef,
) -> CommunicationResponse {
    CommunicationResponse {
        id: communication.id,
        comm_type: communication.comm_type,
        direction: communication.direction,
        subject: communication.subject,
        message: communication.message,
        loan: loan.map(|(id, loan_number, borrower_name)| CommunicationLoanSummary {
            id,
            loan_number,
            borrower_name,
        }),
        user: CommunicationUserSummary {
            id: author.0,
            name: author.1,
        },
        created_at: to_iso(communication.created_at),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationListQuery {
    pub loan_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub comm_type: Option<String>,
    pub direction: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_communications(
    State(state): State<AppState>,
    Query(params): Query<CommunicationListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Paginated<CommunicationResponse>>> {
    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    let mut errors = Vec::new();
    if let Some(comm_type) = params.comm_type.as_deref() {
        if !COMMUNICATION_TYPES.contains(&comm_type) {
            errors.push(FieldError::new("type", "unknown communication type"));
        }
    }
    if let Some(direction) = params.direction.as_deref() {
        if !COMMUNICATION_DIRECTIONS.contains(&direction) {
            errors.push(FieldError::new("direction", "unknown direction"));
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    if user.role.is_none() {
        return Ok(Json(Paginated::new(vec![], 0, page)));
    }

    let mut conn = state.db()?;

    let mut query = communications::table
        .left_join(loans::table)
        .inner_join(users::table)
        .select((
            communications::all_columns,
            (loans::id, loans::loan_number, loans::borrower_name).nullable(),
            (users::id, users::name),
        ))
        .into_boxed();
    let mut count_query = communications::table
        .left_join(loans::table)
        .select(count_star())
        .into_boxed();

    // An LO sees what they authored plus anything on their own book;
    // other roles read unrestricted.
    if user.role == Some(Role::Lo) {
        query = query.filter(
            communications::user_id
                .eq(user.user_id)
                .or(loans::loan_officer_id.eq(user.user_id)),
        );
        count_query = count_query.filter(
            communications::user_id
                .eq(user.user_id)
                .or(loans::loan_officer_id.eq(user.user_id)),
        );
    }
    if let Some(loan_id) = params.loan_id {
        query = query.filter(communications::loan_id.eq(Some(loan_id)));
        count_query = count_query.filter(communications::loan_id.eq(Some(loan_id)));
    }
    if let Some(ref comm_type) = params.comm_type {
        query = query.filter(communications::comm_type.eq(comm_type.clone()));
        count_query = count_query.filter(communications::comm_type.eq(comm_type.clone()));
    }
    if let Some(ref direction) = params.direction {
        query = query.filter(communications::direction.eq(direction.clone()));
        count_query = count_query.filter(communications::direction.eq(direction.clone()));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<(Communication, LoanRef, AuthorRef)> = query
        .order(communications::created_at.desc())
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    let data = rows
        .into_iter()
        .map(|(communication, loan, author)| to_communication_response(communication, loan, author))
        .collect();

    Ok(Json(Paginated::new(data, total, page)))
}

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

pub async fn recent_communications(
    State(state): State<AppState>,
    Query(params): Query<RecentQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CommunicationResponse>>> {
    let limit = params.limit.unwrap_or(10).clamp(1, 20);

    if user.role.is_none() {
        return Ok(Json(vec![]));
    }

    let mut conn = state.db()?;
    let mut query = communications::table
        .left_join(loans::table)
        .inner_join(users::table)
        .select((
            communications::all_columns,
            (loans::id, loans::loan_number, loans::borrower_name).nullable(),
            (users::id, users::name),
        ))
        .into_boxed();

    if user.role == Some(Role::Lo) {
        query = query.filter(
            communications::user_id
                .eq(user.user_id)
                .or(loans::loan_officer_id.eq(user.user_id)),
        );
    }

    let rows: Vec<(Communication, LoanRef, AuthorRef)> = query
        .order(communications::created_at.desc())
        .limit(limit)
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(communication, loan, author)| {
                to_communication_response(communication, loan, author)
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommunicationRequest {
    #[serde(rename = "type")]
    pub comm_type: String,
    pub message: String,
    pub subject: Option<String>,
    pub direction: String,
    pub loan_id: Option<Uuid>,
}

pub async fn create_communication(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCommunicationRequest>,
) -> AppResult<(StatusCode, Json<CommunicationResponse>)> {
    let mut errors = Vec::new();
    if !COMMUNICATION_TYPES.contains(&payload.comm_type.as_str()) {
        errors.push(FieldError::new("type", "unknown communication type"));
    }
    if !COMMUNICATION_DIRECTIONS.contains(&payload.direction.as_str()) {
        errors.push(FieldError::new("direction", "unknown direction"));
    }
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        errors.push(FieldError::new("message", "must not be empty"));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let mut conn = state.db()?;

    if let Some(loan_id) = payload.loan_id {
        let scope = access::loan_scope(&user);
        let loan: Option<Loan> = loans::table.find(loan_id).first(&mut conn).optional()?;
        let visible = matches!(&loan, Some(loan) if scope.permits(loan.loan_officer_id));
        if !visible {
            return Err(AppError::not_found());
        }
    }

    let new_communication = NewCommunication {
        id: Uuid::new_v4(),
        loan_id: payload.loan_id,
        user_id: user.user_id,
        comm_type: payload.comm_type,
        direction: payload.direction,
        subject: payload.subject,
        message,
    };

    diesel::insert_into(communications::table)
        .values(&new_communication)
        .execute(&mut conn)?;

    let row: (Communication, LoanRef, AuthorRef) = communications::table
        .left_join(loans::table)
        .inner_join(users::table)
        .select((
            communications::all_columns,
            (loans::id, loans::loan_number, loans::borrower_name).nullable(),
            (users::id, users::name),
        ))
        .filter(communications::id.eq(new_communication.id))
        .first(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(to_communication_response(row.0, row.1, row.2)),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommunicationRequest {
    pub message: Option<String>,
    pub subject: Option<String>,
    #[serde(rename = "type")]
    pub comm_type: Option<String>,
}

pub async fn update_communication(
    State(state): State<AppState>,
    Path(communication_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateCommunicationRequest>,
) -> AppResult<Json<CommunicationResponse>> {
    let mut conn = state.db()?;
    let existing: Communication = communications::table
        .find(communication_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !access::may_mutate_owned(&user, existing.user_id) {
        return Err(AppError::not_found());
    }

    let mut errors = Vec::new();
    let mut new_message: Option<String> = None;
    if let Some(ref message) = payload.message {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            errors.push(FieldError::new("message", "must not be empty"));
        } else {
            new_message = Some(trimmed.to_string());
        }
    }
    let mut new_type: Option<String> = None;
    if let Some(ref comm_type) = payload.comm_type {
        if !COMMUNICATION_TYPES.contains(&comm_type.as_str()) {
            errors.push(FieldError::new("type", "unknown communication type"));
        } else {
            new_type = Some(comm_type.clone());
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    if let Some(message) = new_message {
        diesel::update(communications::table.find(communication_id))
            .set(communications::message.eq(message))
            .execute(&mut conn)?;
    }
    if let Some(subject) = payload.subject {
        diesel::update(communications::table.find(communication_id))
            .set(communications::subject.eq(Some(subject)))
            .execute(&mut conn)?;
    }
    if let Some(comm_type) = new_type {
        diesel::update(communications::table.find(communication_id))
            .set(communications::comm_type.eq(comm_type))
            .execute(&mut conn)?;
    }

    let row: (Communication, LoanRef, AuthorRef) = communications::table
        .left_join(loans::table)
        .inner_join(users::table)
        .select((
            communications::all_columns,
            (loans::id, loans::loan_number, loans::borrower_name).nullable(),
            (users::id, users::name),
        ))
        .filter(communications::id.eq(communication_id))
        .first(&mut conn)?;

    Ok(Json(to_communication_response(row.0, row.1, row.2)))
}

pub async fn delete_communication(
    State(state): State<AppState>,
    Path(communication_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let existing: Communication = communications::table
        .find(communication_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !access::may_mutate_owned(&user, existing.user_id) {
        return Err(AppError::not_found());
    }

    diesel::delete(communications::table.find(communication_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub period: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCount {
    pub key: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationStatsBreakdown {
    pub by_type: Vec<GroupCount>,
    pub by_direction: Vec<GroupCount>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationStatsResponse {
    pub period: String,
    pub total_communications: i64,
    pub breakdown: CommunicationStatsBreakdown,
    pub daily_activity: Vec<DailyCount>,
}

pub async fn communication_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<CommunicationStatsResponse>> {
    let period = params.period.unwrap_or_else(|| "30d".to_string());
    let days = period_days(&period).ok_or_else(|| {
        AppError::validation(vec![FieldError::new("period", "unknown period")])
    })?;
    let since = Utc::now().naive_utc() - ChronoDuration::days(days);

    if user.role.is_none() {
        return Ok(Json(CommunicationStatsResponse {
            period,
            total_communications: 0,
            breakdown: CommunicationStatsBreakdown {
                by_type: vec![],
                by_direction: vec![],
            },
            daily_activity: vec![],
        }));
    }

    let mut conn = state.db()?;

    // Grouped in-process over a single scoped window load.
    let mut query = communications::table
        .left_join(loans::table)
        .select(communications::all_columns)
        .filter(communications::created_at.ge(since))
        .into_boxed();
    if user.role == Some(Role::Lo) {
        query = query.filter(
            communications::user_id
                .eq(user.user_id)
                .or(loans::loan_officer_id.eq(user.user_id)),
        );
    }
    let rows: Vec<Communication> = query.load(&mut conn)?;

    let mut by_type: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_direction: BTreeMap<String, i64> = BTreeMap::new();
    let mut by_day: BTreeMap<String, i64> = BTreeMap::new();
    for communication in &rows {
        *by_type.entry(communication.comm_type.clone()).or_default() += 1;
        *by_direction
            .entry(communication.direction.clone())
            .or_default() += 1;
        *by_day
            .entry(communication.created_at.date().to_string())
            .or_default() += 1;
    }

    Ok(Json(CommunicationStatsResponse {
        period,
        total_communications: rows.len() as i64,
        breakdown: CommunicationStatsBreakdown {
            by_type: by_type
                .into_iter()
                .map(|(key, count)| GroupCount { key, count })
                .collect(),
            by_direction: by_direction
                .into_iter()
                .map(|(key, count)| GroupCount { key, count })
                .collect(),
        },
        daily_activity: by_day
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
    }))
}
