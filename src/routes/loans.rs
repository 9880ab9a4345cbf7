use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::{count_star, sum};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{self, Action, LoanScope};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Communication, Document, Loan, NewLoan, StageHistoryEntry, Task};
use crate::pipeline::{self, STAGE_NEW_LEAD};
use crate::schema::{communications, documents, loans, stage_history, tasks, users};
use crate::state::AppState;
use crate::utils::{
    is_valid_email, money_string,
    pagination::{PageQuery, Paginated},
    parse_iso_datetime, to_iso, to_iso_opt,
};

pub const LOAN_TYPES: &[&str] = &["CONVENTIONAL", "FHA", "VA", "USDA", "JUMBO"];
pub const LOAN_STATUSES: &[&str] = &["ON_TRACK", "DELAYED", "AT_RISK"];

pub const DEFAULT_LOAN_STATUS: &str = "ON_TRACK";

type OfficerRow = (Uuid, String, String);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficerSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<OfficerRow> for OfficerSummary {
    fn from((id, name, email): OfficerRow) -> Self {
        Self { id, name, email }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanResponse {
    pub id: Uuid,
    pub loan_number: String,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub property_address: String,
    pub loan_type: String,
    pub loan_amount: String,
    pub target_close_date: String,
    pub current_stage: String,
    pub status: String,
    pub progress: i32,
    pub time_in_stage: i32,
    pub loan_officer: OfficerSummary,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn to_loan_response(loan: Loan, officer: OfficerRow) -> LoanResponse {
    LoanResponse {
        id: loan.id,
        loan_number: loan.loan_number,
        borrower_name: loan.borrower_name,
        borrower_email: loan.borrower_email,
        borrower_phone: loan.borrower_phone,
        property_address: loan.property_address,
        loan_type: loan.loan_type,
        loan_amount: money_string(&loan.loan_amount),
        target_close_date: to_iso(loan.target_close_date),
        current_stage: loan.current_stage,
        status: loan.status,
        progress: loan.progress,
        time_in_stage: loan.time_in_stage,
        loan_officer: officer.into(),
        created_at: to_iso(loan.created_at),
        updated_at: to_iso(loan.updated_at),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHistoryResponse {
    pub id: Uuid,
    pub stage: String,
    pub entered_at: String,
    pub exited_at: Option<String>,
    pub duration: Option<i32>,
}

impl From<StageHistoryEntry> for StageHistoryResponse {
    fn from(entry: StageHistoryEntry) -> Self {
        Self {
            id: entry.id,
            stage: entry.stage,
            entered_at: to_iso(entry.entered_at),
            exited_at: to_iso_opt(entry.exited_at),
            duration: entry.duration,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoanTaskItem {
    id: Uuid,
    title: String,
    #[serde(rename = "type")]
    task_type: String,
    priority: String,
    status: String,
    due_date: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoanDocumentItem {
    id: Uuid,
    name: String,
    #[serde(rename = "type")]
    doc_type: String,
    status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoanCommunicationItem {
    id: Uuid,
    #[serde(rename = "type")]
    comm_type: String,
    direction: String,
    subject: Option<String>,
    created_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanDetailResponse {
    #[serde(flatten)]
    loan: LoanResponse,
    stage_history: Vec<StageHistoryResponse>,
    tasks: Vec<LoanTaskItem>,
    documents: Vec<LoanDocumentItem>,
    communications: Vec<LoanCommunicationItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanListQuery {
    pub stage: Option<String>,
    pub status: Option<String>,
    pub loan_officer: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_loans(
    State(state): State<AppState>,
    Query(params): Query<LoanListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Paginated<LoanResponse>>> {
    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    if let Some(status) = params.status.as_deref() {
        if !LOAN_STATUSES.contains(&status) {
            return Err(AppError::validation(vec![FieldError::new(
                "status",
                "unknown loan status",
            )]));
        }
    }

    let scope = access::loan_scope(&user);
    if scope == LoanScope::Nothing {
        return Ok(Json(Paginated::new(vec![], 0, page)));
    }

    // Explicit officer filter is an admin affordance; an LO is always
    // pinned to their own book.
    let officer_filter = match scope {
        LoanScope::Officer(id) => Some(id),
        LoanScope::All => params.loan_officer.filter(|_| user.is_admin()),
        LoanScope::Nothing => None,
    };

    let mut conn = state.db()?;

    let mut query = loans::table
        .inner_join(users::table)
        .select((
            loans::all_columns,
            (users::id, users::name, users::email),
        ))
        .into_boxed();
    let mut count_query = loans::table.select(count_star()).into_boxed();

    if let Some(officer_id) = officer_filter {
        query = query.filter(loans::loan_officer_id.eq(officer_id));
        count_query = count_query.filter(loans::loan_officer_id.eq(officer_id));
    }
    if let Some(stage) = params.stage.as_ref() {
        query = query.filter(loans::current_stage.eq(stage.clone()));
        count_query = count_query.filter(loans::current_stage.eq(stage.clone()));
    }
    if let Some(status) = params.status.as_ref() {
        query = query.filter(loans::status.eq(status.clone()));
        count_query = count_query.filter(loans::status.eq(status.clone()));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<(Loan, OfficerRow)> = query
        .order(loans::updated_at.desc())
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    let data = rows
        .into_iter()
        .map(|(loan, officer)| to_loan_response(loan, officer))
        .collect();

    Ok(Json(Paginated::new(data, total, page)))
}

pub async fn get_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<LoanDetailResponse>> {
    let scope = access::loan_scope(&user);
    let mut conn = state.db()?;

    let (loan, officer): (Loan, OfficerRow) = loans::table
        .inner_join(users::table)
        .select((
            loans::all_columns,
            (users::id, users::name, users::email),
        ))
        .filter(loans::id.eq(loan_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !scope.permits(loan.loan_officer_id) {
        return Err(AppError::not_found());
    }

    let history: Vec<StageHistoryEntry> = stage_history::table
        .filter(stage_history::loan_id.eq(loan_id))
        .order(stage_history::entered_at.desc())
        .load(&mut conn)?;

    let loan_tasks: Vec<Task> = tasks::table
        .filter(tasks::loan_id.eq(Some(loan_id)))
        .order(tasks::created_at.desc())
        .load(&mut conn)?;

    let loan_documents: Vec<Document> = documents::table
        .filter(documents::loan_id.eq(loan_id))
        .order(documents::created_at.desc())
        .load(&mut conn)?;

    let loan_communications: Vec<Communication> = communications::table
        .filter(communications::loan_id.eq(Some(loan_id)))
        .order(communications::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(LoanDetailResponse {
        loan: to_loan_response(loan, officer),
        stage_history: history.into_iter().map(Into::into).collect(),
        tasks: loan_tasks
            .into_iter()
            .map(|task| LoanTaskItem {
                id: task.id,
                title: task.title,
                task_type: task.task_type,
                priority: task.priority,
                status: task.status,
                due_date: to_iso_opt(task.due_date),
            })
            .collect(),
        documents: loan_documents
            .into_iter()
            .map(|doc| LoanDocumentItem {
                id: doc.id,
                name: doc.name,
                doc_type: doc.doc_type,
                status: doc.status,
            })
            .collect(),
        communications: loan_communications
            .into_iter()
            .map(|comm| LoanCommunicationItem {
                id: comm.id,
                comm_type: comm.comm_type,
                direction: comm.direction,
                subject: comm.subject,
                created_at: to_iso(comm.created_at),
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLoanRequest {
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub property_address: String,
    pub loan_type: String,
    pub loan_amount: String,
    pub target_close_date: String,
    pub current_stage: Option<String>,
    pub loan_officer_id: Option<Uuid>,
}

/// Non-negative, at most two fractional digits, normalized to scale 2.
pub(crate) fn parse_money(value: &str) -> Result<BigDecimal, String> {
    let amount =
        BigDecimal::from_str(value.trim()).map_err(|_| "must be a decimal number".to_string())?;
    if amount < BigDecimal::zero() {
        return Err("must not be negative".to_string());
    }
    if amount.fractional_digit_count() > 2 {
        return Err("must have at most 2 decimal places".to_string());
    }
    Ok(amount.with_scale(2))
}

pub async fn create_loan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateLoanRequest>,
) -> AppResult<(StatusCode, Json<LoanResponse>)> {
    if !access::can(&user, Action::CreateLoan) {
        return Err(AppError::forbidden());
    }

    let mut errors = Vec::new();

    let borrower_name = payload.borrower_name.trim().to_string();
    if borrower_name.len() < 2 {
        errors.push(FieldError::new(
            "borrowerName",
            "must be at least 2 characters",
        ));
    }
    if let Some(email) = payload.borrower_email.as_deref() {
        if !is_valid_email(email) {
            errors.push(FieldError::new("borrowerEmail", "must be a valid email"));
        }
    }
    let property_address = payload.property_address.trim().to_string();
    if property_address.len() < 5 {
        errors.push(FieldError::new(
            "propertyAddress",
            "must be at least 5 characters",
        ));
    }
    if !LOAN_TYPES.contains(&payload.loan_type.as_str()) {
        errors.push(FieldError::new("loanType", "unknown loan type"));
    }
    let loan_amount = match parse_money(&payload.loan_amount) {
        Ok(amount) => Some(amount),
        Err(message) => {
            errors.push(FieldError::new("loanAmount", message));
            None
        }
    };
    let target_close_date = match parse_iso_datetime(&payload.target_close_date) {
        Some(parsed) => Some(parsed),
        None => {
            errors.push(FieldError::new(
                "targetCloseDate",
                "must be an ISO-8601 date",
            ));
            None
        }
    };
    let current_stage = payload
        .current_stage
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(STAGE_NEW_LEAD)
        .to_string();

    let (Some(loan_amount), Some(target_close_date)) = (loan_amount, target_close_date) else {
        return Err(AppError::validation(errors));
    };
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let loan_officer_id = payload.loan_officer_id.unwrap_or(user.user_id);
    let mut conn = state.db()?;

    if payload.loan_officer_id.is_some() {
        let officer_exists: i64 = users::table
            .filter(users::id.eq(loan_officer_id))
            .select(count_star())
            .first(&mut conn)?;
        if officer_exists == 0 {
            return Err(AppError::validation(vec![FieldError::new(
                "loanOfficerId",
                "loan officer does not exist",
            )]));
        }
    }

    let now = Utc::now();
    let new_loan = NewLoan {
        id: Uuid::new_v4(),
        loan_number: pipeline::generate_loan_number(now),
        borrower_name,
        borrower_email: payload.borrower_email,
        borrower_phone: payload.borrower_phone,
        property_address,
        loan_type: payload.loan_type,
        loan_amount,
        target_close_date,
        current_stage: current_stage.clone(),
        status: DEFAULT_LOAN_STATUS.to_string(),
        loan_officer_id,
    };

    conn.transaction::<(), AppError, _>(|conn| {
        diesel::insert_into(loans::table)
            .values(&new_loan)
            .execute(conn)?;
        pipeline::open_initial_stage(conn, new_loan.id, &current_stage, now.naive_utc())?;
        Ok(())
    })?;

    info!(loan_id = %new_loan.id, loan_number = %new_loan.loan_number, "loan created");

    let (loan, officer): (Loan, OfficerRow) = loans::table
        .inner_join(users::table)
        .select((
            loans::all_columns,
            (users::id, users::name, users::email),
        ))
        .filter(loans::id.eq(new_loan.id))
        .first(&mut conn)?;

    Ok((StatusCode::CREATED, Json(to_loan_response(loan, officer))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLoanRequest {
    pub borrower_name: Option<String>,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub property_address: Option<String>,
    pub loan_type: Option<String>,
    pub loan_amount: Option<String>,
    pub target_close_date: Option<String>,
    pub current_stage: Option<String>,
    pub status: Option<String>,
    pub progress: Option<i32>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = loans)]
struct LoanChangeset {
    borrower_name: Option<String>,
    borrower_email: Option<String>,
    borrower_phone: Option<String>,
    property_address: Option<String>,
    loan_type: Option<String>,
    loan_amount: Option<BigDecimal>,
    target_close_date: Option<NaiveDateTime>,
    status: Option<String>,
    progress: Option<i32>,
    updated_at: Option<NaiveDateTime>,
}

impl LoanChangeset {
    fn has_changes(&self) -> bool {
        self.borrower_name.is_some()
            || self.borrower_email.is_some()
            || self.borrower_phone.is_some()
            || self.property_address.is_some()
            || self.loan_type.is_some()
            || self.loan_amount.is_some()
            || self.target_close_date.is_some()
            || self.status.is_some()
            || self.progress.is_some()
    }
}

pub async fn update_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateLoanRequest>,
) -> AppResult<Json<LoanResponse>> {
    let scope = access::loan_scope(&user);
    let mut conn = state.db()?;

    let current: Loan = loans::table
        .find(loan_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !scope.permits(current.loan_officer_id) {
        return Err(AppError::not_found());
    }

    let mut errors = Vec::new();
    let mut changeset = LoanChangeset::default();

    if let Some(ref name) = payload.borrower_name {
        let trimmed = name.trim();
        if trimmed.len() < 2 {
            errors.push(FieldError::new(
                "borrowerName",
                "must be at least 2 characters",
            ));
        } else {
            changeset.borrower_name = Some(trimmed.to_string());
        }
    }
    if let Some(ref email) = payload.borrower_email {
        if !is_valid_email(email) {
            errors.push(FieldError::new("borrowerEmail", "must be a valid email"));
        } else {
            changeset.borrower_email = Some(email.clone());
        }
    }
    if let Some(ref phone) = payload.borrower_phone {
        changeset.borrower_phone = Some(phone.clone());
    }
    if let Some(ref address) = payload.property_address {
        let trimmed = address.trim();
        if trimmed.len() < 5 {
            errors.push(FieldError::new(
                "propertyAddress",
                "must be at least 5 characters",
            ));
        } else {
            changeset.property_address = Some(trimmed.to_string());
        }
    }
    if let Some(ref loan_type) = payload.loan_type {
        if !LOAN_TYPES.contains(&loan_type.as_str()) {
            errors.push(FieldError::new("loanType", "unknown loan type"));
        } else {
            changeset.loan_type = Some(loan_type.clone());
        }
    }
    if let Some(ref amount) = payload.loan_amount {
        match parse_money(amount) {
            Ok(parsed) => changeset.loan_amount = Some(parsed),
            Err(message) => errors.push(FieldError::new("loanAmount", message)),
        }
    }
    if let Some(ref date) = payload.target_close_date {
        match parse_iso_datetime(date) {
            Some(parsed) => changeset.target_close_date = Some(parsed),
            None => errors.push(FieldError::new(
                "targetCloseDate",
                "must be an ISO-8601 date",
            )),
        }
    }
    if let Some(ref status) = payload.status {
        if !LOAN_STATUSES.contains(&status.as_str()) {
            errors.push(FieldError::new("status", "unknown loan status"));
        } else {
            changeset.status = Some(status.clone());
        }
    }
    if let Some(progress) = payload.progress {
        if !(0..=100).contains(&progress) {
            errors.push(FieldError::new("progress", "must be between 0 and 100"));
        } else {
            changeset.progress = Some(progress);
        }
    }
    let new_stage = match payload.current_stage.as_deref().map(str::trim) {
        Some("") => {
            errors.push(FieldError::new("currentStage", "must not be empty"));
            None
        }
        other => other.map(str::to_string),
    };

    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let now = Utc::now().naive_utc();
    conn.transaction::<(), AppError, _>(|conn| {
        if changeset.has_changes() {
            changeset.updated_at = Some(now);
            diesel::update(loans::table.find(loan_id))
                .set(&changeset)
                .execute(conn)?;
        }

        if let Some(stage) = new_stage.as_deref() {
            // Same-stage writes skip the transition entirely; no duplicate
            // history row, no error.
            pipeline::transition_stage(conn, loan_id, &current.current_stage, stage, now)?;
        }

        Ok(())
    })?;

    let (loan, officer): (Loan, OfficerRow) = loans::table
        .inner_join(users::table)
        .select((
            loans::all_columns,
            (users::id, users::name, users::email),
        ))
        .filter(loans::id.eq(loan_id))
        .first(&mut conn)?;

    Ok(Json(to_loan_response(loan, officer)))
}

pub async fn delete_loan(
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    if !access::can(&user, Action::DeleteLoan) {
        return Err(AppError::forbidden());
    }

    let mut conn = state.db()?;

    let file_keys = conn.transaction::<Vec<String>, AppError, _>(|conn| {
        let exists: i64 = loans::table
            .filter(loans::id.eq(loan_id))
            .select(count_star())
            .first(conn)?;
        if exists == 0 {
            return Err(AppError::not_found());
        }

        let keys: Vec<Option<String>> = documents::table
            .filter(documents::loan_id.eq(loan_id))
            .select(documents::file_key)
            .load(conn)?;

        diesel::delete(stage_history::table.filter(stage_history::loan_id.eq(loan_id)))
            .execute(conn)?;
        diesel::delete(communications::table.filter(communications::loan_id.eq(Some(loan_id))))
            .execute(conn)?;
        diesel::delete(documents::table.filter(documents::loan_id.eq(loan_id))).execute(conn)?;
        diesel::delete(tasks::table.filter(tasks::loan_id.eq(Some(loan_id)))).execute(conn)?;
        diesel::delete(loans::table.find(loan_id)).execute(conn)?;

        Ok(keys.into_iter().flatten().collect())
    })?;

    // Stored files are removed best-effort after the transaction commits.
    for key in file_keys {
        if let Err(err) = state.storage.delete_object(&key).await {
            warn!(%key, error = %err, "failed to delete stored document object");
        }
    }

    info!(%loan_id, "loan deleted with dependent records");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStagesQuery {
    pub loan_officer: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStageResponse {
    pub stage: String,
    pub count: i64,
    pub total_amount: String,
}

pub async fn pipeline_stages(
    State(state): State<AppState>,
    Query(params): Query<PipelineStagesQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PipelineStageResponse>>> {
    let scope = access::loan_scope(&user);
    if scope == LoanScope::Nothing {
        return Ok(Json(vec![]));
    }

    let officer_filter = match scope {
        LoanScope::Officer(id) => Some(id),
        LoanScope::All => params.loan_officer,
        LoanScope::Nothing => None,
    };

    let mut conn = state.db()?;
    let mut query = loans::table
        .group_by(loans::current_stage)
        .select((
            loans::current_stage,
            count_star(),
            sum(loans::loan_amount),
        ))
        .into_boxed();

    if let Some(officer_id) = officer_filter {
        query = query.filter(loans::loan_officer_id.eq(officer_id));
    }

    let mut rows: Vec<(String, i64, Option<BigDecimal>)> = query.load(&mut conn)?;
    rows.sort_by(|a, b| {
        pipeline::stage_order(&a.0)
            .cmp(&pipeline::stage_order(&b.0))
            .then_with(|| a.0.cmp(&b.0))
    });

    let response = rows
        .into_iter()
        .map(|(stage, count, total)| PipelineStageResponse {
            stage,
            count,
            total_amount: money_string(&total.unwrap_or_else(BigDecimal::zero)),
        })
        .collect();

    Ok(Json(response))
}
