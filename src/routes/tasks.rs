use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Loan, NewTask, Task};
use crate::schema::{loans, tasks};
use crate::state::AppState;
use crate::utils::{
    nullable_patch,
    pagination::{PageQuery, Paginated},
    parse_iso_datetime, to_iso, to_iso_opt, NullablePatch,
};

pub const TASK_PRIORITIES: &[&str] = &["LOW", "MEDIUM", "HIGH", "URGENT"];
pub const TASK_STATUSES: &[&str] = &["PENDING", "IN_PROGRESS", "COMPLETED", "CANCELLED"];

pub const STATUS_COMPLETED: &str = "COMPLETED";
pub const STATUS_PENDING: &str = "PENDING";

const UPCOMING_WINDOW_DAYS: i64 = 7;

type LoanRef = (Uuid, String, String);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLoanSummary {
    pub id: Uuid,
    pub loan_number: String,
    pub borrower_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: String,
    pub status: String,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub loan: Option<TaskLoanSummary>,
    pub created_at: String,
    pub updated_at: String,
}

fn to_task_response(task: Task, loan: Option<LoanRef>) -> TaskResponse {
    TaskResponse {
        id: task.id,
        title: task.title,
        description: task.description,
        category: task.category,
        task_type: task.task_type,
        priority: task.priority,
        status: task.status,
        due_date: to_iso_opt(task.due_date),
        completed_at: to_iso_opt(task.completed_at),
        loan: loan.map(|(id, loan_number, borrower_name)| TaskLoanSummary {
            id,
            loan_number,
            borrower_name,
        }),
        created_at: to_iso(task.created_at),
        updated_at: to_iso(task.updated_at),
    }
}

fn start_of_today() -> NaiveDateTime {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| Utc::now().naive_utc())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub loan_id: Option<Uuid>,
    pub overdue: Option<bool>,
    pub due_today: Option<bool>,
    pub upcoming: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Paginated<TaskResponse>>> {
    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    let mut errors = Vec::new();
    if let Some(status) = params.status.as_deref() {
        if !TASK_STATUSES.contains(&status) {
            errors.push(FieldError::new("status", "unknown task status"));
        }
    }
    if let Some(priority) = params.priority.as_deref() {
        if !TASK_PRIORITIES.contains(&priority) {
            errors.push(FieldError::new("priority", "unknown task priority"));
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let start_today = start_of_today();
    let end_today = start_today + ChronoDuration::days(1);
    let upcoming_end = end_today + ChronoDuration::days(UPCOMING_WINDOW_DAYS);

    // Tasks are always caller-owned regardless of role.
    let mut query = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .into_boxed();
    let mut count_query = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .select(count_star())
        .into_boxed();

    if let Some(ref status) = params.status {
        query = query.filter(tasks::status.eq(status.clone()));
        count_query = count_query.filter(tasks::status.eq(status.clone()));
    }
    if let Some(ref priority) = params.priority {
        query = query.filter(tasks::priority.eq(priority.clone()));
        count_query = count_query.filter(tasks::priority.eq(priority.clone()));
    }
    if let Some(ref category) = params.category {
        query = query.filter(tasks::category.eq(category.clone()));
        count_query = count_query.filter(tasks::category.eq(category.clone()));
    }
    if let Some(loan_id) = params.loan_id {
        query = query.filter(tasks::loan_id.eq(Some(loan_id)));
        count_query = count_query.filter(tasks::loan_id.eq(Some(loan_id)));
    }
    if params.overdue == Some(true) {
        query = query
            .filter(tasks::due_date.lt(start_today))
            .filter(tasks::status.ne(STATUS_COMPLETED));
        count_query = count_query
            .filter(tasks::due_date.lt(start_today))
            .filter(tasks::status.ne(STATUS_COMPLETED));
    }
    if params.due_today == Some(true) {
        query = query
            .filter(tasks::due_date.ge(start_today))
            .filter(tasks::due_date.lt(end_today));
        count_query = count_query
            .filter(tasks::due_date.ge(start_today))
            .filter(tasks::due_date.lt(end_today));
    }
    if params.upcoming == Some(true) {
        query = query
            .filter(tasks::due_date.ge(end_today))
            .filter(tasks::due_date.le(upcoming_end));
        count_query = count_query
            .filter(tasks::due_date.ge(end_today))
            .filter(tasks::due_date.le(upcoming_end));
    }

    let mut conn = state.db()?;
    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<Task> = query
        .order((tasks::due_date.asc(), tasks::created_at.desc()))
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    let data = attach_loan_refs(&mut conn, rows)?;
    Ok(Json(Paginated::new(data, total, page)))
}

fn attach_loan_refs(
    conn: &mut PgConnection,
    rows: Vec<Task>,
) -> AppResult<Vec<TaskResponse>> {
    let loan_ids: Vec<Uuid> = rows.iter().filter_map(|task| task.loan_id).collect();
    let refs: Vec<LoanRef> = if loan_ids.is_empty() {
        vec![]
    } else {
        loans::table
            .filter(loans::id.eq_any(&loan_ids))
            .select((loans::id, loans::loan_number, loans::borrower_name))
            .load(conn)?
    };
    let by_id: std::collections::HashMap<Uuid, LoanRef> =
        refs.into_iter().map(|row| (row.0, row.clone())).collect();

    Ok(rows
        .into_iter()
        .map(|task| {
            let loan = task.loan_id.and_then(|id| by_id.get(&id).cloned());
            to_task_response(task, loan)
        })
        .collect())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummaryCounts {
    pub overdue: i64,
    pub due_today: i64,
    pub upcoming: i64,
    pub completed_this_week: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCount {
    pub key: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummaryBreakdown {
    pub by_category: Vec<GroupCount>,
    pub by_priority: Vec<GroupCount>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummaryResponse {
    pub summary: TaskSummaryCounts,
    pub breakdown: TaskSummaryBreakdown,
}

pub async fn task_summary(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskSummaryResponse>> {
    let mut conn = state.db()?;
    let start_today = start_of_today();
    let end_today = start_today + ChronoDuration::days(1);
    let upcoming_end = end_today + ChronoDuration::days(UPCOMING_WINDOW_DAYS);
    let week_ago = Utc::now().naive_utc() - ChronoDuration::days(7);

    let overdue: i64 = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::due_date.lt(start_today))
        .filter(tasks::status.ne(STATUS_COMPLETED))
        .select(count_star())
        .first(&mut conn)?;

    let due_today: i64 = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::due_date.ge(start_today))
        .filter(tasks::due_date.lt(end_today))
        .filter(tasks::status.ne(STATUS_COMPLETED))
        .select(count_star())
        .first(&mut conn)?;

    let upcoming: i64 = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::due_date.ge(end_today))
        .filter(tasks::due_date.le(upcoming_end))
        .filter(tasks::status.ne(STATUS_COMPLETED))
        .select(count_star())
        .first(&mut conn)?;

    let completed_this_week: i64 = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::status.eq(STATUS_COMPLETED))
        .filter(tasks::completed_at.ge(week_ago))
        .select(count_star())
        .first(&mut conn)?;

    let by_category: Vec<(String, i64)> = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::status.ne(STATUS_COMPLETED))
        .group_by(tasks::category)
        .select((tasks::category, count_star()))
        .load(&mut conn)?;

    let by_priority: Vec<(String, i64)> = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::status.ne(STATUS_COMPLETED))
        .group_by(tasks::priority)
        .select((tasks::priority, count_star()))
        .load(&mut conn)?;

    Ok(Json(TaskSummaryResponse {
        summary: TaskSummaryCounts {
            overdue,
            due_today,
            upcoming,
            completed_this_week,
        },
        breakdown: TaskSummaryBreakdown {
            by_category: by_category
                .into_iter()
                .map(|(key, count)| GroupCount { key, count })
                .collect(),
            by_priority: by_priority
                .into_iter()
                .map(|(key, count)| GroupCount { key, count })
                .collect(),
        },
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub loan_id: Option<Uuid>,
}

pub async fn create_task(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<TaskResponse>)> {
    let mut errors = Vec::new();

    let title = payload.title.trim().to_string();
    if title.is_empty() || title.len() > 200 {
        errors.push(FieldError::new("title", "must be 1 to 200 characters"));
    }
    let category = payload.category.trim().to_string();
    if category.is_empty() {
        errors.push(FieldError::new("category", "must not be empty"));
    }
    let task_type = payload.task_type.trim().to_string();
    if task_type.is_empty() {
        errors.push(FieldError::new("type", "must not be empty"));
    }
    if !TASK_PRIORITIES.contains(&payload.priority.as_str()) {
        errors.push(FieldError::new("priority", "unknown task priority"));
    }
    let due_date = match payload.due_date.as_deref() {
        Some(raw) => match parse_iso_datetime(raw) {
            Some(parsed) => Some(parsed),
            None => {
                errors.push(FieldError::new("dueDate", "must be an ISO-8601 date"));
                None
            }
        },
        None => None,
    };
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let mut conn = state.db()?;

    if let Some(loan_id) = payload.loan_id {
        let scope = access::loan_scope(&user);
        let loan: Option<Loan> = loans::table.find(loan_id).first(&mut conn).optional()?;
        // An out-of-scope loan reads the same as a missing one.
        let visible = matches!(&loan, Some(loan) if scope.permits(loan.loan_officer_id));
        if !visible {
            return Err(AppError::validation(vec![FieldError::new(
                "loanId",
                "loan does not exist",
            )]));
        }
    }

    let new_task = NewTask {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        loan_id: payload.loan_id,
        title,
        description: payload.description,
        category,
        task_type,
        priority: payload.priority,
        status: STATUS_PENDING.to_string(),
        due_date,
    };

    diesel::insert_into(tasks::table)
        .values(&new_task)
        .execute(&mut conn)?;

    let task: Task = tasks::table.find(new_task.id).first(&mut conn)?;
    let data = attach_loan_refs(&mut conn, vec![task])?;
    let response = data.into_iter().next().ok_or_else(AppError::not_found)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let task: Task = tasks::table
        .find(task_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !access::may_mutate_owned(&user, task.user_id) {
        return Err(AppError::not_found());
    }

    let data = attach_loan_refs(&mut conn, vec![task])?;
    let response = data.into_iter().next().ok_or_else(AppError::not_found)?;
    Ok(Json(response))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpdateTaskFields {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    #[serde(rename = "type")]
    task_type: Option<String>,
    priority: Option<String>,
    status: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = tasks)]
struct TaskChangeset {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    task_type: Option<String>,
    priority: Option<String>,
    status: Option<String>,
    due_date: Option<Option<NaiveDateTime>>,
    completed_at: Option<Option<NaiveDateTime>>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(body): Json<Value>,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let existing: Task = tasks::table
        .find(task_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !access::may_mutate_owned(&user, existing.user_id) {
        return Err(AppError::not_found());
    }

    let fields: UpdateTaskFields =
        serde_json::from_value(body.clone()).map_err(|err| AppError::bad_request(err.to_string()))?;

    let mut errors = Vec::new();
    let mut changeset = TaskChangeset::default();

    if let Some(ref title) = fields.title {
        let trimmed = title.trim();
        if trimmed.is_empty() || trimmed.len() > 200 {
            errors.push(FieldError::new("title", "must be 1 to 200 characters"));
        } else {
            changeset.title = Some(trimmed.to_string());
        }
    }
    if let Some(ref description) = fields.description {
        changeset.description = Some(description.clone());
    }
    if let Some(ref category) = fields.category {
        if category.trim().is_empty() {
            errors.push(FieldError::new("category", "must not be empty"));
        } else {
            changeset.category = Some(category.trim().to_string());
        }
    }
    if let Some(ref task_type) = fields.task_type {
        if task_type.trim().is_empty() {
            errors.push(FieldError::new("type", "must not be empty"));
        } else {
            changeset.task_type = Some(task_type.trim().to_string());
        }
    }
    if let Some(ref priority) = fields.priority {
        if !TASK_PRIORITIES.contains(&priority.as_str()) {
            errors.push(FieldError::new("priority", "unknown task priority"));
        } else {
            changeset.priority = Some(priority.clone());
        }
    }

    // dueDate distinguishes "omitted" from an explicit null that clears it.
    match nullable_patch(body.get("dueDate")).map_err(AppError::bad_request)? {
        NullablePatch::Omitted => {}
        NullablePatch::Clear => changeset.due_date = Some(None),
        NullablePatch::Value(raw) => match parse_iso_datetime(&raw) {
            Some(parsed) => changeset.due_date = Some(Some(parsed)),
            None => errors.push(FieldError::new("dueDate", "must be an ISO-8601 date")),
        },
    }

    if let Some(ref status) = fields.status {
        if !TASK_STATUSES.contains(&status.as_str()) {
            errors.push(FieldError::new("status", "unknown task status"));
        } else {
            changeset.status = Some(status.clone());
            // completedAt tracks COMPLETED exactly: stamped when the task
            // completes, cleared when it moves to any other status.
            if status == STATUS_COMPLETED {
                if existing.status != STATUS_COMPLETED {
                    changeset.completed_at = Some(Some(Utc::now().naive_utc()));
                }
            } else {
                changeset.completed_at = Some(None);
            }
        }
    }

    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    changeset.updated_at = Some(Utc::now().naive_utc());
    diesel::update(tasks::table.find(task_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    let data = attach_loan_refs(&mut conn, vec![task])?;
    let response = data.into_iter().next().ok_or_else(AppError::not_found)?;
    Ok(Json(response))
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let existing: Task = tasks::table
        .find(task_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !access::may_mutate_owned(&user, existing.user_id) {
        return Err(AppError::not_found());
    }

    let now = Utc::now().naive_utc();
    diesel::update(tasks::table.find(task_id))
        .set((
            tasks::status.eq(STATUS_COMPLETED),
            tasks::completed_at.eq(Some(now)),
            tasks::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let task: Task = tasks::table.find(task_id).first(&mut conn)?;
    let data = attach_loan_refs(&mut conn, vec![task])?;
    let response = data.into_iter().next().ok_or_else(AppError::not_found)?;
    Ok(Json(response))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let existing: Task = tasks::table
        .find(task_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !access::may_mutate_owned(&user, existing.user_id) {
        return Err(AppError::not_found());
    }

    diesel::delete(tasks::table.find(task_id)).execute(&mut conn)?;
    Ok(StatusCode::NO_CONTENT)
}
