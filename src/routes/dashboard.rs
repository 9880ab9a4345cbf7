use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::Json;
use bigdecimal::{BigDecimal, Zero};
use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::dsl::{avg, count_star, sum};
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{self, LoanScope, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Communication, Task};
use crate::pipeline::STAGE_CLOSED;
use crate::schema::{communications, loans, stage_history, tasks};
use crate::state::AppState;
use crate::utils::{money_string, percentage, period_days, to_iso, to_iso_opt};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCount {
    pub key: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageAmount {
    pub stage: String,
    pub status: String,
    pub count: i64,
    pub total_amount: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAmount {
    pub status: String,
    pub count: i64,
    pub total_amount: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardTaskItem {
    pub id: Uuid,
    pub title: String,
    pub priority: String,
    pub due_date: Option<String>,
    pub loan_number: Option<String>,
    pub borrower_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCommunicationItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub comm_type: String,
    pub direction: String,
    pub subject: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewSummary {
    pub total_loans: i64,
    pub active_loans: i64,
    pub overdue_tasks: usize,
    pub upcoming_tasks: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewTasks {
    pub overdue: Vec<DashboardTaskItem>,
    pub upcoming: Vec<DashboardTaskItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewResponse {
    pub summary: OverviewSummary,
    pub pipeline: Vec<StageAmount>,
    pub tasks: OverviewTasks,
    pub recent_communications: Vec<DashboardCommunicationItem>,
    pub monthly_stats: Vec<StatusAmount>,
}

fn task_items(conn: &mut PgConnection, rows: Vec<Task>) -> AppResult<Vec<DashboardTaskItem>> {
    let loan_ids: Vec<Uuid> = rows.iter().filter_map(|task| task.loan_id).collect();
    let refs: Vec<(Uuid, String, String)> = if loan_ids.is_empty() {
        vec![]
    } else {
        loans::table
            .filter(loans::id.eq_any(&loan_ids))
            .select((loans::id, loans::loan_number, loans::borrower_name))
            .load(conn)?
    };
    let by_id: BTreeMap<Uuid, (String, String)> = refs
        .into_iter()
        .map(|(id, number, borrower)| (id, (number, borrower)))
        .collect();

    Ok(rows
        .into_iter()
        .map(|task| {
            let loan_ref = task.loan_id.and_then(|id| by_id.get(&id).cloned());
            DashboardTaskItem {
                id: task.id,
                title: task.title,
                priority: task.priority,
                due_date: to_iso_opt(task.due_date),
                loan_number: loan_ref.as_ref().map(|(number, _)| number.clone()),
                borrower_name: loan_ref.map(|(_, borrower)| borrower),
            }
        })
        .collect())
}

pub async fn overview(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<OverviewResponse>> {
    let scope = access::loan_scope(&user);
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let upcoming_end = now + ChronoDuration::days(7);
    let month_start = Utc::now()
        .date_naive()
        .with_day(1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or(now);

    let total_loans: i64 = match scope {
        LoanScope::All => loans::table.select(count_star()).first(&mut conn)?,
        LoanScope::Officer(id) => loans::table
            .filter(loans::loan_officer_id.eq(id))
            .select(count_star())
            .first(&mut conn)?,
        LoanScope::Nothing => 0,
    };

    let pipeline_rows: Vec<(String, String, i64, Option<BigDecimal>)> = match scope {
        LoanScope::All => loans::table
            .filter(loans::current_stage.ne(STAGE_CLOSED))
            .group_by((loans::current_stage, loans::status))
            .select((
                loans::current_stage,
                loans::status,
                count_star(),
                sum(loans::loan_amount),
            ))
            .load(&mut conn)?,
        LoanScope::Officer(id) => loans::table
            .filter(loans::loan_officer_id.eq(id))
            .filter(loans::current_stage.ne(STAGE_CLOSED))
            .group_by((loans::current_stage, loans::status))
            .select((
                loans::current_stage,
                loans::status,
                count_star(),
                sum(loans::loan_amount),
            ))
            .load(&mut conn)?,
        LoanScope::Nothing => vec![],
    };

    let active_loans: i64 = pipeline_rows.iter().map(|row| row.2).sum();

    let overdue_rows: Vec<Task> = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::due_date.lt(now))
        .filter(tasks::status.ne(super::tasks::STATUS_COMPLETED))
        .order(tasks::due_date.asc())
        .limit(10)
        .load(&mut conn)?;

    let upcoming_rows: Vec<Task> = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::due_date.ge(now))
        .filter(tasks::due_date.le(upcoming_end))
        .filter(tasks::status.ne(super::tasks::STATUS_COMPLETED))
        .order(tasks::due_date.asc())
        .limit(10)
        .load(&mut conn)?;

    let mut comms_query = communications::table
        .left_join(loans::table)
        .select(communications::all_columns)
        .into_boxed();
    if user.role == Some(Role::Lo) {
        comms_query = comms_query.filter(
            communications::user_id
                .eq(user.user_id)
                .or(loans::loan_officer_id.eq(user.user_id)),
        );
    } else if user.role.is_none() {
        comms_query = comms_query.filter(communications::user_id.eq(user.user_id));
    }
    let recent_comms: Vec<Communication> = comms_query
        .order(communications::created_at.desc())
        .limit(10)
        .load(&mut conn)?;

    let monthly_rows: Vec<(String, i64, Option<BigDecimal>)> = match scope {
        LoanScope::All => loans::table
            .filter(loans::created_at.ge(month_start))
            .group_by(loans::status)
            .select((loans::status, count_star(), sum(loans::loan_amount)))
            .load(&mut conn)?,
        LoanScope::Officer(id) => loans::table
            .filter(loans::loan_officer_id.eq(id))
            .filter(loans::created_at.ge(month_start))
            .group_by(loans::status)
            .select((loans::status, count_star(), sum(loans::loan_amount)))
            .load(&mut conn)?,
        LoanScope::Nothing => vec![],
    };

    let overdue = task_items(&mut conn, overdue_rows)?;
    let upcoming = task_items(&mut conn, upcoming_rows)?;

    Ok(Json(OverviewResponse {
        summary: OverviewSummary {
            total_loans,
            active_loans,
            overdue_tasks: overdue.len(),
            upcoming_tasks: upcoming.len(),
        },
        pipeline: pipeline_rows
            .into_iter()
            .map(|(stage, status, count, total)| StageAmount {
                stage,
                status,
                count,
                total_amount: money_string(&total.unwrap_or_else(BigDecimal::zero)),
            })
            .collect(),
        tasks: OverviewTasks { overdue, upcoming },
        recent_communications: recent_comms
            .into_iter()
            .map(|comm| DashboardCommunicationItem {
                id: comm.id,
                comm_type: comm.comm_type,
                direction: comm.direction,
                subject: comm.subject,
                created_at: to_iso(comm.created_at),
            })
            .collect(),
        monthly_stats: monthly_rows
            .into_iter()
            .map(|(status, count, total)| StatusAmount {
                status,
                count,
                total_amount: money_string(&total.unwrap_or_else(BigDecimal::zero)),
            })
            .collect(),
    }))
}

#[derive(Deserialize)]
pub struct PeriodQuery {
    pub period: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedLoanItem {
    pub id: Uuid,
    pub loan_amount: String,
    pub borrower_name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub closed_loans: usize,
    pub total_volume: String,
    pub average_time_to_close: f64,
    pub task_completion_rate: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceResponse {
    pub period: String,
    pub metrics: PerformanceMetrics,
    pub closed_loans: Vec<ClosedLoanItem>,
    pub conversion_rates: Vec<GroupCount>,
    pub task_completion: Vec<GroupCount>,
    pub communication_volume: Vec<GroupCount>,
}

pub async fn performance(
    State(state): State<AppState>,
    Query(params): Query<PeriodQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<PerformanceResponse>> {
    let period = params.period.unwrap_or_else(|| "30d".to_string());
    let days = period_days(&period).ok_or_else(|| {
        AppError::validation(vec![FieldError::new("period", "unknown period")])
    })?;
    let since = Utc::now().naive_utc() - ChronoDuration::days(days);

    let scope = access::loan_scope(&user);
    let mut conn = state.db()?;

    let closed_query = |conn: &mut PgConnection| -> AppResult<Vec<(Uuid, BigDecimal, String, NaiveDateTime, NaiveDateTime)>> {
        let mut query = loans::table
            .filter(loans::current_stage.eq(STAGE_CLOSED))
            .filter(loans::updated_at.ge(since))
            .select((
                loans::id,
                loans::loan_amount,
                loans::borrower_name,
                loans::created_at,
                loans::updated_at,
            ))
            .into_boxed();
        if let LoanScope::Officer(id) = scope {
            query = query.filter(loans::loan_officer_id.eq(id));
        }
        Ok(query.load(conn)?)
    };
    let closed: Vec<(Uuid, BigDecimal, String, NaiveDateTime, NaiveDateTime)> =
        if scope == LoanScope::Nothing {
            vec![]
        } else {
            closed_query(&mut conn)?
        };

    let average_time_to_close: f64 = if scope == LoanScope::Nothing {
        0.0
    } else {
        let mut query = loans::table
            .filter(loans::current_stage.eq(STAGE_CLOSED))
            .filter(loans::updated_at.ge(since))
            .select(avg(loans::time_in_stage))
            .into_boxed();
        if let LoanScope::Officer(id) = scope {
            query = query.filter(loans::loan_officer_id.eq(id));
        }
        let value: Option<BigDecimal> = query.first(&mut conn)?;
        value
            .map(|avg| avg.with_scale(2).to_string().parse().unwrap_or(0.0))
            .unwrap_or(0.0)
    };

    let conversion_rows: Vec<String> = if scope == LoanScope::Nothing {
        vec![]
    } else {
        let mut query = stage_history::table
            .inner_join(loans::table)
            .filter(stage_history::entered_at.ge(since))
            .select(stage_history::stage)
            .into_boxed();
        if let LoanScope::Officer(id) = scope {
            query = query.filter(loans::loan_officer_id.eq(id));
        }
        query.load(&mut conn)?
    };
    let mut conversion_counts: BTreeMap<String, i64> = BTreeMap::new();
    for stage in conversion_rows {
        *conversion_counts.entry(stage).or_default() += 1;
    }

    let task_rows: Vec<(String, i64)> = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::created_at.ge(since))
        .group_by(tasks::status)
        .select((tasks::status, count_star()))
        .load(&mut conn)?;

    let completed_tasks = task_rows
        .iter()
        .find(|(status, _)| status == super::tasks::STATUS_COMPLETED)
        .map(|(_, count)| *count)
        .unwrap_or(0);
    let total_tasks: i64 = task_rows.iter().map(|(_, count)| *count).sum();

    let mut comms_query = communications::table
        .left_join(loans::table)
        .filter(communications::created_at.ge(since))
        .select(communications::comm_type)
        .into_boxed();
    if user.role == Some(Role::Lo) {
        comms_query = comms_query.filter(
            communications::user_id
                .eq(user.user_id)
                .or(loans::loan_officer_id.eq(user.user_id)),
        );
    } else if user.role.is_none() {
        comms_query = comms_query.filter(communications::user_id.eq(user.user_id));
    }
    let comm_rows: Vec<String> = comms_query.load(&mut conn)?;
    let mut comm_counts: BTreeMap<String, i64> = BTreeMap::new();
    for comm_type in comm_rows {
        *comm_counts.entry(comm_type).or_default() += 1;
    }

    let total_volume = closed
        .iter()
        .fold(BigDecimal::zero(), |acc, row| acc + row.1.clone());

    Ok(Json(PerformanceResponse {
        period,
        metrics: PerformanceMetrics {
            closed_loans: closed.len(),
            total_volume: money_string(&total_volume),
            average_time_to_close,
            task_completion_rate: percentage(completed_tasks, total_tasks),
        },
        closed_loans: closed
            .into_iter()
            .map(|(id, amount, borrower_name, created_at, updated_at)| ClosedLoanItem {
                id,
                loan_amount: money_string(&amount),
                borrower_name,
                created_at: to_iso(created_at),
                updated_at: to_iso(updated_at),
            })
            .collect(),
        conversion_rates: conversion_counts
            .into_iter()
            .map(|(key, count)| GroupCount { key, count })
            .collect(),
        task_completion: task_rows
            .into_iter()
            .map(|(key, count)| GroupCount { key, count })
            .collect(),
        communication_volume: comm_counts
            .into_iter()
            .map(|(key, count)| GroupCount { key, count })
            .collect(),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDistributionItem {
    pub stage: String,
    pub count: i64,
    pub total_amount: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTypeItem {
    #[serde(rename = "type")]
    pub loan_type: String,
    pub count: i64,
    pub total_amount: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyTrendItem {
    pub month: String,
    pub loan_count: i64,
    pub total_amount: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResponse {
    pub daily_activity: Vec<DailyCount>,
    pub stage_distribution: Vec<StageDistributionItem>,
    pub loan_type_breakdown: Vec<LoanTypeItem>,
    pub monthly_trends: Vec<MonthlyTrendItem>,
}

pub async fn analytics(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<AnalyticsResponse>> {
    let scope = access::loan_scope(&user);
    let mut conn = state.db()?;
    let thirty_days_ago = Utc::now().naive_utc() - ChronoDuration::days(30);
    let year_ago = Utc::now().naive_utc() - ChronoDuration::days(365);

    let task_dates: Vec<NaiveDateTime> = tasks::table
        .filter(tasks::user_id.eq(user.user_id))
        .filter(tasks::created_at.ge(thirty_days_ago))
        .select(tasks::created_at)
        .load(&mut conn)?;
    let mut daily: BTreeMap<String, i64> = BTreeMap::new();
    for created_at in task_dates {
        *daily.entry(created_at.date().to_string()).or_default() += 1;
    }

    let stage_rows: Vec<(String, i64, Option<BigDecimal>)> = match scope {
        LoanScope::All => loans::table
            .group_by(loans::current_stage)
            .select((loans::current_stage, count_star(), sum(loans::loan_amount)))
            .load(&mut conn)?,
        LoanScope::Officer(id) => loans::table
            .filter(loans::loan_officer_id.eq(id))
            .group_by(loans::current_stage)
            .select((loans::current_stage, count_star(), sum(loans::loan_amount)))
            .load(&mut conn)?,
        LoanScope::Nothing => vec![],
    };

    let type_rows: Vec<(String, i64, Option<BigDecimal>)> = match scope {
        LoanScope::All => loans::table
            .group_by(loans::loan_type)
            .select((loans::loan_type, count_star(), sum(loans::loan_amount)))
            .load(&mut conn)?,
        LoanScope::Officer(id) => loans::table
            .filter(loans::loan_officer_id.eq(id))
            .group_by(loans::loan_type)
            .select((loans::loan_type, count_star(), sum(loans::loan_amount)))
            .load(&mut conn)?,
        LoanScope::Nothing => vec![],
    };

    // Monthly buckets are keyed in-process; no date arithmetic pushed down
    // as raw SQL.
    let monthly_rows: Vec<(NaiveDateTime, BigDecimal)> = match scope {
        LoanScope::All => loans::table
            .filter(loans::created_at.ge(year_ago))
            .select((loans::created_at, loans::loan_amount))
            .load(&mut conn)?,
        LoanScope::Officer(id) => loans::table
            .filter(loans::loan_officer_id.eq(id))
            .filter(loans::created_at.ge(year_ago))
            .select((loans::created_at, loans::loan_amount))
            .load(&mut conn)?,
        LoanScope::Nothing => vec![],
    };
    let mut monthly: BTreeMap<String, (i64, BigDecimal)> = BTreeMap::new();
    for (created_at, amount) in monthly_rows {
        let key = format!("{:04}-{:02}", created_at.year(), created_at.month());
        let entry = monthly.entry(key).or_insert((0, BigDecimal::zero()));
        entry.0 += 1;
        entry.1 += amount;
    }

    Ok(Json(AnalyticsResponse {
        daily_activity: daily
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect(),
        stage_distribution: stage_rows
            .into_iter()
            .map(|(stage, count, total)| StageDistributionItem {
                stage,
                count,
                total_amount: money_string(&total.unwrap_or_else(BigDecimal::zero)),
            })
            .collect(),
        loan_type_breakdown: type_rows
            .into_iter()
            .map(|(loan_type, count, total)| LoanTypeItem {
                loan_type,
                count,
                total_amount: money_string(&total.unwrap_or_else(BigDecimal::zero)),
            })
            .collect(),
        monthly_trends: monthly
            .into_iter()
            .map(|(month, (loan_count, total_amount))| MonthlyTrendItem {
                month,
                loan_count,
                total_amount: money_string(&total_amount),
            })
            .collect(),
    }))
}
