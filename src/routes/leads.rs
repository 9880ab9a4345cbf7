use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bigdecimal::{BigDecimal, Zero};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, Action};
use crate::auth::AuthenticatedUser;
use crate::contacts::{loan_type_for_tags, Contact, ContactPayload};
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{LeadSource, Loan, NewLeadSource, NewLoan, NewTask};
use crate::pipeline::{self, STAGE_NEW_LEAD};
use crate::routes::loans::{parse_money, LOAN_TYPES};
use crate::schema::{lead_sources, loans, tasks, users};
use crate::state::AppState;
use crate::utils::{money_string, parse_iso_datetime, percentage, to_iso};

#[derive(Deserialize)]
pub struct ExternalLeadsQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub query: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalLeadsResponse {
    pub contacts: Vec<Contact>,
    pub total: usize,
    pub limit: u32,
    pub offset: u32,
}

pub async fn external_leads(
    State(state): State<AppState>,
    Query(params): Query<ExternalLeadsQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<ExternalLeadsResponse>> {
    if !access::can(&user, Action::ListExternalLeads) {
        return Err(AppError::forbidden());
    }

    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let offset = params.offset.unwrap_or(0);

    let contacts = match params.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => state.contacts.search_contacts(query).await?,
        None => state.contacts.list_contacts(limit, offset).await?,
    };

    Ok(Json(ExternalLeadsResponse {
        total: contacts.len(),
        contacts,
        limit,
        offset,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLeadRequest {
    pub loan_amount: String,
    pub target_close_date: String,
    pub loan_type: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceContactSummary {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportLeadResponse {
    pub loan: crate::routes::loans::LoanResponse,
    pub source_contact: SourceContactSummary,
}

/// Imports an external contact as a loan. The directory is consulted before
/// any local write; a missing contact aborts with 404 and no partial state.
/// The loan, its initial stage-history entry, and the follow-up call task
/// land in one transaction.
pub async fn import_lead(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
    user: AuthenticatedUser,
    Json(payload): Json<ImportLeadRequest>,
) -> AppResult<(StatusCode, Json<ImportLeadResponse>)> {
    if !access::can(&user, Action::ImportLead) {
        return Err(AppError::forbidden());
    }

    let mut errors = Vec::new();
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
    if let Some(loan_type) = payload.loan_type.as_deref() {
        if !LOAN_TYPES.contains(&loan_type) {
            errors.push(FieldError::new("loanType", "unknown loan type"));
        }
    }
    let (Some(loan_amount), Some(target_close_date)) = (loan_amount, target_close_date) else {
        return Err(AppError::validation(errors));
    };
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let contact = state
        .contacts
        .get_contact(&contact_id)
        .await?
        .ok_or_else(AppError::not_found)?;

    let borrower_name = contact.full_name();
    let loan_type = payload
        .loan_type
        .unwrap_or_else(|| loan_type_for_tags(&contact.tags).to_string());

    let now = Utc::now();
    let now_naive = now.naive_utc();
    let new_loan = NewLoan {
        id: Uuid::new_v4(),
        loan_number: pipeline::generate_loan_number(now),
        borrower_name: borrower_name.clone(),
        borrower_email: contact.email.clone(),
        borrower_phone: contact.phone.clone(),
        property_address: contact.address.clone().unwrap_or_default(),
        loan_type,
        loan_amount,
        target_close_date,
        current_stage: STAGE_NEW_LEAD.to_string(),
        status: super::loans::DEFAULT_LOAN_STATUS.to_string(),
        loan_officer_id: user.user_id,
    };

    let follow_up = NewTask {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        loan_id: Some(new_loan.id),
        title: format!("Follow up with {borrower_name}"),
        description: Some("Initial contact imported from the lead directory".to_string()),
        category: "Client Communication Touchpoints".to_string(),
        task_type: "Call".to_string(),
        priority: "HIGH".to_string(),
        status: super::tasks::STATUS_PENDING.to_string(),
        due_date: Some(now_naive + ChronoDuration::days(1)),
    };

    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        diesel::insert_into(loans::table)
            .values(&new_loan)
            .execute(conn)?;
        pipeline::open_initial_stage(conn, new_loan.id, STAGE_NEW_LEAD, now_naive)?;
        diesel::insert_into(tasks::table)
            .values(&follow_up)
            .execute(conn)?;
        Ok(())
    })?;

    info!(loan_id = %new_loan.id, %contact_id, "lead imported as loan");

    let (loan, officer): (Loan, (Uuid, String, String)) = loans::table
        .inner_join(users::table)
        .select((
            loans::all_columns,
            (users::id, users::name, users::email),
        ))
        .filter(loans::id.eq(new_loan.id))
        .first(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(ImportLeadResponse {
            loan: super::loans::to_loan_response(loan, officer),
            source_contact: SourceContactSummary {
                id: contact.id,
                name: borrower_name,
                email: contact.email,
            },
        }),
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLeadResponse {
    pub contact: Contact,
    pub action: String,
}

/// Pushes loan fields back to the contact directory. The upstream call runs
/// before and instead of any local write, so a directory failure never
/// touches local state.
pub async fn sync_lead(
    State(state): State<AppState>,
    Path(loan_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<SyncLeadResponse>> {
    if !access::can(&user, Action::SyncLead) {
        return Err(AppError::forbidden());
    }

    let scope = access::loan_scope(&user);
    let mut conn = state.db()?;
    let (loan, officer_name): (Loan, String) = loans::table
        .inner_join(users::table)
        .select((loans::all_columns, users::name))
        .filter(loans::id.eq(loan_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    if !scope.permits(loan.loan_officer_id) {
        return Err(AppError::not_found());
    }
    drop(conn);

    let (first_name, last_name) = split_name(&loan.borrower_name);
    let contact_payload = ContactPayload {
        first_name,
        last_name,
        email: loan.borrower_email.clone(),
        phone: loan.borrower_phone.clone(),
        address: loan.property_address.clone(),
        tags: vec![loan.loan_type.clone(), loan.current_stage.clone()],
        custom_fields: json!({
            "loanNumber": loan.loan_number,
            "loanAmount": money_string(&loan.loan_amount),
            "targetCloseDate": to_iso(loan.target_close_date),
            "loanOfficer": officer_name,
        }),
    };

    let existing = match loan.borrower_email.as_deref() {
        Some(email) => state
            .contacts
            .search_contacts(email)
            .await?
            .into_iter()
            .next(),
        None => None,
    };

    let (contact, action) = match existing {
        Some(found) => {
            let updated = state
                .contacts
                .update_contact(&found.id, &contact_payload)
                .await?;
            (updated, "updated")
        }
        None => {
            let created = state.contacts.create_contact(&contact_payload).await?;
            (created, "created")
        }
    };

    Ok(Json(SyncLeadResponse {
        contact,
        action: action.to_string(),
    }))
}

fn split_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = parts.collect();
    (first, rest.join(" "))
}

#[derive(Deserialize)]
pub struct SourcesQuery {
    pub period: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSourceResponse {
    pub id: Uuid,
    pub name: String,
    pub total_leads: i32,
    pub converted_leads: i32,
    pub conversion_rate: String,
    pub is_active: bool,
}

impl From<LeadSource> for LeadSourceResponse {
    fn from(source: LeadSource) -> Self {
        Self {
            id: source.id,
            name: source.name,
            total_leads: source.total_leads,
            converted_leads: source.converted_leads,
            conversion_rate: source.conversion_rate.with_scale(2).to_string(),
            is_active: source.is_active,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSourcesSummary {
    pub total_leads: i64,
    pub total_converted: i64,
    pub average_conversion: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentStageActivity {
    pub stage: String,
    pub count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSourcesResponse {
    pub period: String,
    pub summary: LeadSourcesSummary,
    pub sources: Vec<LeadSourceResponse>,
    pub recent_activity: Vec<RecentStageActivity>,
}

pub async fn lead_sources(
    State(state): State<AppState>,
    Query(params): Query<SourcesQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<LeadSourcesResponse>> {
    if !access::can(&user, Action::ViewLeadSources) {
        return Err(AppError::forbidden());
    }

    let period = params.period.unwrap_or_else(|| "30d".to_string());
    let days = crate::utils::period_days(&period).ok_or_else(|| {
        AppError::validation(vec![FieldError::new("period", "unknown period")])
    })?;
    let since = Utc::now().naive_utc() - ChronoDuration::days(days);

    let mut conn = state.db()?;
    let sources: Vec<LeadSource> = lead_sources::table
        .filter(lead_sources::is_active.eq(true))
        .order(lead_sources::total_leads.desc())
        .load(&mut conn)?;

    let total_leads: i64 = sources.iter().map(|source| source.total_leads as i64).sum();
    let total_converted: i64 = sources
        .iter()
        .map(|source| source.converted_leads as i64)
        .sum();

    let recent_rows: Vec<String> = loans::table
        .filter(loans::created_at.ge(since))
        .select(loans::current_stage)
        .load(&mut conn)?;
    let mut recent: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
    for stage in recent_rows {
        *recent.entry(stage).or_default() += 1;
    }

    Ok(Json(LeadSourcesResponse {
        period,
        summary: LeadSourcesSummary {
            total_leads,
            total_converted,
            average_conversion: percentage(total_converted, total_leads),
        },
        sources: sources.into_iter().map(LeadSourceResponse::from).collect(),
        recent_activity: recent
            .into_iter()
            .map(|(stage, count)| RecentStageActivity { stage, count })
            .collect(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertLeadSourceRequest {
    pub name: String,
    pub total_leads: Option<i32>,
    pub converted_leads: Option<i32>,
}

pub async fn upsert_lead_source(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpsertLeadSourceRequest>,
) -> AppResult<Json<LeadSourceResponse>> {
    if !access::can(&user, Action::ManageLeadSources) {
        return Err(AppError::forbidden());
    }

    let mut errors = Vec::new();
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    }
    let total_leads = payload.total_leads.unwrap_or(0);
    if total_leads < 0 {
        errors.push(FieldError::new("totalLeads", "must not be negative"));
    }
    let converted_leads = payload.converted_leads.unwrap_or(0);
    if converted_leads < 0 {
        errors.push(FieldError::new("convertedLeads", "must not be negative"));
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    let rate = percentage(converted_leads as i64, total_leads as i64);
    let conversion_rate =
        BigDecimal::from_str(&format!("{rate:.2}")).unwrap_or_else(|_| BigDecimal::zero());

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let new_source = NewLeadSource {
        id: Uuid::new_v4(),
        name: name.clone(),
        total_leads,
        converted_leads,
        conversion_rate: conversion_rate.clone(),
    };

    diesel::insert_into(lead_sources::table)
        .values(&new_source)
        .on_conflict(lead_sources::name)
        .do_update()
        .set((
            lead_sources::total_leads.eq(total_leads),
            lead_sources::converted_leads.eq(converted_leads),
            lead_sources::conversion_rate.eq(conversion_rate),
            lead_sources::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let source: LeadSource = lead_sources::table
        .filter(lead_sources::name.eq(&name))
        .first(&mut conn)?;

    Ok(Json(source.into()))
}

#[cfg(test)]
mod tests {
    use super::split_name;

    #[test]
    fn splits_first_name_from_the_rest() {
        assert_eq!(
            split_name("Dana Whitfield"),
            ("Dana".to_string(), "Whitfield".to_string())
        );
        assert_eq!(
            split_name("Mary Anne van der Berg"),
            ("Mary".to_string(), "Anne van der Berg".to_string())
        );
        assert_eq!(split_name("Cher"), ("Cher".to_string(), String::new()));
    }
}
