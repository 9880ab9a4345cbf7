use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub primary_role: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub primary_role: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = loans)]
#[diesel(belongs_to(User, foreign_key = loan_officer_id))]
pub struct Loan {
    pub id: Uuid,
    pub loan_number: String,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub property_address: String,
    pub loan_type: String,
    pub loan_amount: BigDecimal,
    pub target_close_date: NaiveDateTime,
    pub current_stage: String,
    pub status: String,
    pub progress: i32,
    pub time_in_stage: i32,
    pub loan_officer_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = loans)]
pub struct NewLoan {
    pub id: Uuid,
    pub loan_number: String,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub property_address: String,
    pub loan_type: String,
    pub loan_amount: BigDecimal,
    pub target_close_date: NaiveDateTime,
    pub current_stage: String,
    pub status: String,
    pub loan_officer_id: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = stage_history)]
#[diesel(belongs_to(Loan))]
pub struct StageHistoryEntry {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub stage: String,
    pub entered_at: NaiveDateTime,
    pub exited_at: Option<NaiveDateTime>,
    pub duration: Option<i32>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = stage_history)]
pub struct NewStageHistoryEntry {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub stage: String,
    pub entered_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = tasks)]
#[diesel(belongs_to(Loan))]
#[diesel(belongs_to(User))]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub task_type: String,
    pub priority: String,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub loan_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub task_type: String,
    pub priority: String,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Loan))]
pub struct Document {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub name: String,
    pub doc_type: String,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
    pub file_key: Option<String>,
    pub content_type: Option<String>,
    pub uploaded_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub name: String,
    pub doc_type: String,
    pub status: String,
    pub due_date: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = communications)]
#[diesel(belongs_to(Loan))]
#[diesel(belongs_to(User))]
pub struct Communication {
    pub id: Uuid,
    pub loan_id: Option<Uuid>,
    pub user_id: Uuid,
    pub comm_type: String,
    pub direction: String,
    pub subject: Option<String>,
    pub message: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = communications)]
pub struct NewCommunication {
    pub id: Uuid,
    pub loan_id: Option<Uuid>,
    pub user_id: Uuid,
    pub comm_type: String,
    pub direction: String,
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = notifications)]
#[diesel(belongs_to(User))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notif_type: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notif_type: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = appointments)]
#[diesel(belongs_to(User))]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub category: String,
    pub color: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = appointments)]
pub struct NewAppointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub category: String,
    pub color: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = lead_sources)]
pub struct LeadSource {
    pub id: Uuid,
    pub name: String,
    pub total_leads: i32,
    pub converted_leads: i32,
    pub conversion_rate: BigDecimal,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = lead_sources)]
pub struct NewLeadSource {
    pub id: Uuid,
    pub name: String,
    pub total_leads: i32,
    pub converted_leads: i32,
    pub conversion_rate: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
