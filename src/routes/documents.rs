use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::access::{self, LoanScope};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{Document, Loan, NewDocument};
use crate::schema::{documents, loans};
use crate::state::AppState;
use crate::utils::{
    pagination::{PageQuery, Paginated},
    parse_iso_datetime, to_iso, to_iso_opt,
};

pub const DOCUMENT_STATUSES: &[&str] =
    &["REQUIRED", "PENDING", "RECEIVED", "REVIEWED", "APPROVED"];

pub const STATUS_REQUIRED: &str = "REQUIRED";
pub const STATUS_RECEIVED: &str = "RECEIVED";

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

/// Upload allow-list, checked before any bytes reach object storage.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "pdf", "doc", "docx", "xls", "xlsx",
];

const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

type LoanRef = (Uuid, String, String);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLoanSummary {
    pub id: Uuid,
    pub loan_number: String,
    pub borrower_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentResponse {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub status: String,
    pub due_date: Option<String>,
    pub uploaded_at: Option<String>,
    pub has_file: bool,
    pub loan: DocumentLoanSummary,
    pub created_at: String,
    pub updated_at: String,
}

fn to_document_response(document: Document, loan: LoanRef) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        name: document.name,
        doc_type: document.doc_type,
        status: document.status,
        due_date: to_iso_opt(document.due_date),
        uploaded_at: to_iso_opt(document.uploaded_at),
        has_file: document.file_key.is_some(),
        loan: DocumentLoanSummary {
            id: loan.0,
            loan_number: loan.1,
            borrower_name: loan.2,
        },
        created_at: to_iso(document.created_at),
        updated_at: to_iso(document.updated_at),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentListQuery {
    pub loan_id: Option<Uuid>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Paginated<DocumentResponse>>> {
    let page = PageQuery {
        page: params.page,
        limit: params.limit,
    }
    .resolve()?;

    if let Some(status) = params.status.as_deref() {
        if !DOCUMENT_STATUSES.contains(&status) {
            return Err(AppError::validation(vec![FieldError::new(
                "status",
                "unknown document status",
            )]));
        }
    }

    let scope = access::loan_scope(&user);
    if scope == LoanScope::Nothing {
        return Ok(Json(Paginated::new(vec![], 0, page)));
    }

    let mut conn = state.db()?;

    let mut query = documents::table
        .inner_join(loans::table)
        .select((
            documents::all_columns,
            (loans::id, loans::loan_number, loans::borrower_name),
        ))
        .into_boxed();
    let mut count_query = documents::table
        .inner_join(loans::table)
        .select(count_star())
        .into_boxed();

    if let LoanScope::Officer(officer_id) = scope {
        query = query.filter(loans::loan_officer_id.eq(officer_id));
        count_query = count_query.filter(loans::loan_officer_id.eq(officer_id));
    }
    if let Some(loan_id) = params.loan_id {
        query = query.filter(documents::loan_id.eq(loan_id));
        count_query = count_query.filter(documents::loan_id.eq(loan_id));
    }
    if let Some(ref status) = params.status {
        query = query.filter(documents::status.eq(status.clone()));
        count_query = count_query.filter(documents::status.eq(status.clone()));
    }
    if let Some(ref doc_type) = params.doc_type {
        query = query.filter(documents::doc_type.eq(doc_type.clone()));
        count_query = count_query.filter(documents::doc_type.eq(doc_type.clone()));
    }

    let total: i64 = count_query.first(&mut conn)?;
    let rows: Vec<(Document, LoanRef)> = query
        .order(documents::created_at.desc())
        .offset(page.offset())
        .limit(page.limit)
        .load(&mut conn)?;

    let data = rows
        .into_iter()
        .map(|(document, loan)| to_document_response(document, loan))
        .collect();

    Ok(Json(Paginated::new(data, total, page)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub loan_id: Uuid,
    pub due_date: Option<String>,
}

/// Loads the loan behind a document operation, mapping out-of-scope to the
/// same 404 a missing loan produces.
fn load_scoped_loan(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    loan_id: Uuid,
) -> AppResult<Loan> {
    let scope = access::loan_scope(user);
    let loan: Option<Loan> = loans::table.find(loan_id).first(conn).optional()?;
    match loan {
        Some(loan) if scope.permits(loan.loan_officer_id) => Ok(loan),
        _ => Err(AppError::not_found()),
    }
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let mut errors = Vec::new();
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        errors.push(FieldError::new("name", "must not be empty"));
    }
    let doc_type = payload.doc_type.trim().to_string();
    if doc_type.is_empty() {
        errors.push(FieldError::new("type", "must not be empty"));
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
    let loan = load_scoped_loan(&mut conn, &user, payload.loan_id)?;

    let new_document = NewDocument {
        id: Uuid::new_v4(),
        loan_id: loan.id,
        name,
        doc_type,
        status: STATUS_REQUIRED.to_string(),
        due_date,
    };

    diesel::insert_into(documents::table)
        .values(&new_document)
        .execute(&mut conn)?;

    let document: Document = documents::table.find(new_document.id).first(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(to_document_response(
            document,
            (loan.id, loan.loan_number, loan.borrower_name),
        )),
    ))
}

fn file_extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

fn validate_upload(
    original_name: &str,
    declared_content_type: Option<&str>,
    size: usize,
    max_bytes: u64,
) -> AppResult<()> {
    if size == 0 {
        return Err(AppError::bad_request("file must not be empty"));
    }
    if size as u64 > max_bytes {
        return Err(AppError::bad_request(format!(
            "file exceeds the maximum upload size of {max_bytes} bytes"
        )));
    }

    let extension = file_extension(original_name)
        .ok_or_else(|| AppError::bad_request("file must have an extension"))?;
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AppError::bad_request(format!(
            "file type '.{extension}' is not allowed"
        )));
    }

    if let Some(declared) = declared_content_type {
        if !ALLOWED_MIME_TYPES.contains(&declared) {
            return Err(AppError::bad_request(format!(
                "content type '{declared}' is not allowed"
            )));
        }
    }

    Ok(())
}

pub async fn upload_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<DocumentResponse>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut declared_content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() == Some("file") {
            original_name = field.file_name().map(|name| name.to_string());
            declared_content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(format!("failed to read file bytes: {err}"))
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    let original_name =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;

    validate_upload(
        &original_name,
        declared_content_type.as_deref(),
        file_bytes.len(),
        state.config.max_upload_bytes,
    )?;

    let mut conn = state.db()?;
    let document: Document = documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    let loan = load_scoped_loan(&mut conn, &user, document.loan_id)?;

    let content_type = declared_content_type.unwrap_or_else(|| {
        mime_guess::from_path(&original_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    let file_key = format!("documents/{}/{}/{}", loan.id, document.id, original_name);

    state
        .storage
        .put_object(&file_key, file_bytes, Some(content_type.clone()))
        .await
        .map_err(|err| AppError::internal(format!("failed to store document file: {err}")))?;

    let now = Utc::now().naive_utc();
    diesel::update(documents::table.find(document_id))
        .set((
            documents::file_key.eq(Some(file_key)),
            documents::content_type.eq(Some(content_type)),
            documents::status.eq(STATUS_RECEIVED),
            documents::uploaded_at.eq(Some(now)),
            documents::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    info!(%document_id, loan_id = %loan.id, "document file uploaded");

    let updated: Document = documents::table.find(document_id).first(&mut conn)?;
    Ok(Json(to_document_response(
        updated,
        (loan.id, loan.loan_number, loan.borrower_name),
    )))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = documents)]
struct DocumentChangeset {
    name: Option<String>,
    doc_type: Option<String>,
    status: Option<String>,
    due_date: Option<NaiveDateTime>,
    updated_at: Option<NaiveDateTime>,
}

pub async fn update_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateDocumentRequest>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document: Document = documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    let loan = load_scoped_loan(&mut conn, &user, document.loan_id)?;

    let mut errors = Vec::new();
    let mut changeset = DocumentChangeset::default();

    if let Some(ref name) = payload.name {
        if name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        } else {
            changeset.name = Some(name.trim().to_string());
        }
    }
    if let Some(ref doc_type) = payload.doc_type {
        if doc_type.trim().is_empty() {
            errors.push(FieldError::new("type", "must not be empty"));
        } else {
            changeset.doc_type = Some(doc_type.trim().to_string());
        }
    }
    if let Some(ref status) = payload.status {
        if !DOCUMENT_STATUSES.contains(&status.as_str()) {
            errors.push(FieldError::new("status", "unknown document status"));
        } else {
            changeset.status = Some(status.clone());
        }
    }
    if let Some(ref due_date) = payload.due_date {
        match parse_iso_datetime(due_date) {
            Some(parsed) => changeset.due_date = Some(parsed),
            None => errors.push(FieldError::new("dueDate", "must be an ISO-8601 date")),
        }
    }
    if !errors.is_empty() {
        return Err(AppError::validation(errors));
    }

    changeset.updated_at = Some(Utc::now().naive_utc());
    diesel::update(documents::table.find(document_id))
        .set(&changeset)
        .execute(&mut conn)?;

    let updated: Document = documents::table.find(document_id).first(&mut conn)?;
    Ok(Json(to_document_response(
        updated,
        (loan.id, loan.loan_number, loan.borrower_name),
    )))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let document: Document = documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    load_scoped_loan(&mut conn, &user, document.loan_id)?;

    diesel::delete(documents::table.find(document_id)).execute(&mut conn)?;

    // Removing the stored object is best-effort; failure is logged, not
    // surfaced.
    if let Some(file_key) = document.file_key {
        if let Err(err) = state.storage.delete_object(&file_key).await {
            warn!(key = %file_key, error = %err, "failed to delete stored document object");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: Option<String>,
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDownloadResponse>> {
    let mut conn = state.db()?;
    let document: Document = documents::table
        .find(document_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    load_scoped_loan(&mut conn, &user, document.loan_id)?;

    let file_key = document
        .file_key
        .as_deref()
        .ok_or_else(AppError::not_found)?;

    let presigned_url = state
        .storage
        .presign_get_object(
            file_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    Ok(Json(DocumentDownloadResponse {
        url: presigned_url,
        expires_in: PRESIGNED_URL_EXPIRY_SECONDS,
        filename: document.name.clone(),
        content_type: document.content_type.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_disallowed_extensions_and_oversized_files() {
        assert!(validate_upload("w2.pdf", Some("application/pdf"), 512, 1024).is_ok());
        assert!(validate_upload("script.exe", None, 512, 1024).is_err());
        assert!(validate_upload("w2.pdf", None, 2048, 1024).is_err());
        assert!(validate_upload("w2.pdf", None, 0, 1024).is_err());
        assert!(validate_upload("noextension", None, 512, 1024).is_err());
    }

    #[test]
    fn rejects_mismatched_content_type() {
        assert!(validate_upload("w2.pdf", Some("text/html"), 512, 1024).is_err());
        assert!(validate_upload("photo.jpg", Some("image/jpeg"), 512, 1024).is_ok());
    }
}
