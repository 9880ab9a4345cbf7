//! Typed client for the external contact-management service.
//!
//! The service is consumed only by the lead-import and sync flows; routes
//! talk to the [`ContactDirectory`] trait so tests can substitute an
//! in-memory directory. Credentials come from configuration; every call has
//! a bounded timeout and passes through a semaphore so bulk flows cannot fan
//! out unbounded concurrent requests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        format!("{first} {last}").trim().to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPayload {
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub address: String,
    pub tags: Vec<String>,
    pub custom_fields: Value,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("contact service timed out")]
    Timeout,
    #[error("contact service error: {0}")]
    Upstream(String),
}

impl From<DirectoryError> for AppError {
    fn from(value: DirectoryError) -> Self {
        match value {
            DirectoryError::Timeout => AppError::gateway_timeout("contact service timed out"),
            DirectoryError::Upstream(message) => AppError::bad_gateway(message),
        }
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            DirectoryError::Timeout
        } else {
            DirectoryError::Upstream(value.to_string())
        }
    }
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

#[async_trait]
pub trait ContactDirectory: Send + Sync + 'static {
    async fn get_contact(&self, id: &str) -> DirectoryResult<Option<Contact>>;

    async fn list_contacts(&self, limit: u32, offset: u32) -> DirectoryResult<Vec<Contact>>;

    async fn search_contacts(&self, query: &str) -> DirectoryResult<Vec<Contact>>;

    async fn create_contact(&self, payload: &ContactPayload) -> DirectoryResult<Contact>;

    async fn update_contact(&self, id: &str, payload: &ContactPayload)
        -> DirectoryResult<Contact>;
}

/// Maps directory tags onto a loan type; untagged contacts default to
/// conventional financing.
pub fn loan_type_for_tags(tags: &[String]) -> &'static str {
    if tags.iter().any(|tag| tag == "FHA") {
        "FHA"
    } else if tags.iter().any(|tag| tag == "VA") {
        "VA"
    } else if tags.iter().any(|tag| tag == "USDA") {
        "USDA"
    } else if tags.iter().any(|tag| tag == "Jumbo") {
        "JUMBO"
    } else {
        "CONVENTIONAL"
    }
}

pub struct LeadConnectorClient {
    http: Client,
    base_url: String,
    api_key: String,
    permits: Arc<Semaphore>,
}

impl LeadConnectorClient {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.leadconnector_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.leadconnector_api_url.trim_end_matches('/').to_string(),
            api_key: config.leadconnector_api_key.clone(),
            permits: Arc::new(Semaphore::new(config.leadconnector_max_concurrency.max(1))),
        })
    }

    async fn acquire(&self) -> DirectoryResult<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| DirectoryError::Upstream("contact client shut down".to_string()))
    }

    fn check_status(status: StatusCode, body: &str) -> DirectoryResult<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(DirectoryError::Upstream(format!(
                "contact service responded with {status}: {body}"
            )))
        }
    }
}

#[derive(Deserialize)]
struct ContactListEnvelope {
    #[serde(default)]
    contacts: Vec<Contact>,
}

#[derive(Deserialize)]
struct ContactEnvelope {
    contact: Contact,
}

#[async_trait]
impl ContactDirectory for LeadConnectorClient {
    async fn get_contact(&self, id: &str) -> DirectoryResult<Option<Contact>> {
        let _permit = self.acquire().await?;
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        let body = response.text().await?;
        Self::check_status(status, &body)?;

        let parsed: ContactEnvelope = serde_json::from_str(&body)
            .map_err(|err| DirectoryError::Upstream(format!("invalid contact payload: {err}")))?;
        Ok(Some(parsed.contact))
    }

    async fn list_contacts(&self, limit: u32, offset: u32) -> DirectoryResult<Vec<Contact>> {
        let _permit = self.acquire().await?;
        let response = self
            .http
            .get(&self.base_url)
            .bearer_auth(&self.api_key)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::check_status(status, &body)?;

        let parsed: ContactListEnvelope = serde_json::from_str(&body)
            .map_err(|err| DirectoryError::Upstream(format!("invalid contact list: {err}")))?;
        Ok(parsed.contacts)
    }

    async fn search_contacts(&self, query: &str) -> DirectoryResult<Vec<Contact>> {
        let _permit = self.acquire().await?;
        let response = self
            .http
            .get(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("query", query), ("limit", "50")])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::check_status(status, &body)?;

        let parsed: ContactListEnvelope = serde_json::from_str(&body)
            .map_err(|err| DirectoryError::Upstream(format!("invalid search result: {err}")))?;
        Ok(parsed.contacts)
    }

    async fn create_contact(&self, payload: &ContactPayload) -> DirectoryResult<Contact> {
        let _permit = self.acquire().await?;
        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::check_status(status, &body)?;

        let parsed: ContactEnvelope = serde_json::from_str(&body)
            .map_err(|err| DirectoryError::Upstream(format!("invalid contact payload: {err}")))?;
        Ok(parsed.contact)
    }

    async fn update_contact(
        &self,
        id: &str,
        payload: &ContactPayload,
    ) -> DirectoryResult<Contact> {
        let _permit = self.acquire().await?;
        let response = self
            .http
            .put(format!("{}/{}", self.base_url, id))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Self::check_status(status, &body)?;

        let parsed: ContactEnvelope = serde_json::from_str(&body)
            .map_err(|err| DirectoryError::Upstream(format!("invalid contact payload: {err}")))?;
        Ok(parsed.contact)
    }
}
