use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Persistence store is not configured")]
    NotConfigured,

    #[error("Persistence request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Persistence store responded with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRecord {
    pub timestamp: String,
    pub message: String,
    pub email: Option<String>,
    pub page_path: Option<String>,
    pub user_agent: Option<String>,
    pub client_host: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetricRecord {
    pub session_id: String,
    pub event_name: String,
    pub page_path: Option<String>,
    pub user_agent: Option<String>,
    pub attributes: Value,
    pub occurred_at: String,
    pub client_host: String,
}

/// Remote store for feedback and session analytics. Built once at startup
/// and shared by every request; no retries.
#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<(), PersistenceError>;

    async fn insert_session_metric(
        &self,
        record: &SessionMetricRecord,
    ) -> Result<(), PersistenceError>;
}

/// Supabase (PostgREST) tables reached over HTTPS.
pub struct SupabaseSink {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    feedback_table: String,
    session_table: String,
}

impl SupabaseSink {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        feedback_table: impl Into<String>,
        session_table: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            feedback_table: feedback_table.into(),
            session_table: session_table.into(),
        }
    }

    async fn insert<T: Serialize + Sync>(&self, table: &str, record: &T) -> Result<(), PersistenceError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PersistenceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersistenceSink for SupabaseSink {
    async fn insert_feedback(&self, record: &FeedbackRecord) -> Result<(), PersistenceError> {
        self.insert(&self.feedback_table, record).await
    }

    async fn insert_session_metric(
        &self,
        record: &SessionMetricRecord,
    ) -> Result<(), PersistenceError> {
        self.insert(&self.session_table, record).await
    }
}

/// Used when no credentials are configured; every insert fails.
pub struct UnconfiguredSink;

#[async_trait::async_trait]
impl PersistenceSink for UnconfiguredSink {
    async fn insert_feedback(&self, _record: &FeedbackRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::NotConfigured)
    }

    async fn insert_session_metric(
        &self,
        _record: &SessionMetricRecord,
    ) -> Result<(), PersistenceError> {
        Err(PersistenceError::NotConfigured)
    }
}

pub fn sink_from_config(config: &AppConfig) -> Arc<dyn PersistenceSink> {
    match (&config.supabase_url, &config.supabase_service_role_key) {
        (Some(url), Some(key)) => {
            tracing::info!("Persistence: Supabase at {}", url);
            Arc::new(SupabaseSink::new(
                url.clone(),
                key.clone(),
                config.supabase_feedback_table.clone(),
                config.supabase_session_table.clone(),
            ))
        }
        _ => {
            tracing::warn!("Persistence: Supabase credentials not set, feedback and metrics disabled");
            Arc::new(UnconfiguredSink)
        }
    }
}

/// Append-only JSON-lines log of accepted feedback.
pub struct FeedbackLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &FeedbackRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}
