use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::error::PipelineError;
use crate::services::persistence::PersistenceError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Provide a file upload or a URL for preview.")]
    MissingPreviewInput,

    #[error("Unknown conversion '{0}'.")]
    UnknownConversion(String),

    #[error("Invalid form data: {0}")]
    InvalidForm(String),

    #[error("Request body exceeds the maximum allowed limit.")]
    BodyTooLarge,

    #[error("{0}")]
    Validation(String),

    #[error("Feedback persistence failed: {0}")]
    FeedbackPersist(PersistenceError),

    #[error("Could not log feedback: {0}")]
    FeedbackLog(std::io::Error),

    #[error("Session metric persistence failed: {0}")]
    MetricPersist(PersistenceError),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Pipeline(e) => e.code(),
            AppError::MissingPreviewInput => "missing_file",
            AppError::UnknownConversion(_) => "unknown_conversion",
            AppError::InvalidForm(_) => "invalid_multipart",
            AppError::BodyTooLarge => "file_too_large",
            AppError::Validation(_) => "validation_error",
            AppError::FeedbackPersist(PersistenceError::NotConfigured) => {
                "feedback_supabase_not_configured"
            }
            AppError::FeedbackPersist(_) => "feedback_persist_failed",
            AppError::FeedbackLog(_) => "feedback_log_failed",
            AppError::MetricPersist(PersistenceError::NotConfigured) => {
                "metric_supabase_not_configured"
            }
            AppError::MetricPersist(_) => "metric_persist_failed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Pipeline(e) => e.status(),
            AppError::MissingPreviewInput | AppError::InvalidForm(_) => StatusCode::BAD_REQUEST,
            AppError::UnknownConversion(_) => StatusCode::NOT_FOUND,
            AppError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FeedbackPersist(_) | AppError::FeedbackLog(_) | AppError::MetricPersist(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message. Internal causes stay in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::FeedbackPersist(PersistenceError::NotConfigured)
            | AppError::MetricPersist(PersistenceError::NotConfigured) => {
                "Supabase credentials are not configured.".to_string()
            }
            AppError::FeedbackPersist(_) => "Unable to persist feedback at this time.".to_string(),
            AppError::MetricPersist(_) => {
                "Unable to persist session metric at this time.".to_string()
            }
            AppError::FeedbackLog(_) => "Could not log feedback.".to_string(),
            AppError::Pipeline(PipelineError::Storage(_) | PipelineError::Internal(_)) => {
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code, "Request failed: {}", self);
        } else {
            tracing::debug!(code, status = status.as_u16(), "Request rejected: {}", self);
        }

        let body = Json(json!({
            "detail": {
                "code": code,
                "message": self.public_message(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_pipeline_error_body() {
        let (status, body) = render(AppError::from(PipelineError::TooManySources { max: 5 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"]["code"], "too_many_files");
    }

    #[tokio::test]
    async fn test_internal_cause_is_hidden() {
        let (status, body) =
            render(AppError::from(PipelineError::Internal("disk on fire".to_string()))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"]["code"], "internal_error");
        assert_eq!(body["detail"]["message"], "Internal Server Error");
    }

    #[tokio::test]
    async fn test_unconfigured_persistence_codes() {
        let (status, body) =
            render(AppError::MetricPersist(PersistenceError::NotConfigured)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"]["code"], "metric_supabase_not_configured");
    }
}
