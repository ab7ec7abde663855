use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::{client_host, user_agent};
use crate::AppState;
use crate::api::error::AppError;
use crate::services::persistence::FeedbackRecord;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1, max = 5000, message = "Message must be 1 to 5000 characters"))]
    pub message: String,
    pub email: Option<String>,
    pub page_path: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackResponse {
    pub status: String,
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/feedback",
    request_body = FeedbackRequest,
    responses(
        (status = 200, description = "Feedback stored", body = FeedbackResponse),
        (status = 422, description = "Invalid feedback"),
        (status = 500, description = "Feedback could not be stored")
    ),
    tag = "feedback"
)]
pub async fn submit_feedback(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let record = FeedbackRecord {
        timestamp: Utc::now().to_rfc3339(),
        message: req.message,
        email: req.email,
        page_path: req.page_path,
        user_agent: user_agent(&headers),
        client_host: client_host(connect),
    };

    state
        .persistence
        .insert_feedback(&record)
        .await
        .map_err(AppError::FeedbackPersist)?;

    state
        .feedback_log
        .append(&record)
        .await
        .map_err(AppError::FeedbackLog)?;

    tracing::info!(client = %record.client_host, "Feedback received");

    Ok(Json(FeedbackResponse {
        status: "ok".to_string(),
        message: "Feedback received".to_string(),
    }))
}
