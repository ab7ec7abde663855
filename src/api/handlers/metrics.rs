use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::HeaderMap,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use utoipa::ToSchema;
use validator::Validate;

use super::{client_host, user_agent};
use crate::AppState;
use crate::api::error::AppError;
use crate::services::persistence::SessionMetricRecord;

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SessionMetricRequest {
    #[validate(length(min = 5, max = 128))]
    pub session_id: String,
    #[validate(length(min = 1, max = 128))]
    pub event_name: String,
    pub page_path: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub attributes: Option<Value>,
    /// RFC 3339 timestamp; defaults to the time of receipt
    pub occurred_at: Option<String>,
}

#[utoipa::path(
    post,
    path = "/metrics/session",
    request_body = SessionMetricRequest,
    responses(
        (status = 200, description = "Metric stored"),
        (status = 422, description = "Invalid metric"),
        (status = 500, description = "Metric could not be stored")
    ),
    tag = "metrics"
)]
pub async fn record_session_metric(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<SessionMetricRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let record = SessionMetricRecord {
        session_id: req.session_id,
        event_name: req.event_name,
        page_path: req.page_path,
        user_agent: req.user_agent.or_else(|| user_agent(&headers)),
        attributes: req.attributes.unwrap_or_else(|| json!({})),
        occurred_at: req
            .occurred_at
            .unwrap_or_else(|| Utc::now().to_rfc3339()),
        client_host: client_host(connect),
    };

    state
        .persistence
        .insert_session_metric(&record)
        .await
        .map_err(AppError::MetricPersist)?;

    tracing::debug!(event = %record.event_name, "Session metric recorded");
    Ok(Json(json!({ "status": "ok" })))
}
