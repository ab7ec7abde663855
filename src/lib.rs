pub mod api;
pub mod config;
pub mod services;
pub mod utils;

use crate::config::AppConfig;
use crate::services::acquirer::SourceAcquirer;
use crate::services::assembler::ResultAssembler;
use crate::services::conversion::{ConversionRegistry, OutputSettings};
use crate::services::error::PipelineError;
use crate::services::persistence::{FeedbackLog, PersistenceSink, sink_from_config};
use crate::services::preview::PreviewEngine;
use axum::{
    Json, Router,
    http::{HeaderValue, Request, Response},
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::convert::convert,
        api::handlers::preview::preview,
        api::handlers::health::health_check,
        api::handlers::feedback::submit_feedback,
        api::handlers::metrics::record_session_metric,
    ),
    components(
        schemas(
            services::conversion::ConversionPair,
            services::preview::PreviewResult,
            services::preview::SchemaField,
            api::handlers::health::HealthResponse,
            api::handlers::feedback::FeedbackRequest,
            api::handlers::feedback::FeedbackResponse,
            api::handlers::metrics::SessionMetricRequest,
        )
    ),
    tags(
        (name = "convert", description = "Format conversion"),
        (name = "preview", description = "Schema and sample rows"),
        (name = "feedback", description = "User feedback"),
        (name = "metrics", description = "Session analytics"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub acquirer: Arc<SourceAcquirer>,
    pub registry: Arc<ConversionRegistry>,
    pub assembler: Arc<ResultAssembler>,
    pub preview: Arc<PreviewEngine>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub feedback_log: Arc<FeedbackLog>,
}

impl AppState {
    /// Build every shared service from `config`. Persistence falls back to an
    /// unconfigured sink when credentials are missing.
    pub fn from_config(config: AppConfig) -> Result<Self, PipelineError> {
        let settings = OutputSettings::from_config(&config);
        let acquirer = SourceAcquirer::new(&config)?;

        Ok(Self {
            acquirer: Arc::new(acquirer),
            registry: Arc::new(ConversionRegistry::new(settings.clone())),
            assembler: Arc::new(ResultAssembler::new(config.transfer_chunk_bytes)),
            preview: Arc::new(PreviewEngine::new(settings)),
            persistence: sink_from_config(&config),
            feedback_log: Arc::new(FeedbackLog::new(config.feedback_log_path.clone())),
            config: Arc::new(config),
        })
    }

    pub fn with_registry(mut self, registry: ConversionRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = sink;
        self
    }
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/convert/:pair", post(api::handlers::convert::convert))
        .route("/preview", post(api::handlers::preview::preview))
        .route("/health", get(api::handlers::health::health_check))
        .route("/feedback", post(api::handlers::feedback::submit_feedback))
        .route(
            "/metrics/session",
            post(api::handlers::metrics::record_session_metric),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(routes())
        .nest("/v1", routes())
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.request_body_limit(),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let request_id = request
                        .headers()
                        .get(api::middleware::request_id::REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &Request<_>, _span: &Span| {
                    tracing::info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::info!(
                        "📤 Finished in {:?} with status {}",
                        latency,
                        response.status()
                    );
                }),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
