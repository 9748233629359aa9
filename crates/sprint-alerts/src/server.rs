//! HTTP boundary for provider webhooks.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::engine::DetectionEngine;
use crate::error::IntakeError;
use crate::intake::WebhookHeaders;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Detection engine.
    pub engine: Arc<DetectionEngine>,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{organization_id}", post(webhook_handler))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Webhook intake failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn webhook_handler(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IntakeError> {
    let headers = WebhookHeaders::from_header_map(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    });
    let receipt = state
        .engine
        .ingest_webhook(&organization_id, &headers, &body)
        .await?;
    Ok((StatusCode::OK, Json(receipt)).into_response())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}
