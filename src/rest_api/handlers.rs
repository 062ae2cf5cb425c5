//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse, Json};
use tracing::{error, instrument};

use crate::controller::{metrics, ControllerState};

use super::dto::{ErrorResponse, HealthResponse};

/// Health check endpoint
///
/// Reports "starting" until the first pass has completed.
#[instrument(skip(state))]
pub async fn health(State(state): State<Arc<ControllerState>>) -> Json<HealthResponse> {
    let last_pass = state.last_pass().await;
    let status = if last_pass.is_some() {
        "healthy"
    } else {
        "starting"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        last_pass,
        last_error: state.last_error().await,
    })
}

/// Metrics endpoint in the Prometheus text format
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("encode_failed", &e.to_string())),
            )
                .into_response()
        }
    }
}
