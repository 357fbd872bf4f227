//! HTTP handlers for membership-payments.

pub mod payments;
pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::{services::get_metrics, AppState};

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "OK",
            "message": "Server is running",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}

/// Readiness probe. Fails only when a configured store stops answering;
/// running without persistence is still ready.
pub async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let persistence = state.payments.persistence().await;
    let persistence = match persistence.store() {
        Some(store) => {
            store.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "Document store health check failed");
                AppError::ServiceUnavailable("Document store unavailable".to_string())
            })?;
            "enabled"
        }
        None => "disabled",
    };

    Ok(Json(json!({
        "status": "ready",
        "persistence": persistence,
        "gatewayConfigured": state.payments.gateway_configured(),
    })))
}

pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        get_metrics(),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "message": "Route not found" })),
    )
}
