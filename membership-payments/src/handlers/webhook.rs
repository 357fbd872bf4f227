use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use service_core::error::AppError;

use crate::{
    services::{
        metrics,
        webhook::{WebhookEvent, SIGNATURE_HEADER},
    },
    AppState,
};

/// Razorpay webhook receiver.
///
/// The signature covers the raw body bytes, so the body is read unparsed.
/// Any event that passes the signature policy is acknowledged with 200.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    state.webhook.check(&body, signature)?;

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Webhook handler error");
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": "Webhook processing failed" })),
            )
                .into_response());
        }
    };

    metrics::record_webhook_event(event.kind());
    event.log();

    Ok((StatusCode::OK, Json(json!({ "success": true }))).into_response())
}
