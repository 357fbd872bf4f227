//! Razorpay webhook signature policy and event decoding.

use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::error::AppError;
use service_core::utils::signature::verify_hmac_sha256_hex;
use thiserror::Error;

/// Header Razorpay signs webhook bodies into.
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PaymentAuthorized { payment_id: String },
    PaymentCaptured { payment_id: String },
    PaymentFailed { payment_id: String },
    OrderPaid { order_id: String },
    Unknown(String),
}

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("Malformed webhook body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Webhook event {event} has no {entity} entity")]
    MissingEntity {
        event: &'static str,
        entity: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    payment: Option<EntityWrapper>,
    order: Option<EntityWrapper>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper {
    entity: EntityRef,
}

#[derive(Debug, Deserialize)]
struct EntityRef {
    id: String,
}

impl WebhookEvent {
    pub fn parse(body: &[u8]) -> Result<Self, WebhookParseError> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        let payment_id = |event: &'static str| {
            envelope
                .payload
                .payment
                .as_ref()
                .map(|p| p.entity.id.clone())
                .ok_or(WebhookParseError::MissingEntity {
                    event,
                    entity: "payment",
                })
        };

        let event = match envelope.event.as_str() {
            "payment.authorized" => WebhookEvent::PaymentAuthorized {
                payment_id: payment_id("payment.authorized")?,
            },
            "payment.captured" => WebhookEvent::PaymentCaptured {
                payment_id: payment_id("payment.captured")?,
            },
            "payment.failed" => WebhookEvent::PaymentFailed {
                payment_id: payment_id("payment.failed")?,
            },
            "order.paid" => WebhookEvent::OrderPaid {
                order_id: envelope
                    .payload
                    .order
                    .as_ref()
                    .map(|o| o.entity.id.clone())
                    .ok_or(WebhookParseError::MissingEntity {
                        event: "order.paid",
                        entity: "order",
                    })?,
            },
            other => WebhookEvent::Unknown(other.to_string()),
        };
        Ok(event)
    }

    /// Metric label; unknown events share one label.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::PaymentAuthorized { .. } => "payment.authorized",
            WebhookEvent::PaymentCaptured { .. } => "payment.captured",
            WebhookEvent::PaymentFailed { .. } => "payment.failed",
            WebhookEvent::OrderPaid { .. } => "order.paid",
            WebhookEvent::Unknown(_) => "unknown",
        }
    }

    /// Log the event. No state changes are driven from webhooks.
    pub fn log(&self) {
        match self {
            WebhookEvent::PaymentAuthorized { payment_id } => {
                tracing::info!(payment_id = %payment_id, "Payment authorized")
            }
            WebhookEvent::PaymentCaptured { payment_id } => {
                tracing::info!(payment_id = %payment_id, "Payment captured")
            }
            WebhookEvent::PaymentFailed { payment_id } => {
                tracing::warn!(payment_id = %payment_id, "Payment failed")
            }
            WebhookEvent::OrderPaid { order_id } => {
                tracing::info!(order_id = %order_id, "Order paid")
            }
            WebhookEvent::Unknown(event) => {
                tracing::info!(event_type = %event, "Unhandled webhook event")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    /// No secret configured and signatures are not required.
    Skipped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookRejection {
    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Webhook signature secret not configured")]
    SecretNotConfigured,
}

impl From<WebhookRejection> for AppError {
    fn from(rejection: WebhookRejection) -> Self {
        match rejection {
            WebhookRejection::MissingSignature | WebhookRejection::InvalidSignature => {
                AppError::BadRequest(anyhow::anyhow!("Invalid webhook signature"))
            }
            WebhookRejection::SecretNotConfigured => {
                AppError::ServiceUnavailable(rejection.to_string())
            }
        }
    }
}

#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Option<Secret<String>>,
    require_signature: bool,
}

impl WebhookVerifier {
    pub fn new(secret: Option<Secret<String>>, require_signature: bool) -> Self {
        Self {
            secret,
            require_signature,
        }
    }

    /// Check `signature` against `HMAC-SHA256(body, webhook_secret)`.
    pub fn check(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<SignatureCheck, WebhookRejection> {
        let Some(secret) = &self.secret else {
            if self.require_signature {
                tracing::error!("Webhook received but no webhook secret is configured");
                return Err(WebhookRejection::SecretNotConfigured);
            }
            tracing::warn!("Webhook signature check skipped: no webhook secret configured");
            return Ok(SignatureCheck::Skipped);
        };

        let signature = signature.ok_or_else(|| {
            tracing::warn!("Missing X-Razorpay-Signature header");
            WebhookRejection::MissingSignature
        })?;

        if verify_hmac_sha256_hex(secret.expose_secret().as_bytes(), body, signature) {
            Ok(SignatureCheck::Verified)
        } else {
            tracing::warn!("Invalid webhook signature");
            Err(WebhookRejection::InvalidSignature)
        }
    }
}
