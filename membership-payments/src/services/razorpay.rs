//! Razorpay payment gateway client.
//!
//! Implements the subset of Razorpay's Orders, Payments and Refunds APIs the
//! service needs, plus checkout signature verification.

use crate::config::RazorpayConfig;
use crate::models::GatewayPaymentSnapshot;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use service_core::utils::signature::{hmac_sha256_hex, verify_hmac_sha256_hex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Razorpay credentials not configured")]
    NotConfigured,

    #[error("Razorpay request timed out")]
    Timeout,

    #[error("Razorpay error ({status}): {code} - {description}")]
    Api {
        status: u16,
        code: String,
        description: String,
    },

    #[error("Razorpay transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Unexpected Razorpay response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl GatewayError {
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err)
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout)
    }
}

/// Request to create a Razorpay order.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
    /// Amount in smallest currency unit (paise for INR).
    pub amount: u64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<serde_json::Value>,
}

/// Razorpay order entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayOrder {
    pub id: String,
    #[serde(default = "order_entity")]
    pub entity: String,
    pub amount: u64,
    #[serde(default)]
    pub amount_paid: u64,
    #[serde(default)]
    pub amount_due: u64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: String,
    #[serde(default)]
    pub attempts: u32,
    /// Razorpay sends `[]` for empty notes, so this stays untyped.
    pub notes: Option<serde_json::Value>,
    pub created_at: i64,
}

fn order_entity() -> String {
    "order".to_string()
}

/// Paginated order listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCollection {
    pub entity: String,
    pub count: u32,
    pub items: Vec<RazorpayOrder>,
}

/// Razorpay payment entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayPayment {
    pub id: String,
    #[serde(default = "payment_entity")]
    pub entity: String,
    pub amount: u64,
    pub currency: String,
    pub status: String,
    pub order_id: Option<String>,
    pub method: Option<String>,
    pub description: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub captured: Option<bool>,
    pub amount_refunded: Option<u64>,
    pub created_at: i64,
}

fn payment_entity() -> String {
    "payment".to_string()
}

impl RazorpayPayment {
    pub fn snapshot(&self) -> GatewayPaymentSnapshot {
        GatewayPaymentSnapshot {
            id: self.id.clone(),
            entity: self.entity.clone(),
            amount: self.amount,
            currency: self.currency.clone(),
            status: self.status.clone(),
            order_id: self.order_id.clone(),
            method: self.method.clone(),
            captured: self.captured,
            email: self.email.clone(),
            contact: self.contact.clone(),
            created_at: self.created_at,
        }
    }
}

/// Razorpay refund entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RazorpayRefund {
    pub id: String,
    #[serde(default = "refund_entity")]
    pub entity: String,
    pub amount: u64,
    pub currency: String,
    pub payment_id: String,
    pub status: String,
    pub speed_processed: Option<String>,
    pub created_at: i64,
}

fn refund_entity() -> String {
    "refund".to_string()
}

#[derive(Debug, Serialize)]
struct RefundRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<u64>,
    speed: &'static str,
}

/// Razorpay API error response.
#[derive(Debug, Deserialize)]
struct RazorpayErrorBody {
    error: RazorpayErrorDetail,
}

#[derive(Debug, Deserialize)]
struct RazorpayErrorDetail {
    code: String,
    description: String,
}

/// Operations the reconciliation service needs from a payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest)
        -> Result<RazorpayOrder, GatewayError>;

    async fn fetch_order(&self, order_id: &str) -> Result<RazorpayOrder, GatewayError>;

    async fn list_orders(&self, skip: u32, count: u32) -> Result<OrderCollection, GatewayError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment, GatewayError>;

    /// Refund a captured payment. `None` refunds the full remaining amount.
    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<u64>,
    ) -> Result<RazorpayRefund, GatewayError>;

    fn is_configured(&self) -> bool;
}

/// Razorpay client for interacting with the Razorpay API.
#[derive(Clone)]
pub struct RazorpayClient {
    client: Client,
    config: RazorpayConfig,
}

impl RazorpayClient {
    pub fn new(config: RazorpayConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client for Razorpay");
                Client::new()
            });

        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        if !self.is_configured() {
            return Err(GatewayError::NotConfigured);
        }

        let response = request
            .basic_auth(
                &self.config.key_id,
                Some(self.config.key_secret.expose_secret()),
            )
            .send()
            .await
            .map_err(GatewayError::from_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(GatewayError::from_transport)?;

        tracing::debug!(operation, status = %status, "Razorpay response");

        if status.is_success() {
            return Ok(serde_json::from_str(&body)?);
        }

        let (code, description) = match serde_json::from_str::<RazorpayErrorBody>(&body) {
            Ok(parsed) => (parsed.error.code, parsed.error.description),
            Err(_) => ("UNKNOWN".to_string(), body),
        };
        tracing::error!(
            operation,
            status = %status,
            code = %code,
            description = %description,
            "Razorpay request failed"
        );
        Err(GatewayError::Api {
            status: status.as_u16(),
            code,
            description,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayClient {
    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<RazorpayOrder, GatewayError> {
        let order: RazorpayOrder = self
            .execute("create_order", self.client.post(self.url("/orders")).json(request))
            .await?;

        tracing::info!(
            order_id = %order.id,
            amount = order.amount,
            currency = %order.currency,
            "Razorpay order created"
        );
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<RazorpayOrder, GatewayError> {
        let url = self.url(&format!("/orders/{}", urlencoding::encode(order_id)));
        self.execute("fetch_order", self.client.get(url)).await
    }

    async fn list_orders(&self, skip: u32, count: u32) -> Result<OrderCollection, GatewayError> {
        self.execute(
            "list_orders",
            self.client
                .get(self.url("/orders"))
                .query(&[("skip", skip), ("count", count)]),
        )
        .await
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment, GatewayError> {
        let url = self.url(&format!("/payments/{}", urlencoding::encode(payment_id)));
        self.execute("fetch_payment", self.client.get(url)).await
    }

    async fn refund_payment(
        &self,
        payment_id: &str,
        amount: Option<u64>,
    ) -> Result<RazorpayRefund, GatewayError> {
        let body = RefundRequest {
            amount,
            speed: "normal",
        };
        let url = self.url(&format!("/payments/{}/refund", urlencoding::encode(payment_id)));
        let refund: RazorpayRefund = self
            .execute("refund_payment", self.client.post(url).json(&body))
            .await?;

        tracing::info!(
            refund_id = %refund.id,
            payment_id = %payment_id,
            amount = refund.amount,
            "Razorpay refund created"
        );
        Ok(refund)
    }

    fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }
}

fn checkout_message(order_id: &str, payment_id: &str) -> String {
    format!("{}|{}", order_id, payment_id)
}

/// Signature Razorpay checkout returns for a successful payment:
/// `hex(HMAC-SHA256(order_id + "|" + payment_id, key_secret))`.
pub fn payment_signature(
    order_id: &str,
    payment_id: &str,
    secret: &str,
) -> Result<String, anyhow::Error> {
    hmac_sha256_hex(
        secret.as_bytes(),
        checkout_message(order_id, payment_id).as_bytes(),
    )
}

/// Verify a checkout signature in constant time.
///
/// Returns `false` for an empty secret and on any internal error.
pub fn verify_payment_signature(
    order_id: &str,
    payment_id: &str,
    signature: &str,
    secret: &str,
) -> bool {
    if secret.is_empty() {
        tracing::error!("Cannot verify payment signature: key secret is not configured");
        return false;
    }

    verify_hmac_sha256_hex(
        secret.as_bytes(),
        checkout_message(order_id, payment_id).as_bytes(),
        signature,
    )
}
