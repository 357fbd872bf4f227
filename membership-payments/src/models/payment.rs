use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApplicantProfile;

/// Subset of the gateway's payment entity kept alongside our own record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GatewayPaymentSnapshot {
    pub id: String,
    pub entity: String,
    pub amount: u64,
    pub currency: String,
    pub status: String,
    pub order_id: Option<String>,
    pub method: Option<String>,
    pub captured: Option<bool>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub created_at: i64,
}

/// `payments` document. Exists iff its order reached `paid`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    #[serde(rename = "_id")]
    pub payment_id: String,
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub amount: u64,
    pub currency: String,
    pub status: String,
    pub method: Option<String>,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
    pub form_data: Option<ApplicantProfile>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub gateway_response: GatewayPaymentSnapshot,
}

/// Outcome of the transactional payment + order write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentWrite {
    Inserted,
    /// A payment with this id was already stored; nothing was changed.
    AlreadyRecorded,
}

/// Append-only audit of a failed verification attempt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailureRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub transaction_id: Option<String>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// `refunds` document, keyed by the Razorpay refund id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefundRecord {
    #[serde(rename = "_id")]
    pub refund_id: String,
    pub payment_id: String,
    pub amount: u64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
