use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle of a stored order. Only `Created -> Paid` is ever written.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Paid,
    Failed,
}

/// Applicant profile captured at checkout.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ApplicantProfile {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub branch: String,
    pub year: String,
    pub usn: String,
}

/// `payment_orders` document, keyed by the Razorpay order id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    #[serde(rename = "_id")]
    pub order_id: String,
    pub amount: u64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: OrderStatus,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
    pub user_id: Option<String>,
    pub plan_id: Option<String>,
    pub form_data: Option<ApplicantProfile>,
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
