//! Order/payment reconciliation between Razorpay and the document store.
//!
//! An order moves `created -> paid` exactly once, when a signed checkout
//! callback is confirmed against the gateway. Side effects that must not
//! block the payment (membership grant, failure audit, refund bookkeeping)
//! are reported as [`Warning`]s instead of errors.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use service_core::error::AppError;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::dtos::{CreateOrderRequest, VerifyPaymentRequest};
use crate::models::{
    ApplicantProfile, MembershipGrant, MembershipWrite, OrderRecord, OrderStatus,
    PaymentFailureRecord, PaymentRecord, PaymentWrite, RefundRecord,
};
use crate::services::metrics;
use crate::services::razorpay::{
    self, GatewayError, OrderCollection, PaymentGateway, RazorpayOrder, RazorpayPayment,
    RazorpayRefund,
};
use crate::services::bootstrap::ClientRegistry;
use crate::services::store::{Persistence, StoreError};

pub const DEFAULT_CURRENCY: &str = "INR";
pub const RECEIPT_PREFIX: &str = "CSI_";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Failed to create payment order")]
    OrderCreation(#[source] GatewayError),

    #[error("Invalid payment signature")]
    SignatureInvalid,

    #[error("Failed to fetch {what}")]
    GatewayFetch {
        what: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("Order not found")]
    OrderNotFound(String),

    #[error("Failed to process refund")]
    Refund(#[source] GatewayError),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("Payment store error")]
    Store(#[source] StoreError),
}

impl PaymentError {
    fn from_gateway(
        operation: &'static str,
        err: GatewayError,
        wrap: impl FnOnce(GatewayError) -> PaymentError,
    ) -> Self {
        if err.is_timeout() {
            PaymentError::Timeout { operation }
        } else {
            wrap(err)
        }
    }

    fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Timeout(_) => PaymentError::Timeout { operation },
            other => PaymentError::Store(other),
        }
    }

    fn gateway_source(&self) -> Option<&GatewayError> {
        match self {
            PaymentError::OrderCreation(source)
            | PaymentError::Refund(source)
            | PaymentError::GatewayFetch { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Metric label for a failed verification.
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentError::OrderCreation(_) => "order_creation",
            PaymentError::SignatureInvalid => "signature_invalid",
            PaymentError::GatewayFetch { .. } => "gateway_fetch",
            PaymentError::OrderNotFound(_) => "order_not_found",
            PaymentError::Refund(_) => "refund",
            PaymentError::Timeout { .. } => "timeout",
            PaymentError::Store(_) => "store",
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        if matches!(err.gateway_source(), Some(GatewayError::NotConfigured)) {
            return AppError::ServiceUnavailable("Payment gateway is not configured".to_string());
        }

        let message = err.to_string();
        match err {
            PaymentError::SignatureInvalid => AppError::BadRequest(anyhow::anyhow!(message)),
            PaymentError::OrderNotFound(_) | PaymentError::GatewayFetch { .. } => {
                AppError::NotFound(anyhow::anyhow!(message))
            }
            PaymentError::OrderCreation(_) | PaymentError::Refund(_) => {
                AppError::BadGateway(message)
            }
            PaymentError::Timeout { .. } => AppError::GatewayTimeout(message),
            PaymentError::Store(source) => AppError::DatabaseError(anyhow::Error::new(source)),
        }
    }
}

/// Best-effort side effect that did not happen as intended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    MembershipGrantFailed { user_id: String, error: String },
    FailureAuditFailed { payment_id: String, error: String },
    PaymentAlreadyRecorded { payment_id: String },
    RefundNotRecorded { refund_id: String, error: String },
}

/// A result plus the warnings collected while producing it.
#[derive(Debug)]
pub struct Reconciled<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Reconciled<T> {
    fn new(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    pub fn log_warnings(&self) {
        for warning in &self.warnings {
            tracing::warn!(warning = ?warning, "Reconciliation side effect incomplete");
        }
    }
}

/// Order request as the service sees it.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: String,
    pub plan_id: String,
    /// Amount in paise.
    pub amount: u64,
    pub transaction_id: String,
    pub profile: ApplicantProfile,
}

impl From<CreateOrderRequest> for NewOrder {
    fn from(req: CreateOrderRequest) -> Self {
        Self {
            user_id: req.user_id,
            plan_id: req.plan_id,
            amount: req.amount,
            transaction_id: req.transaction_id,
            profile: req.form_data.into(),
        }
    }
}

impl NewOrder {
    fn notes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("userId".to_string(), self.user_id.clone()),
            ("planId".to_string(), self.plan_id.clone()),
            ("transactionId".to_string(), self.transaction_id.clone()),
            ("name".to_string(), self.profile.name.clone()),
            ("email".to_string(), self.profile.email.clone()),
            ("usn".to_string(), self.profile.usn.clone()),
        ])
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedOrder {
    pub order_id: String,
    pub amount: u64,
    pub currency: String,
    pub transaction_id: String,
}

/// Signed checkout callback.
#[derive(Debug, Clone)]
pub struct PaymentCallback {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub transaction_id: Option<String>,
}

impl From<VerifyPaymentRequest> for PaymentCallback {
    fn from(req: VerifyPaymentRequest) -> Self {
        Self {
            order_id: req.razorpay_order_id,
            payment_id: req.razorpay_payment_id,
            signature: req.razorpay_signature,
            transaction_id: Some(req.transaction_id).filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub verified: bool,
    pub payment_id: String,
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub status: String,
    pub amount: u64,
    pub currency: String,
}

#[derive(Clone)]
enum StoreSource {
    Fixed(Persistence),
    Registry(Arc<ClientRegistry>),
}

/// Orchestrates gateway calls and store writes for the payment lifecycle.
#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    store: StoreSource,
    key_secret: Secret<String>,
}

impl PaymentService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        persistence: Persistence,
        key_secret: Secret<String>,
    ) -> Self {
        Self {
            gateway,
            store: StoreSource::Fixed(persistence),
            key_secret,
        }
    }

    /// Take the gateway and document store from `registry`. The store is
    /// resolved per operation, so a store that failed to initialise is
    /// retried instead of staying disabled.
    pub fn from_registry(registry: Arc<ClientRegistry>, key_secret: Secret<String>) -> Self {
        Self {
            gateway: registry.gateway(),
            store: StoreSource::Registry(registry),
            key_secret,
        }
    }

    pub async fn persistence(&self) -> Persistence {
        match &self.store {
            StoreSource::Fixed(persistence) => persistence.clone(),
            StoreSource::Registry(registry) => registry.document_store().await,
        }
    }

    pub fn gateway_configured(&self) -> bool {
        self.gateway.is_configured()
    }

    /// Create the gateway order, then record it locally. Nothing is stored
    /// unless the gateway call succeeded.
    pub async fn create_order(&self, order: NewOrder) -> Result<CreatedOrder, PaymentError> {
        let notes = order.notes();
        let request = razorpay::CreateOrderRequest {
            amount: order.amount,
            currency: DEFAULT_CURRENCY.to_string(),
            receipt: Some(format!("{}{}", RECEIPT_PREFIX, order.transaction_id)),
            notes: Some(serde_json::Value::Object(
                notes
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect(),
            )),
        };

        let gateway_order = self.gateway.create_order(&request).await.map_err(|e| {
            tracing::error!(error = %e, transaction_id = %order.transaction_id, "Create order error");
            PaymentError::from_gateway("create_order", e, PaymentError::OrderCreation)
        })?;

        let persistence = self.persistence().await;
        if let Some(store) = persistence.store() {
            let now = Utc::now();
            let record = OrderRecord {
                order_id: gateway_order.id.clone(),
                amount: gateway_order.amount,
                currency: gateway_order.currency.clone(),
                receipt: gateway_order.receipt.clone(),
                status: OrderStatus::Created,
                notes,
                user_id: Some(order.user_id.clone()),
                plan_id: Some(order.plan_id.clone()),
                form_data: Some(order.profile.clone()),
                transaction_id: Some(order.transaction_id.clone()),
                payment_id: None,
                created_at: now,
                updated_at: now,
            };
            store
                .insert_order(&record)
                .await
                .map_err(|e| PaymentError::from_store("insert_order", e))?;
        }

        metrics::record_order_created();
        tracing::info!(
            order_id = %gateway_order.id,
            amount = gateway_order.amount,
            user_id = %order.user_id,
            plan_id = %order.plan_id,
            "Payment order created"
        );

        Ok(CreatedOrder {
            order_id: gateway_order.id,
            amount: gateway_order.amount,
            currency: gateway_order.currency,
            transaction_id: order.transaction_id,
        })
    }

    pub fn verify_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        razorpay::verify_payment_signature(
            order_id,
            payment_id,
            signature,
            self.key_secret.expose_secret(),
        )
    }

    /// Confirm a checkout callback and record the payment.
    ///
    /// Steps run in order: signature, gateway fetch, order load, the
    /// payment + order write, then the membership grant. A failure in the
    /// first four is audited (best effort) and returned as the error.
    pub async fn verify_and_save(
        &self,
        callback: PaymentCallback,
    ) -> Reconciled<Result<VerifiedPayment, PaymentError>> {
        let mut warnings = Vec::new();
        let result = self.confirm_payment(&callback, &mut warnings).await;

        match &result {
            Ok(_) => {}
            Err(error) => {
                metrics::record_verification(error.kind());
                tracing::error!(
                    error = %error,
                    order_id = %callback.order_id,
                    payment_id = %callback.payment_id,
                    "Payment verification error"
                );
                self.audit_failure(&callback, error, &mut warnings).await;
            }
        }

        Reconciled::new(result, warnings)
    }

    async fn confirm_payment(
        &self,
        callback: &PaymentCallback,
        warnings: &mut Vec<Warning>,
    ) -> Result<VerifiedPayment, PaymentError> {
        if !self.verify_signature(&callback.order_id, &callback.payment_id, &callback.signature) {
            return Err(PaymentError::SignatureInvalid);
        }

        let payment = self.fetch_payment(&callback.payment_id).await?;

        let persistence = self.persistence().await;
        if let Some(store) = persistence.store() {
            let order = store
                .find_order(&callback.order_id)
                .await
                .map_err(|e| PaymentError::from_store("find_order", e))?
                .ok_or_else(|| PaymentError::OrderNotFound(callback.order_id.clone()))?;

            let record = payment_record(callback, &payment, &order, Utc::now());
            let write = store
                .record_verified_payment(&record)
                .await
                .map_err(|e| PaymentError::from_store("record_verified_payment", e))?;

            match write {
                PaymentWrite::Inserted => {
                    if let Some(user_id) = order.user_id.as_deref() {
                        let plan_id = order.plan_id.as_deref().unwrap_or_default();
                        if let Err(e) = self
                            .grant_membership(user_id, plan_id, &callback.payment_id)
                            .await
                        {
                            warnings.push(Warning::MembershipGrantFailed {
                                user_id: user_id.to_string(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
                PaymentWrite::AlreadyRecorded => {
                    warnings.push(Warning::PaymentAlreadyRecorded {
                        payment_id: callback.payment_id.clone(),
                    });
                }
            }

            metrics::record_verification(match write {
                PaymentWrite::Inserted => "verified",
                PaymentWrite::AlreadyRecorded => "duplicate",
            });
        } else {
            metrics::record_verification("verified");
        }

        tracing::info!(
            order_id = %callback.order_id,
            payment_id = %callback.payment_id,
            status = %payment.status,
            "Payment verified"
        );

        Ok(VerifiedPayment {
            verified: true,
            payment_id: callback.payment_id.clone(),
            order_id: callback.order_id.clone(),
            transaction_id: callback.transaction_id.clone(),
            status: payment.status,
            amount: payment.amount,
            currency: payment.currency,
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<RazorpayPayment, PaymentError> {
        self.gateway.fetch_payment(payment_id).await.map_err(|e| {
            PaymentError::from_gateway("fetch_payment", e, |source| PaymentError::GatewayFetch {
                what: "payment details",
                source,
            })
        })
    }

    async fn audit_failure(
        &self,
        callback: &PaymentCallback,
        error: &PaymentError,
        warnings: &mut Vec<Warning>,
    ) {
        let persistence = self.persistence().await;
        let Some(store) = persistence.store() else {
            return;
        };
        if callback.payment_id.is_empty() {
            return;
        }

        let record = PaymentFailureRecord {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: callback.order_id.clone(),
            payment_id: callback.payment_id.clone(),
            signature: callback.signature.clone(),
            transaction_id: callback.transaction_id.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        };

        if let Err(e) = store.record_failure(&record).await {
            warnings.push(Warning::FailureAuditFailed {
                payment_id: callback.payment_id.clone(),
                error: e.to_string(),
            });
        }
    }

    /// Upsert the user's membership for `plan_id`, expiring
    /// `duration(plan_id)` days from now. `None` when persistence is off.
    pub async fn grant_membership(
        &self,
        user_id: &str,
        plan_id: &str,
        payment_id: &str,
    ) -> Result<Option<MembershipWrite>, PaymentError> {
        let persistence = self.persistence().await;
        let Some(store) = persistence.store() else {
            return Ok(None);
        };

        let grant = MembershipGrant::new(plan_id, payment_id, Utc::now());
        match store.upsert_membership(user_id, &grant).await {
            Ok(write) => {
                metrics::record_membership_grant("granted");
                tracing::info!(
                    user_id = %user_id,
                    plan_id = %plan_id,
                    expires_at = %grant.membership_expiry_date,
                    created = write == MembershipWrite::Created,
                    "Membership updated"
                );
                Ok(Some(write))
            }
            Err(e) => {
                metrics::record_membership_grant("failed");
                tracing::error!(user_id = %user_id, error = %e, "Update membership error");
                Err(PaymentError::from_store("upsert_membership", e))
            }
        }
    }

    pub async fn get_payment_details(
        &self,
        payment_id: &str,
    ) -> Result<RazorpayPayment, PaymentError> {
        self.fetch_payment(payment_id).await.inspect_err(|e| {
            tracing::error!(payment_id = %payment_id, error = %e, "Get payment details error");
        })
    }

    pub async fn get_order_details(&self, order_id: &str) -> Result<RazorpayOrder, PaymentError> {
        self.gateway.fetch_order(order_id).await.map_err(|e| {
            tracing::error!(order_id = %order_id, error = %e, "Get order details error");
            PaymentError::from_gateway("fetch_order", e, |source| PaymentError::GatewayFetch {
                what: "order details",
                source,
            })
        })
    }

    pub async fn list_orders(&self, skip: u32, limit: u32) -> Result<OrderCollection, PaymentError> {
        self.gateway.list_orders(skip, limit).await.map_err(|e| {
            tracing::error!(skip, limit, error = %e, "Get all payments error");
            PaymentError::from_gateway("list_orders", e, |source| PaymentError::GatewayFetch {
                what: "payments",
                source,
            })
        })
    }

    /// Refund through the gateway; `None` refunds the full amount.
    pub async fn refund(
        &self,
        payment_id: &str,
        amount: Option<u64>,
    ) -> Result<Reconciled<RazorpayRefund>, PaymentError> {
        let refund = self
            .gateway
            .refund_payment(payment_id, amount)
            .await
            .map_err(|e| {
                tracing::error!(payment_id = %payment_id, error = %e, "Refund payment error");
                PaymentError::from_gateway("refund_payment", e, PaymentError::Refund)
            })?;

        metrics::record_refund();

        let mut warnings = Vec::new();
        let persistence = self.persistence().await;
        if let Some(store) = persistence.store() {
            let record = RefundRecord {
                refund_id: refund.id.clone(),
                payment_id: payment_id.to_string(),
                amount: refund.amount,
                status: refund.status.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = store.insert_refund(&record).await {
                warnings.push(Warning::RefundNotRecorded {
                    refund_id: refund.id.clone(),
                    error: e.to_string(),
                });
            }
        }

        Ok(Reconciled::new(refund, warnings))
    }
}

fn payment_record(
    callback: &PaymentCallback,
    payment: &RazorpayPayment,
    order: &OrderRecord,
    now: DateTime<Utc>,
) -> PaymentRecord {
    PaymentRecord {
        payment_id: callback.payment_id.clone(),
        order_id: callback.order_id.clone(),
        transaction_id: callback.transaction_id.clone(),
        amount: payment.amount,
        currency: payment.currency.clone(),
        status: payment.status.clone(),
        method: payment.method.clone(),
        email: payment.email.clone(),
        contact: payment.contact.clone(),
        user_id: order.user_id.clone(),
        plan_id: order.plan_id.clone(),
        form_data: order.form_data.clone(),
        verified: true,
        created_at: now,
        updated_at: now,
        gateway_response: payment.snapshot(),
    }
}
