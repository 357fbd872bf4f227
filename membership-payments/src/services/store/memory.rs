use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{PaymentStore, StoreError};
use crate::models::{
    MembershipGrant, MembershipWrite, OrderRecord, OrderStatus, PaymentFailureRecord,
    PaymentRecord, PaymentWrite, RefundRecord,
};

/// User document as the in-memory store keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMember {
    pub grant: MembershipGrant,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    orders: HashMap<String, OrderRecord>,
    payments: HashMap<String, PaymentRecord>,
    failures: Vec<PaymentFailureRecord>,
    refunds: HashMap<String, RefundRecord>,
    users: HashMap<String, StoredMember>,
}

/// Process-local store for tests and local runs.
#[derive(Default)]
pub struct InMemoryPaymentStore {
    state: Mutex<State>,
    fail_membership_writes: AtomicBool,
    fail_failure_writes: AtomicBool,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every membership upsert fail until switched back.
    pub fn fail_membership_writes(&self, fail: bool) {
        self.fail_membership_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every failure-audit insert fail until switched back.
    pub fn fail_failure_writes(&self, fail: bool) {
        self.fail_failure_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn order(&self, order_id: &str) -> Option<OrderRecord> {
        self.lock().orders.get(order_id).cloned()
    }

    pub fn payment(&self, payment_id: &str) -> Option<PaymentRecord> {
        self.lock().payments.get(payment_id).cloned()
    }

    pub fn payment_count(&self) -> usize {
        self.lock().payments.len()
    }

    pub fn failures(&self) -> Vec<PaymentFailureRecord> {
        self.lock().failures.clone()
    }

    pub fn member(&self, user_id: &str) -> Option<StoredMember> {
        self.lock().users.get(user_id).cloned()
    }

    pub fn refund(&self, refund_id: &str) -> Option<RefundRecord> {
        self.lock().refunds.get(refund_id).cloned()
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Database(anyhow::anyhow!("{} failed (injected)", operation))
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert_order(&self, order: &OrderRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.orders.contains_key(&order.order_id) {
            return Err(StoreError::Database(anyhow::anyhow!(
                "Duplicate order id {}",
                order.order_id
            )));
        }
        state.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self.order(order_id))
    }

    async fn record_verified_payment(
        &self,
        payment: &PaymentRecord,
    ) -> Result<PaymentWrite, StoreError> {
        let mut state = self.lock();
        if state.payments.contains_key(&payment.payment_id) {
            return Ok(PaymentWrite::AlreadyRecorded);
        }

        state
            .payments
            .insert(payment.payment_id.clone(), payment.clone());
        if let Some(order) = state.orders.get_mut(&payment.order_id) {
            order.status = OrderStatus::Paid;
            order.payment_id = Some(payment.payment_id.clone());
            order.updated_at = payment.updated_at;
        }
        Ok(PaymentWrite::Inserted)
    }

    async fn record_failure(&self, failure: &PaymentFailureRecord) -> Result<(), StoreError> {
        if self.fail_failure_writes.load(Ordering::SeqCst) {
            return Err(injected("record_failure"));
        }
        self.lock().failures.push(failure.clone());
        Ok(())
    }

    async fn upsert_membership(
        &self,
        user_id: &str,
        grant: &MembershipGrant,
    ) -> Result<MembershipWrite, StoreError> {
        if self.fail_membership_writes.load(Ordering::SeqCst) {
            return Err(injected("upsert_membership"));
        }

        let mut state = self.lock();
        match state.users.get_mut(user_id) {
            Some(member) => {
                member.grant = grant.clone();
                Ok(MembershipWrite::Updated)
            }
            None => {
                state.users.insert(
                    user_id.to_string(),
                    StoredMember {
                        grant: grant.clone(),
                        created_at: grant.updated_at,
                    },
                );
                Ok(MembershipWrite::Created)
            }
        }
    }

    async fn insert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        self.lock()
            .refunds
            .insert(refund.refund_id.clone(), refund.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewayPaymentSnapshot;

    fn order(order_id: &str) -> OrderRecord {
        let now = Utc::now();
        OrderRecord {
            order_id: order_id.to_string(),
            amount: 50_000,
            currency: "INR".to_string(),
            receipt: Some("CSI_TXN_1".to_string()),
            status: OrderStatus::Created,
            notes: Default::default(),
            user_id: Some("user_1".to_string()),
            plan_id: Some("annual".to_string()),
            form_data: None,
            transaction_id: Some("TXN_1".to_string()),
            payment_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn payment(payment_id: &str, order_id: &str) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            payment_id: payment_id.to_string(),
            order_id: order_id.to_string(),
            transaction_id: Some("TXN_1".to_string()),
            amount: 50_000,
            currency: "INR".to_string(),
            status: "captured".to_string(),
            method: Some("upi".to_string()),
            email: None,
            contact: None,
            user_id: Some("user_1".to_string()),
            plan_id: Some("annual".to_string()),
            form_data: None,
            verified: true,
            created_at: now,
            updated_at: now,
            gateway_response: GatewayPaymentSnapshot {
                id: payment_id.to_string(),
                entity: "payment".to_string(),
                amount: 50_000,
                currency: "INR".to_string(),
                status: "captured".to_string(),
                order_id: Some(order_id.to_string()),
                method: Some("upi".to_string()),
                captured: Some(true),
                email: None,
                contact: None,
                created_at: 1_700_000_000,
            },
        }
    }

    #[tokio::test]
    async fn verified_payment_marks_order_paid_once() {
        let store = InMemoryPaymentStore::new();
        store.insert_order(&order("order_1")).await.unwrap();

        let first = store
            .record_verified_payment(&payment("pay_1", "order_1"))
            .await
            .unwrap();
        let second = store
            .record_verified_payment(&payment("pay_1", "order_1"))
            .await
            .unwrap();

        assert_eq!(first, PaymentWrite::Inserted);
        assert_eq!(second, PaymentWrite::AlreadyRecorded);
        assert_eq!(store.payment_count(), 1);

        let stored = store.order("order_1").unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        assert_eq!(stored.payment_id.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn membership_upsert_creates_then_updates() {
        let store = InMemoryPaymentStore::new();
        let first = MembershipGrant::new("monthly", "pay_1", Utc::now());
        let second = MembershipGrant::new("annual", "pay_2", Utc::now());

        assert_eq!(
            store.upsert_membership("user_1", &first).await.unwrap(),
            MembershipWrite::Created
        );
        assert_eq!(
            store.upsert_membership("user_1", &second).await.unwrap(),
            MembershipWrite::Updated
        );

        let member = store.member("user_1").unwrap();
        assert_eq!(member.grant.membership_type, "annual");
        assert_eq!(member.created_at, first.updated_at);
    }

    #[tokio::test]
    async fn injected_failures_surface_as_database_errors() {
        let store = InMemoryPaymentStore::new();
        store.fail_membership_writes(true);

        let grant = MembershipGrant::new("annual", "pay_1", Utc::now());
        let err = store.upsert_membership("user_1", &grant).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
        assert!(store.member("user_1").is_none());
    }
}
