//! Persistence for orders, payments, failure audits, refunds and memberships.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    MembershipGrant, MembershipWrite, OrderRecord, PaymentFailureRecord, PaymentRecord,
    PaymentWrite, RefundRecord,
};

pub use memory::InMemoryPaymentStore;
pub use mongo::MongoPaymentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store operation '{0}' timed out")]
    Timeout(&'static str),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Database(anyhow::Error::new(err))
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Database(anyhow::Error::new(err))
    }
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_order(&self, order: &OrderRecord) -> Result<(), StoreError>;

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError>;

    /// Insert the payment and mark its order `paid` as one unit.
    ///
    /// A payment id that is already stored leaves everything untouched and
    /// yields [`PaymentWrite::AlreadyRecorded`].
    async fn record_verified_payment(
        &self,
        payment: &PaymentRecord,
    ) -> Result<PaymentWrite, StoreError>;

    async fn record_failure(&self, failure: &PaymentFailureRecord) -> Result<(), StoreError>;

    /// Update the user's membership fields, creating the user if needed.
    async fn upsert_membership(
        &self,
        user_id: &str,
        grant: &MembershipGrant,
    ) -> Result<MembershipWrite, StoreError>;

    async fn insert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Whether a document store is available to this process.
#[derive(Clone)]
pub enum Persistence {
    Enabled(Arc<dyn PaymentStore>),
    Disabled,
}

impl Persistence {
    pub fn enabled(store: impl PaymentStore + 'static) -> Self {
        Persistence::Enabled(Arc::new(store))
    }

    pub fn store(&self) -> Option<&dyn PaymentStore> {
        match self {
            Persistence::Enabled(store) => Some(store.as_ref()),
            Persistence::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Persistence::Enabled(_))
    }
}

impl fmt::Debug for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persistence::Enabled(_) => f.write_str("Persistence::Enabled"),
            Persistence::Disabled => f.write_str("Persistence::Disabled"),
        }
    }
}
