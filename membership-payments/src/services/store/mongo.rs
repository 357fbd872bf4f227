use async_trait::async_trait;
use mongodb::bson::{doc, to_bson, to_document, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use std::future::Future;
use std::time::Duration;

use super::{PaymentStore, StoreError};
use crate::models::{
    MembershipGrant, MembershipWrite, OrderRecord, OrderStatus, PaymentFailureRecord,
    PaymentRecord, PaymentWrite, RefundRecord,
};

const DUPLICATE_KEY: i32 = 11000;

/// MongoDB-backed store. The payment/order write uses a multi-document
/// transaction, so the deployment must be a replica set.
#[derive(Clone)]
pub struct MongoPaymentStore {
    client: Client,
    db: Database,
    orders: Collection<OrderRecord>,
    payments: Collection<PaymentRecord>,
    failures: Collection<PaymentFailureRecord>,
    refunds: Collection<RefundRecord>,
    users: Collection<Document>,
    timeout: Duration,
}

impl MongoPaymentStore {
    pub fn new(client: Client, database: &str, timeout: Duration) -> Self {
        let db = client.database(database);
        Self {
            orders: db.collection("payment_orders"),
            payments: db.collection("payments"),
            failures: db.collection("payment_failures"),
            refunds: db.collection("refunds"),
            users: db.collection("users"),
            client,
            db,
            timeout,
        }
    }

    /// Create the secondary indexes lookups rely on.
    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        let order_user_index = IndexModel::builder()
            .keys(doc! { "userId": 1, "createdAt": -1 })
            .options(
                IndexOptions::builder()
                    .name("order_user_idx".to_string())
                    .build(),
            )
            .build();

        let order_transaction_index = IndexModel::builder()
            .keys(doc! { "transactionId": 1 })
            .options(
                IndexOptions::builder()
                    .name("order_transaction_idx".to_string())
                    .build(),
            )
            .build();

        self.orders
            .create_indexes([order_user_index, order_transaction_index], None)
            .await?;

        let payment_order_index = IndexModel::builder()
            .keys(doc! { "orderId": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_order_idx".to_string())
                    .build(),
            )
            .build();

        self.payments
            .create_indexes([payment_order_index], None)
            .await?;

        let failure_payment_index = IndexModel::builder()
            .keys(doc! { "paymentId": 1, "timestamp": -1 })
            .options(
                IndexOptions::builder()
                    .name("failure_payment_idx".to_string())
                    .build(),
            )
            .build();

        self.failures
            .create_indexes([failure_payment_index], None)
            .await?;

        let refund_payment_index = IndexModel::builder()
            .keys(doc! { "paymentId": 1 })
            .options(
                IndexOptions::builder()
                    .name("refund_payment_idx".to_string())
                    .build(),
            )
            .build();

        self.refunds
            .create_indexes([refund_payment_index], None)
            .await?;

        tracing::info!("Payment store indexes initialized");
        Ok(())
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation, timeout = ?self.timeout, "Store operation timed out");
                Err(StoreError::Timeout(operation))
            }
        }
    }

    async fn write_payment_and_order(
        &self,
        payment: &PaymentRecord,
    ) -> Result<PaymentWrite, StoreError> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        if let Err(e) = self
            .payments
            .insert_one_with_session(payment, None, &mut session)
            .await
        {
            // Dropping the session aborts the transaction server side.
            if is_duplicate_key(&e) {
                tracing::warn!(
                    payment_id = %payment.payment_id,
                    "Payment already recorded, leaving order untouched"
                );
                return Ok(PaymentWrite::AlreadyRecorded);
            }
            return Err(e.into());
        }

        self.orders
            .update_one_with_session(
                doc! { "_id": &payment.order_id },
                doc! {
                    "$set": {
                        "status": to_bson(&OrderStatus::Paid)?,
                        "paymentId": &payment.payment_id,
                        "updatedAt": to_bson(&payment.updated_at)?,
                    }
                },
                None,
                &mut session,
            )
            .await?;

        session.commit_transaction().await?;
        Ok(PaymentWrite::Inserted)
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl PaymentStore for MongoPaymentStore {
    async fn insert_order(&self, order: &OrderRecord) -> Result<(), StoreError> {
        self.bounded("insert_order", async {
            self.orders.insert_one(order, None).await?;
            Ok(())
        })
        .await
    }

    async fn find_order(&self, order_id: &str) -> Result<Option<OrderRecord>, StoreError> {
        self.bounded("find_order", async {
            Ok(self.orders.find_one(doc! { "_id": order_id }, None).await?)
        })
        .await
    }

    async fn record_verified_payment(
        &self,
        payment: &PaymentRecord,
    ) -> Result<PaymentWrite, StoreError> {
        self.bounded(
            "record_verified_payment",
            self.write_payment_and_order(payment),
        )
        .await
    }

    async fn record_failure(&self, failure: &PaymentFailureRecord) -> Result<(), StoreError> {
        self.bounded("record_failure", async {
            self.failures.insert_one(failure, None).await?;
            Ok(())
        })
        .await
    }

    async fn upsert_membership(
        &self,
        user_id: &str,
        grant: &MembershipGrant,
    ) -> Result<MembershipWrite, StoreError> {
        self.bounded("upsert_membership", async {
            let update = doc! {
                "$set": to_document(grant)?,
                "$setOnInsert": { "createdAt": to_bson(&grant.updated_at)? },
            };
            let options = UpdateOptions::builder().upsert(true).build();
            let result = self
                .users
                .update_one(doc! { "_id": user_id }, update, options)
                .await?;

            Ok(if result.upserted_id.is_some() {
                MembershipWrite::Created
            } else {
                MembershipWrite::Updated
            })
        })
        .await
    }

    async fn insert_refund(&self, refund: &RefundRecord) -> Result<(), StoreError> {
        self.bounded("insert_refund", async {
            self.refunds.insert_one(refund, None).await?;
            Ok(())
        })
        .await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.bounded("health_check", async {
            self.db.run_command(doc! { "ping": 1 }, None).await?;
            Ok(())
        })
        .await
    }
}
