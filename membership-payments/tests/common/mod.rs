#![allow(dead_code)]

use axum::Router;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use membership_payments::config::Config;
use membership_payments::services::razorpay::payment_signature;
use membership_payments::services::{
    ClientRegistry, IdentityVerifier, InMemoryPaymentStore, PaymentService, Persistence,
};
use membership_payments::startup::Application;
use membership_payments::{build_router, AppState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const KEY_ID: &str = "rzp_test_key";
pub const KEY_SECRET: &str = "rzp_test_secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const JWT_SECRET: &str = "identity-secret-for-tests";

pub const ORDER_ID: &str = "order_MEMB0001";
pub const PAYMENT_ID: &str = "pay_MEMB0001";
pub const USER_ID: &str = "user_42";

/// Build a config the way `from_env` would, from a fixed variable set.
pub fn test_config(razorpay_url: &str, overrides: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("ENVIRONMENT".to_string(), "test".to_string()),
        ("PORT".to_string(), "0".to_string()),
        ("RAZORPAY_KEY_ID".to_string(), KEY_ID.to_string()),
        ("RAZORPAY_KEY_SECRET".to_string(), KEY_SECRET.to_string()),
        ("RAZORPAY_WEBHOOK_SECRET".to_string(), WEBHOOK_SECRET.to_string()),
        ("RAZORPAY_API_BASE_URL".to_string(), razorpay_url.to_string()),
        ("GATEWAY_TIMEOUT_SECS".to_string(), "1".to_string()),
        ("AUTH_JWT_SECRET".to_string(), JWT_SECRET.to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    Config::from_lookup(service_core::config::Config::default(), |key| {
        vars.get(key).cloned()
    })
    .expect("test config is valid")
}

/// A fake Razorpay API, an in-memory store and the service wired to both.
pub struct TestContext {
    pub razorpay: MockServer,
    pub store: Arc<InMemoryPaymentStore>,
    pub config: Config,
    pub payments: PaymentService,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_overrides(&[]).await
    }

    pub async fn with_overrides(overrides: &[(&str, &str)]) -> Self {
        let razorpay = MockServer::start().await;
        let config = test_config(&razorpay.uri(), overrides);
        let store = Arc::new(InMemoryPaymentStore::new());

        let registry = ClientRegistry::new(config.razorpay.clone(), config.store.clone());
        let payments = PaymentService::new(
            registry.gateway(),
            Persistence::Enabled(store.clone()),
            config.razorpay.key_secret.clone(),
        );

        Self {
            razorpay,
            store,
            config,
            payments,
        }
    }

    /// The same gateway wiring with no document store behind it.
    pub fn payments_without_store(&self) -> PaymentService {
        let registry = ClientRegistry::new(self.config.razorpay.clone(), self.config.store.clone());
        PaymentService::new(
            registry.gateway(),
            Persistence::Disabled,
            self.config.razorpay.key_secret.clone(),
        )
    }

    pub async fn mount_refund(&self, refund_id: &str, payment_id: &str, amount: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/payments/{}/refund", payment_id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(refund_json(refund_id, payment_id, amount)),
            )
            .mount(&self.razorpay)
            .await;
    }

    pub fn router(&self) -> Router {
        let identity = IdentityVerifier::from_config(&self.config.auth)
            .expect("identity verifier builds");
        build_router(AppState::new(
            self.config.clone(),
            self.payments.clone(),
            identity,
        ))
    }

    pub async fn mount_order(&self, order_id: &str, amount: u64) {
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(order_json(order_id, amount)))
            .mount(&self.razorpay)
            .await;
    }

    pub async fn mount_payment(&self, payment_id: &str, order_id: &str, amount: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/payments/{}", payment_id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(payment_json(payment_id, order_id, amount)),
            )
            .mount(&self.razorpay)
            .await;
    }

    pub async fn mount_gateway_error(&self, verb: &str, route: &str, status: u16) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": {
                    "code": "BAD_REQUEST_ERROR",
                    "description": "The id provided does not exist"
                }
            })))
            .mount(&self.razorpay)
            .await;
    }

    /// Create an order through the service for the standard test user.
    pub async fn create_order(&self, plan_id: &str, amount: u64) {
        self.mount_order(ORDER_ID, amount).await;
        self.payments
            .create_order(new_order(plan_id, amount))
            .await
            .expect("order is created");
    }
}

pub fn order_json(order_id: &str, amount: u64) -> Value {
    json!({
        "id": order_id,
        "entity": "order",
        "amount": amount,
        "amount_paid": 0,
        "amount_due": amount,
        "currency": "INR",
        "receipt": "CSI_TXN_TEST",
        "status": "created",
        "attempts": 0,
        "notes": {},
        "created_at": 1_700_000_000
    })
}

pub fn payment_json(payment_id: &str, order_id: &str, amount: u64) -> Value {
    json!({
        "id": payment_id,
        "entity": "payment",
        "amount": amount,
        "currency": "INR",
        "status": "captured",
        "order_id": order_id,
        "method": "upi",
        "description": "Annual membership",
        "email": "asha@example.com",
        "contact": "+919876543210",
        "captured": true,
        "amount_refunded": 0,
        "created_at": 1_700_000_100
    })
}

pub fn refund_json(refund_id: &str, payment_id: &str, amount: u64) -> Value {
    json!({
        "id": refund_id,
        "entity": "refund",
        "amount": amount,
        "currency": "INR",
        "payment_id": payment_id,
        "status": "processed",
        "speed_processed": "normal",
        "created_at": 1_700_000_200
    })
}

pub fn form_data() -> Value {
    json!({
        "name": "Asha Rao",
        "email": "Asha@Example.com",
        "phone": "9876543210",
        "branch": "CSE",
        "year": "3",
        "usn": "4NM21CS042"
    })
}

pub fn create_order_body(plan_id: &str, amount: u64) -> Value {
    json!({
        "userId": USER_ID,
        "planId": plan_id,
        "amount": amount,
        "transactionId": "TXN_TEST_0001",
        "formData": form_data()
    })
}

pub fn new_order(
    plan_id: &str,
    amount: u64,
) -> membership_payments::services::reconciliation::NewOrder {
    membership_payments::services::reconciliation::NewOrder {
        user_id: USER_ID.to_string(),
        plan_id: plan_id.to_string(),
        amount,
        transaction_id: "TXN_TEST_0001".to_string(),
        profile: membership_payments::models::ApplicantProfile {
            name: "Asha Rao".to_string(),
            email: "asha@example.com".to_string(),
            phone: "9876543210".to_string(),
            branch: "CSE".to_string(),
            year: "3".to_string(),
            usn: "4NM21CS042".to_string(),
        },
    }
}

pub fn sign(order_id: &str, payment_id: &str) -> String {
    payment_signature(order_id, payment_id, KEY_SECRET).expect("signature computes")
}

pub fn callback(
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> membership_payments::services::reconciliation::PaymentCallback {
    membership_payments::services::reconciliation::PaymentCallback {
        order_id: order_id.to_string(),
        payment_id: payment_id.to_string(),
        signature: signature.to_string(),
        transaction_id: Some("TXN_TEST_0001".to_string()),
    }
}

pub fn bearer_token(sub: &str) -> String {
    let claims = json!({
        "sub": sub,
        "email": "asha@example.com",
        "email_verified": true,
        "exp": (Utc::now() + ChronoDuration::minutes(10)).timestamp()
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token encodes")
}

/// A running server on a random port, without a document store.
pub struct TestApp {
    pub address: String,
    pub port: u16,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let config = test_config("http://127.0.0.1:9", &[]);
        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp { address, port }
    }
}
