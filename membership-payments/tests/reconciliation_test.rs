mod common;

use chrono::Utc;
use common::*;
use membership_payments::models::{MembershipWrite, OrderStatus};
use membership_payments::services::{ClientRegistry, PaymentError, PaymentService, Warning};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn create_order_stores_a_created_order() {
    let ctx = TestContext::new().await;
    ctx.mount_order(ORDER_ID, 50_000).await;

    let created = ctx
        .payments
        .create_order(new_order("annual", 50_000))
        .await
        .unwrap();

    assert_eq!(created.order_id, ORDER_ID);
    assert_eq!(created.amount, 50_000);
    assert_eq!(created.currency, "INR");
    assert_eq!(created.transaction_id, "TXN_TEST_0001");

    let order = ctx.store.order(ORDER_ID).expect("order stored");
    assert_eq!(order.status, OrderStatus::Created);
    assert_eq!(order.user_id.as_deref(), Some(USER_ID));
    assert_eq!(order.plan_id.as_deref(), Some("annual"));
    assert_eq!(order.notes.get("usn").map(String::as_str), Some("4NM21CS042"));
    assert!(order.payment_id.is_none());
}

#[tokio::test]
async fn create_order_sends_receipt_and_notes() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .and(body_json(serde_json::json!({
            "amount": 50_000,
            "currency": "INR",
            "receipt": "CSI_TXN_TEST_0001",
            "notes": {
                "userId": USER_ID,
                "planId": "annual",
                "transactionId": "TXN_TEST_0001",
                "name": "Asha Rao",
                "email": "asha@example.com",
                "usn": "4NM21CS042"
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(order_json(ORDER_ID, 50_000)))
        .expect(1)
        .mount(&ctx.razorpay)
        .await;

    ctx.payments
        .create_order(new_order("annual", 50_000))
        .await
        .unwrap();
}

#[tokio::test]
async fn gateway_rejection_stores_nothing() {
    let ctx = TestContext::new().await;
    ctx.mount_gateway_error("POST", "/orders", 400).await;

    let err = ctx
        .payments
        .create_order(new_order("annual", 50_000))
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::OrderCreation(_)));
    assert!(ctx.store.order(ORDER_ID).is_none());
}

#[tokio::test]
async fn verified_payment_marks_order_paid_and_grants_membership() {
    let ctx = TestContext::new().await;
    ctx.create_order("annual", 50_000).await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 50_000).await;

    let before = Utc::now();
    let outcome = ctx
        .payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &sign(ORDER_ID, PAYMENT_ID)))
        .await;

    assert!(outcome.warnings.is_empty());
    let verified = outcome.value.unwrap();
    assert!(verified.verified);
    assert_eq!(verified.payment_id, PAYMENT_ID);
    assert_eq!(verified.status, "captured");
    assert_eq!(verified.amount, 50_000);

    let order = ctx.store.order(ORDER_ID).unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_id.as_deref(), Some(PAYMENT_ID));

    assert_eq!(ctx.store.payment_count(), 1);
    let payment = ctx.store.payment(PAYMENT_ID).unwrap();
    assert!(payment.verified);
    assert_eq!(payment.user_id.as_deref(), Some(USER_ID));
    assert_eq!(payment.gateway_response.order_id.as_deref(), Some(ORDER_ID));
    assert_eq!(payment.gateway_response.method.as_deref(), Some("upi"));

    let member = ctx.store.member(USER_ID).expect("membership granted");
    assert!(member.grant.is_member);
    assert_eq!(member.grant.membership_type, "annual");
    assert_eq!(member.grant.payment_id, PAYMENT_ID);
    let days = (member.grant.membership_expiry_date - before).num_days();
    assert!((364..=365).contains(&days), "expiry was {} days out", days);
}

#[tokio::test]
async fn monthly_plan_expires_after_thirty_days() {
    let ctx = TestContext::new().await;
    ctx.create_order("monthly", 9_900).await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 9_900).await;

    let before = Utc::now();
    ctx.payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &sign(ORDER_ID, PAYMENT_ID)))
        .await
        .value
        .unwrap();

    let member = ctx.store.member(USER_ID).unwrap();
    let days = (member.grant.membership_expiry_date - before).num_days();
    assert!((29..=30).contains(&days), "expiry was {} days out", days);
}

#[tokio::test]
async fn tampered_signature_is_rejected_and_audited() {
    let ctx = TestContext::new().await;
    ctx.create_order("annual", 50_000).await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 50_000).await;

    let mut signature = sign(ORDER_ID, PAYMENT_ID);
    let last = signature.pop().unwrap();
    signature.push(if last == '0' { '1' } else { '0' });

    let outcome = ctx
        .payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &signature))
        .await;

    let err = outcome.value.unwrap_err();
    assert!(matches!(err, PaymentError::SignatureInvalid));
    assert_eq!(err.to_string(), "Invalid payment signature");

    assert_eq!(ctx.store.payment_count(), 0);
    assert_eq!(ctx.store.order(ORDER_ID).unwrap().status, OrderStatus::Created);
    assert!(ctx.store.member(USER_ID).is_none());

    let failures = ctx.store.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].order_id, ORDER_ID);
    assert_eq!(failures[0].payment_id, PAYMENT_ID);
    assert_eq!(failures[0].signature, signature);
    assert_eq!(failures[0].error, "Invalid payment signature");
}

#[tokio::test]
async fn swapped_ids_do_not_verify() {
    let ctx = TestContext::new().await;
    ctx.create_order("annual", 50_000).await;

    let outcome = ctx
        .payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &sign(PAYMENT_ID, ORDER_ID)))
        .await;

    assert!(matches!(outcome.value, Err(PaymentError::SignatureInvalid)));
    assert_eq!(ctx.store.payment_count(), 0);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let ctx = TestContext::new().await;
    ctx.mount_payment(PAYMENT_ID, "order_UNKNOWN", 50_000).await;

    let outcome = ctx
        .payments
        .verify_and_save(callback(
            "order_UNKNOWN",
            PAYMENT_ID,
            &sign("order_UNKNOWN", PAYMENT_ID),
        ))
        .await;

    let err = outcome.value.unwrap_err();
    assert!(matches!(err, PaymentError::OrderNotFound(ref id) if id == "order_UNKNOWN"));
    assert_eq!(ctx.store.payment_count(), 0);
    assert_eq!(ctx.store.failures().len(), 1);
}

#[tokio::test]
async fn repeated_verification_does_not_grant_twice() {
    let ctx = TestContext::new().await;
    ctx.create_order("annual", 50_000).await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 50_000).await;
    let signature = sign(ORDER_ID, PAYMENT_ID);

    ctx.payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &signature))
        .await
        .value
        .unwrap();
    let first_grant = ctx.store.member(USER_ID).unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = ctx
        .payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &signature))
        .await;

    assert!(second.value.is_ok());
    assert_eq!(
        second.warnings,
        vec![Warning::PaymentAlreadyRecorded {
            payment_id: PAYMENT_ID.to_string()
        }]
    );
    assert_eq!(ctx.store.payment_count(), 1);
    assert_eq!(ctx.store.member(USER_ID).unwrap(), first_grant);
}

#[tokio::test]
async fn membership_failure_does_not_fail_verification() {
    let ctx = TestContext::new().await;
    ctx.create_order("semester", 30_000).await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 30_000).await;
    ctx.store.fail_membership_writes(true);

    let outcome = ctx
        .payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &sign(ORDER_ID, PAYMENT_ID)))
        .await;

    assert!(outcome.value.is_ok());
    assert_eq!(outcome.warnings.len(), 1);
    assert!(matches!(
        &outcome.warnings[0],
        Warning::MembershipGrantFailed { user_id, .. } if user_id == USER_ID
    ));
    assert_eq!(ctx.store.order(ORDER_ID).unwrap().status, OrderStatus::Paid);
    assert!(ctx.store.member(USER_ID).is_none());
}

#[tokio::test]
async fn failed_audit_is_reported_as_warning() {
    let ctx = TestContext::new().await;
    ctx.create_order("annual", 50_000).await;
    ctx.store.fail_failure_writes(true);

    let outcome = ctx
        .payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, "bad-signature"))
        .await;

    assert!(matches!(outcome.value, Err(PaymentError::SignatureInvalid)));
    assert!(matches!(
        outcome.warnings.as_slice(),
        [Warning::FailureAuditFailed { payment_id, .. }] if payment_id == PAYMENT_ID
    ));
    assert!(ctx.store.failures().is_empty());
}

#[tokio::test]
async fn grant_membership_updates_existing_user() {
    let ctx = TestContext::new().await;

    let first = ctx
        .payments
        .grant_membership(USER_ID, "monthly", "pay_A")
        .await
        .unwrap();
    let second = ctx
        .payments
        .grant_membership(USER_ID, "annual", "pay_B")
        .await
        .unwrap();

    assert_eq!(first, Some(MembershipWrite::Created));
    assert_eq!(second, Some(MembershipWrite::Updated));

    let member = ctx.store.member(USER_ID).unwrap();
    assert_eq!(member.grant.membership_type, "annual");
    assert_eq!(member.grant.payment_id, "pay_B");
}

#[tokio::test]
async fn unknown_plan_defaults_to_a_year() {
    let ctx = TestContext::new().await;
    let before = Utc::now();

    ctx.payments
        .grant_membership(USER_ID, "lifetime", "pay_A")
        .await
        .unwrap();

    let member = ctx.store.member(USER_ID).unwrap();
    let days = (member.grant.membership_expiry_date - before).num_days();
    assert!((364..=365).contains(&days));
}

#[tokio::test]
async fn full_refund_records_gateway_amount() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path(format!("/payments/{}/refund", PAYMENT_ID)))
        .and(body_json(serde_json::json!({ "speed": "normal" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(refund_json("rfnd_1", PAYMENT_ID, 50_000)),
        )
        .mount(&ctx.razorpay)
        .await;

    let outcome = ctx.payments.refund(PAYMENT_ID, None).await.unwrap();

    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.value.id, "rfnd_1");
    let refund = ctx.store.refund("rfnd_1").expect("refund stored");
    assert_eq!(refund.payment_id, PAYMENT_ID);
    assert_eq!(refund.amount, 50_000);
    assert_eq!(refund.status, "processed");
}

#[tokio::test]
async fn partial_refund_sends_amount() {
    let ctx = TestContext::new().await;
    Mock::given(method("POST"))
        .and(path(format!("/payments/{}/refund", PAYMENT_ID)))
        .and(body_json(serde_json::json!({ "amount": 10_000, "speed": "normal" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(refund_json("rfnd_2", PAYMENT_ID, 10_000)),
        )
        .expect(1)
        .mount(&ctx.razorpay)
        .await;

    let outcome = ctx.payments.refund(PAYMENT_ID, Some(10_000)).await.unwrap();
    assert_eq!(ctx.store.refund("rfnd_2").unwrap().amount, 10_000);
    assert_eq!(outcome.value.amount, 10_000);
}

#[tokio::test]
async fn slow_gateway_surfaces_timeout() {
    let ctx = TestContext::new().await;
    Mock::given(method("GET"))
        .and(path(format!("/payments/{}", PAYMENT_ID)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payment_json(PAYMENT_ID, ORDER_ID, 50_000))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&ctx.razorpay)
        .await;

    let err = ctx
        .payments
        .get_payment_details(PAYMENT_ID)
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::Timeout { operation: "fetch_payment" }));
}

#[tokio::test]
async fn unconfigured_gateway_fails_per_call() {
    let ctx = TestContext::with_overrides(&[("RAZORPAY_KEY_ID", "")]).await;

    let err = ctx.payments.get_order_details(ORDER_ID).await.unwrap_err();
    assert!(matches!(err, PaymentError::GatewayFetch { what: "order details", .. }));
}

#[tokio::test]
async fn create_order_without_store_still_succeeds() {
    let ctx = TestContext::new().await;
    ctx.mount_order(ORDER_ID, 50_000).await;
    let payments = ctx.payments_without_store();

    let created = payments
        .create_order(new_order("annual", 50_000))
        .await
        .unwrap();

    assert_eq!(created.order_id, ORDER_ID);
    assert!(ctx.store.order(ORDER_ID).is_none());
}

#[tokio::test]
async fn verification_without_store_skips_bookkeeping() {
    let ctx = TestContext::new().await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 50_000).await;
    let payments = ctx.payments_without_store();

    let outcome = payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, &sign(ORDER_ID, PAYMENT_ID)))
        .await;

    assert!(outcome.warnings.is_empty());
    let verified = outcome.value.unwrap();
    assert!(verified.verified);
    assert_eq!(verified.status, "captured");
    assert_eq!(verified.amount, 50_000);
}

#[tokio::test]
async fn rejected_signature_without_store_has_no_audit_warning() {
    let ctx = TestContext::new().await;
    let payments = ctx.payments_without_store();

    let outcome = payments
        .verify_and_save(callback(ORDER_ID, PAYMENT_ID, "deadbeef"))
        .await;

    assert!(matches!(outcome.value, Err(PaymentError::SignatureInvalid)));
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn refund_without_store_has_no_warnings() {
    let ctx = TestContext::new().await;
    ctx.mount_refund("rfnd_3", PAYMENT_ID, 50_000).await;
    let payments = ctx.payments_without_store();

    let outcome = payments.refund(PAYMENT_ID, None).await.unwrap();

    assert!(outcome.warnings.is_empty());
    assert_eq!(outcome.value.id, "rfnd_3");
    assert!(ctx.store.refund("rfnd_3").is_none());
}

#[tokio::test]
async fn grant_membership_without_store_is_skipped() {
    let ctx = TestContext::new().await;
    let payments = ctx.payments_without_store();

    let write = payments
        .grant_membership(USER_ID, "annual", PAYMENT_ID)
        .await
        .unwrap();

    assert!(write.is_none());
}

#[tokio::test]
async fn registry_store_is_resolved_by_operations() {
    let ctx = TestContext::new().await;
    ctx.mount_order(ORDER_ID, 50_000).await;
    let registry = Arc::new(ClientRegistry::new(
        ctx.config.razorpay.clone(),
        ctx.config.store.clone(),
    ));
    let payments = PaymentService::from_registry(
        registry.clone(),
        ctx.config.razorpay.key_secret.clone(),
    );

    assert!(!registry.store_initialized());
    payments
        .create_order(new_order("annual", 50_000))
        .await
        .unwrap();

    assert!(registry.store_initialized());
    assert!(!payments.persistence().await.is_enabled());
}

#[tokio::test]
async fn unreachable_store_is_retried_by_each_operation() {
    let ctx =
        TestContext::with_overrides(&[("STORE_SERVICE_ACCOUNT_PATH", "/nonexistent/store-key.json")])
            .await;
    ctx.mount_order(ORDER_ID, 50_000).await;
    let registry = Arc::new(ClientRegistry::new(
        ctx.config.razorpay.clone(),
        ctx.config.store.clone(),
    ));
    let payments = PaymentService::from_registry(
        registry.clone(),
        ctx.config.razorpay.key_secret.clone(),
    );

    for _ in 0..2 {
        payments
            .create_order(new_order("annual", 50_000))
            .await
            .unwrap();
        assert!(!registry.store_initialized());
    }
}

#[tokio::test]
async fn gateway_ids_stay_inside_their_path_segment() {
    let ctx = TestContext::new().await;
    ctx.mount_payment(PAYMENT_ID, ORDER_ID, 50_000).await;

    let err = ctx
        .payments
        .get_order_details("../payments/pay_MEMB0001")
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::GatewayFetch { .. }));
    let requests = ctx.razorpay.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), "/orders/..%2Fpayments%2Fpay_MEMB0001");
}
