//! `/api/payments` handlers.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{ApiResponse, CreateOrderRequest, ListQuery, RefundRequest, VerifyPaymentRequest},
    middleware::CurrentUser,
    services::{
        razorpay::{OrderCollection, RazorpayOrder, RazorpayPayment, RazorpayRefund},
        reconciliation::{CreatedOrder, VerifiedPayment},
    },
    utils::{validation::validate_body, ValidatedJson},
    AppState,
};

/// Gateway ids are `[A-Za-z0-9_]+`; anything else never reaches the gateway URL.
fn required_id(id: &str, label: &'static str) -> Result<String, AppError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("{} is required", label)));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AppError::BadRequest(anyhow::anyhow!("Invalid {}", label)));
    }
    Ok(id.to_string())
}

/// Create a Razorpay order for a membership plan.
pub async fn create_order(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreatedOrder>>), AppError> {
    tracing::info!(
        user_id = %payload.user_id,
        plan_id = %payload.plan_id,
        amount = payload.amount,
        transaction_id = %payload.transaction_id,
        "Creating payment order"
    );

    let order = state.payments.create_order(payload.into()).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::with_message("Order created successfully", order)),
    ))
}

/// Verify the checkout callback. Every failure answers 400 with its message.
pub async fn verify_payment(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<VerifyPaymentRequest>,
) -> Result<Json<ApiResponse<VerifiedPayment>>, AppError> {
    tracing::info!(
        razorpay_order_id = %payload.razorpay_order_id,
        razorpay_payment_id = %payload.razorpay_payment_id,
        "Verifying payment"
    );

    let outcome = state.payments.verify_and_save(payload.into()).await;
    outcome.log_warnings();

    let verified = outcome
        .value
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e.to_string())))?;

    Ok(Json(ApiResponse::with_message(
        "Payment verified successfully",
        verified,
    )))
}

pub async fn get_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(payment_id): Path<String>,
) -> Result<Json<ApiResponse<RazorpayPayment>>, AppError> {
    let payment_id = required_id(&payment_id, "Payment ID")?;
    tracing::debug!(payment_id = %payment_id, user_id = ?user.uid(), "Fetching payment");

    let payment = state.payments.get_payment_details(&payment_id).await?;
    Ok(Json(ApiResponse::ok(payment)))
}

pub async fn get_order(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<String>,
) -> Result<Json<ApiResponse<RazorpayOrder>>, AppError> {
    let order_id = required_id(&order_id, "Order ID")?;
    tracing::debug!(order_id = %order_id, user_id = ?user.uid(), "Fetching order");

    let order = state.payments.get_order_details(&order_id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<OrderCollection>>, AppError> {
    tracing::debug!(
        skip = query.skip(),
        limit = query.limit(),
        user_id = ?user.uid(),
        "Listing orders"
    );

    let orders = state
        .payments
        .list_orders(query.skip(), query.limit())
        .await?;
    Ok(Json(ApiResponse::ok(orders)))
}

/// Refund a payment. The body is optional; without an amount the full
/// payment is refunded.
pub async fn refund_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(payment_id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<RazorpayRefund>>, AppError> {
    let payment_id = required_id(&payment_id, "Payment ID")?;

    let request = if body.iter().all(u8::is_ascii_whitespace) {
        RefundRequest::default()
    } else {
        serde_json::from_slice::<RefundRequest>(&body).map_err(|e| {
            AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e))
        })?
    };
    let request = validate_body(request)?;

    tracing::info!(
        payment_id = %payment_id,
        amount = ?request.amount,
        user_id = ?user.uid(),
        "Processing refund"
    );

    let outcome = state.payments.refund(&payment_id, request.amount).await?;
    outcome.log_warnings();

    Ok(Json(ApiResponse::with_message(
        "Refund processed successfully",
        outcome.value,
    )))
}
