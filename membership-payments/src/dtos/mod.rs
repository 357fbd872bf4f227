use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{ApplicantProfile, Plan};
use crate::utils::sanitize_input;

/// Upper bound on a single order, in paise.
pub const MAX_ORDER_AMOUNT: u64 = 10_000_000;
/// Smallest amount Razorpay accepts, in paise.
pub const MIN_ORDER_AMOUNT: u64 = 100;
/// Razorpay caps `count` on list endpoints at 100.
pub const MAX_LIST_LIMIT: u32 = 100;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[6-9]\d{9}$").expect("phone pattern compiles"));

static USN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[1-4]NM(2[0-9])[A-Z]{2}\d{3}$").expect("USN pattern compiles")
});

/// Request bodies accepted through [`crate::utils::validation::ValidatedJson`].
///
/// `normalize` runs before validation; `check` adds rules the derive can't
/// express.
pub trait RequestBody: Validate {
    fn normalize(&mut self) {}

    fn check(&self, _errors: &mut ValidationErrors) {}
}

fn rule(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// Applicant details collected on the membership form.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct FormDataRequest {
    #[validate(length(min = 2, max = 100, message = "Name must be between 2 and 100 characters"))]
    pub name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    pub phone: String,
    #[validate(length(min = 1, message = "Branch is required"))]
    pub branch: String,
    #[validate(length(min = 1, message = "Year is required"))]
    pub year: String,
    pub usn: String,
}

impl FormDataRequest {
    fn normalize(&mut self) {
        self.name = sanitize_input(&self.name);
        self.email = sanitize_input(&self.email).to_lowercase();
        self.phone = sanitize_input(&self.phone);
        self.branch = sanitize_input(&self.branch);
        self.year = sanitize_input(&self.year);
        self.usn = sanitize_input(&self.usn);
    }

    fn check(&self, errors: &mut ValidationErrors) {
        if !PHONE_RE.is_match(&self.phone) {
            errors.add("form_data.phone", rule("phone", "Invalid phone number format"));
        }
        if !USN_RE.is_match(&self.usn) {
            errors.add("form_data.usn", rule("usn", "Invalid USN format"));
        }
    }
}

impl From<FormDataRequest> for ApplicantProfile {
    fn from(form: FormDataRequest) -> Self {
        Self {
            name: form.name,
            email: form.email,
            phone: form.phone,
            branch: form.branch,
            year: form.year,
            usn: form.usn,
        }
    }
}

/// `POST /api/payments/create-order`
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "User ID is required"))]
    pub user_id: String,
    pub plan_id: String,
    /// Amount in paise.
    #[validate(range(min = 100, message = "Amount must be at least 100 paise (1 INR)"))]
    pub amount: u64,
    #[validate(length(min = 1, message = "Transaction ID is required"))]
    pub transaction_id: String,
    #[validate(nested)]
    pub form_data: FormDataRequest,
}

impl RequestBody for CreateOrderRequest {
    fn normalize(&mut self) {
        self.user_id = self.user_id.trim().to_string();
        self.plan_id = self.plan_id.trim().to_lowercase();
        self.transaction_id = self.transaction_id.trim().to_string();
        self.form_data.normalize();
    }

    fn check(&self, errors: &mut ValidationErrors) {
        if self.plan_id.parse::<Plan>().is_err() {
            errors.add("plan_id", rule("plan", "Invalid plan ID"));
        }
        if self.amount > MAX_ORDER_AMOUNT {
            errors.add("amount", rule("range", "Amount exceeds maximum limit"));
        }
        self.form_data.check(errors);
    }
}

/// `POST /api/payments/verify-payment`, as posted by Razorpay checkout.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(default)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, message = "Razorpay payment ID is required"))]
    pub razorpay_payment_id: String,
    #[validate(length(min = 1, message = "Razorpay order ID is required"))]
    pub razorpay_order_id: String,
    #[validate(length(min = 1, message = "Razorpay signature is required"))]
    pub razorpay_signature: String,
    #[serde(rename = "transactionId")]
    #[validate(length(min = 1, message = "Transaction ID is required"))]
    pub transaction_id: String,
}

impl RequestBody for VerifyPaymentRequest {
    fn normalize(&mut self) {
        self.razorpay_payment_id = self.razorpay_payment_id.trim().to_string();
        self.razorpay_order_id = self.razorpay_order_id.trim().to_string();
        self.razorpay_signature = self.razorpay_signature.trim().to_string();
        self.transaction_id = self.transaction_id.trim().to_string();
    }
}

/// `POST /api/payments/refund/:paymentId`. An absent amount refunds in full.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(range(min = 100, message = "Amount must be at least 100 paise (1 INR)"))]
    pub amount: Option<u64>,
}

impl RequestBody for RefundRequest {}

/// `GET /api/payments/all?skip=&limit=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    pub fn skip(&self) -> u32 {
        self.skip.unwrap_or(0)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(10).clamp(1, MAX_LIST_LIMIT)
    }
}

/// Success envelope shared by every `/api` route.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data,
        }
    }
}
