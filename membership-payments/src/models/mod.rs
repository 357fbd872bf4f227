pub mod membership;
pub mod order;
pub mod payment;

pub use membership::{plan_duration_days, MembershipGrant, MembershipWrite, Plan};
pub use order::{ApplicantProfile, OrderRecord, OrderStatus};
pub use payment::{
    GatewayPaymentSnapshot, PaymentFailureRecord, PaymentRecord, PaymentWrite, RefundRecord,
};
