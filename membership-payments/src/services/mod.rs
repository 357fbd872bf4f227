pub mod bootstrap;
pub mod identity;
pub mod metrics;
pub mod razorpay;
pub mod reconciliation;
pub mod store;
pub mod webhook;

pub use bootstrap::ClientRegistry;
pub use identity::{Identity, IdentityVerifier};
pub use metrics::{get_metrics, init_metrics};
pub use razorpay::{PaymentGateway, RazorpayClient};
pub use reconciliation::{PaymentError, PaymentService, Reconciled, Warning};
pub use store::{InMemoryPaymentStore, MongoPaymentStore, PaymentStore, Persistence};
pub use webhook::{WebhookEvent, WebhookVerifier};
