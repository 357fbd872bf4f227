pub mod auth;

pub use auth::{optional_auth, require_auth, AuthGate, CurrentUser};
