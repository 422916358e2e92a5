pub mod health;
pub mod pages;
pub mod payment_webhooks;
pub mod payments;
pub mod qrcode;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;
