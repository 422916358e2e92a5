/// Inbound payment webhook authentication
pub mod signature;

pub use signature::{SignatureGenerator, WebhookVerifier};
