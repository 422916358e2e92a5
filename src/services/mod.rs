// Payment providers
pub mod gateways;

// Checkout and payment resolution
pub mod checkout;
pub mod payment_status;

// Page publication pipeline and its collaborators
pub mod assets;
pub mod notifications;
pub mod publication;

// Rendering helpers
pub mod qr;

pub use checkout::CheckoutService;
pub use payment_status::PaymentStatusResolver;
pub use publication::{PublicationOutcome, PublicationService, PublicationSettings};
