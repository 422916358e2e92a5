pub mod page;
pub mod payment;

pub use page::{
    Animation, DateDisplay, MusicKind, MusicReference, PageSubmission, PageView, PlanType,
};
pub use payment::{
    CheckoutOutcome, CreatePaymentRequest, CreatePaymentResponse, CustomerContact,
    NormalizedContact, PaymentEvent, PaymentMethod, PaymentStatus, PaymentStatusResponse,
    PixInstrument, WebhookAck,
};
