use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::page::{PageSubmission, PageView, PlanType};
use crate::errors::ServiceError;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    Pix,
}

/// Normalized payment state shared by every provider.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Canceled,
}

/// Buyer details as typed in the checkout form.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CustomerContact {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    /// CPF or CNPJ, punctuation allowed
    #[schema(example = "123.456.789-09")]
    pub document: String,
    #[schema(example = "(11) 98765-4321")]
    pub phone: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// CPF, 11 digits
    Individual,
    /// CNPJ, 14 digits
    Company,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub country_code: String,
    pub area_code: String,
    pub number: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedContact {
    pub name: String,
    pub email: String,
    pub document: String,
    pub document_kind: DocumentKind,
    pub phone: PhoneNumber,
}

const BRAZIL_COUNTRY_CODE: &str = "55";

fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

impl CustomerContact {
    pub fn normalize(&self) -> Result<NormalizedContact, ServiceError> {
        self.validate()?;

        let document = digits(&self.document);
        let document_kind = match document.len() {
            11 => DocumentKind::Individual,
            14 => DocumentKind::Company,
            n => {
                return Err(ServiceError::ValidationError(format!(
                    "customer.document must have 11 (CPF) or 14 (CNPJ) digits, got {n}"
                )))
            }
        };

        let phone_digits = digits(&self.phone);
        let phone = match phone_digits.len() {
            // area code + 8 or 9 digit number
            10 | 11 => PhoneNumber {
                country_code: BRAZIL_COUNTRY_CODE.to_string(),
                area_code: phone_digits[..2].to_string(),
                number: phone_digits[2..].to_string(),
            },
            12 | 13 if phone_digits.starts_with(BRAZIL_COUNTRY_CODE) => PhoneNumber {
                country_code: BRAZIL_COUNTRY_CODE.to_string(),
                area_code: phone_digits[2..4].to_string(),
                number: phone_digits[4..].to_string(),
            },
            _ => {
                return Err(ServiceError::ValidationError(
                    "customer.phone must include area code and number".to_string(),
                ))
            }
        };

        Ok(NormalizedContact {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_ascii_lowercase(),
            document,
            document_kind,
            phone,
        })
    }
}

/// Request body for creating a checkout
#[derive(Clone, Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentRequest {
    #[validate]
    pub submission: PageSubmission,
    pub plan: PlanType,
    #[validate]
    pub customer: CustomerContact,
    pub payment_method: PaymentMethod,
}

/// PIX code bundle shown to the buyer until the transfer clears.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PixInstrument {
    /// Copy-and-paste code
    pub code: String,
    /// Display URL of the QR image
    pub key: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// What the buyer does next after a checkout was created.
#[derive(Clone, Debug, PartialEq)]
pub enum CheckoutOutcome {
    Redirect { payment_id: String, url: String },
    Pix {
        payment_id: String,
        instrument: PixInstrument,
    },
}

impl CheckoutOutcome {
    pub fn payment_id(&self) -> &str {
        match self {
            CheckoutOutcome::Redirect { payment_id, .. } => payment_id,
            CheckoutOutcome::Pix { payment_id, .. } => payment_id,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatePaymentResponse {
    pub success: bool,
    /// Id to poll at `/api/v1/payments/{payment_id}/status`. For Mercado Pago
    /// card checkouts this is the checkout preference id; poll with the
    /// `payment_id` query parameter Mercado Pago appends to the back URL
    /// instead, since preferences are not payments.
    pub payment_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrument: Option<PixInstrument>,
}

impl From<CheckoutOutcome> for CreatePaymentResponse {
    fn from(outcome: CheckoutOutcome) -> Self {
        match outcome {
            CheckoutOutcome::Redirect { payment_id, url } => Self {
                success: true,
                payment_id,
                redirect_url: Some(url),
                instrument: None,
            },
            CheckoutOutcome::Pix {
                payment_id,
                instrument,
            } => Self {
                success: true,
                payment_id,
                redirect_url: None,
                instrument: Some(instrument),
            },
        }
    }
}

/// Verified, normalized outcome of a provider payment.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentEvent {
    /// Provider order/payment id; the idempotency key
    pub payment_id: String,
    pub status: PaymentStatus,
    pub customer_email: Option<String>,
    pub submission: Option<PageSubmission>,
    pub plan: Option<PlanType>,
    /// Provider payload as received, kept for audit logs
    pub raw: serde_json::Value,
}

/// Response of the status polling endpoint
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusResponse {
    pub success: bool,
    pub status: PaymentStatus,
    pub record: Option<PageView>,
}

/// Acknowledgement returned to the provider for every authenticated delivery
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub success: bool,
}
