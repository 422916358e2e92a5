//! Checkout providers behind a single [`PaymentGateway`] trait.
//!
//! Each provider translates our checkout into its order/preference API,
//! reads payments back, parses its webhook body into a
//! [`WebhookNotification`] and maps its status vocabulary onto
//! [`PaymentStatus`] through an explicit table.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::AppConfig;
use crate::dto::{CheckoutOutcome, NormalizedContact, PaymentEvent, PaymentMethod, PlanType};
use crate::errors::ServiceError;

pub mod mercadopago;
pub mod pagarme;

pub use mercadopago::MercadoPagoGateway;
pub use pagarme::PagarmeGateway;

static PAYMENT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("payment id pattern compiles")
});

/// Metadata keys carried through the provider.
pub const METADATA_SUBMISSION_KEY: &str = "submission";
pub const METADATA_PLAN_KEY: &str = "plan_type";

/// Everything a provider needs to open a checkout.
#[derive(Clone, Debug)]
pub struct CheckoutOrder {
    /// Our own reference, sent as the provider's external code
    pub reference: String,
    pub plan: PlanType,
    pub amount_cents: i64,
    pub amount: Decimal,
    pub currency: String,
    pub customer: NormalizedContact,
    pub method: PaymentMethod,
    /// Serialized page submission
    pub metadata: String,
}

impl CheckoutOrder {
    pub fn description(&self) -> String {
        format!("Plano {} - DayLove", self.plan.label())
    }
}

/// Authenticated webhook body, one variant per known schema.
#[derive(Clone, Debug)]
pub enum WebhookNotification {
    /// Pagar.me `order.*` events embed the whole order.
    PagarmeOrder {
        event_type: String,
        order: Box<pagarme::Order>,
        raw: serde_json::Value,
    },
    /// Pagar.me `charge.*` events reference the parent order.
    PagarmeCharge {
        event_type: String,
        order_id: String,
        charge: pagarme::Charge,
    },
    /// Mercado Pago only announces the payment id.
    MercadoPagoPayment {
        action: Option<String>,
        payment_id: String,
    },
    /// A resource type we do not act on.
    Ignored { event_type: String },
}

impl WebhookNotification {
    pub fn payment_id(&self) -> Option<&str> {
        match self {
            WebhookNotification::PagarmeOrder { order, .. } => Some(order.id.as_str()),
            WebhookNotification::PagarmeCharge { order_id, .. } => Some(order_id.as_str()),
            WebhookNotification::MercadoPagoPayment { payment_id, .. } => Some(payment_id.as_str()),
            WebhookNotification::Ignored { .. } => None,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            WebhookNotification::PagarmeOrder { event_type, .. }
            | WebhookNotification::PagarmeCharge { event_type, .. }
            | WebhookNotification::Ignored { event_type } => event_type,
            WebhookNotification::MercadoPagoPayment { action, .. } => {
                action.as_deref().unwrap_or("payment")
            }
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name as used in configuration
    fn provider(&self) -> &'static str;

    /// Header carrying the webhook HMAC
    fn signature_header(&self) -> &'static str;

    async fn create_checkout(&self, order: CheckoutOrder) -> Result<CheckoutOutcome, ServiceError>;

    /// Reads the current state of a payment from the provider.
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentEvent, ServiceError>;

    fn parse_notification(&self, body: &[u8]) -> Result<WebhookNotification, ServiceError>;

    /// The payment record embedded in a notification, if the schema carries one.
    fn embedded_event(
        &self,
        notification: &WebhookNotification,
    ) -> Result<Option<PaymentEvent>, ServiceError>;
}

/// Connection settings shared by the provider clients.
#[derive(Clone, Debug)]
pub struct GatewaySettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub pix_expires_in_secs: u64,
    pub public_base_url: String,
}

impl From<&AppConfig> for GatewaySettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            api_key: cfg
                .payment_api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            base_url: cfg.payment_api_base_url.clone(),
            timeout: cfg.provider_timeout(),
            pix_expires_in_secs: cfg.pix_expires_in_secs,
            public_base_url: cfg.public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl GatewaySettings {
    pub(crate) fn require_api_key(&self, provider: &str) -> Result<&str, ServiceError> {
        self.api_key.as_deref().ok_or_else(|| {
            error!(provider, "payment provider API key is not configured");
            ServiceError::Misconfigured(format!("{} API key is not configured", provider))
        })
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ServiceError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client build failed: {}", e)))
    }
}

/// Builds the configured gateway.
pub fn gateway_from_config(cfg: &AppConfig) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
    let settings = GatewaySettings::from(cfg);
    match cfg.payment_provider.to_ascii_lowercase().as_str() {
        "pagarme" => Ok(Arc::new(PagarmeGateway::new(settings)?)),
        "mercadopago" => Ok(Arc::new(MercadoPagoGateway::new(settings)?)),
        other => Err(ServiceError::Misconfigured(format!(
            "unsupported payment provider: {}",
            other
        ))),
    }
}

/// Provider ids are opaque tokens. Anything else is refused before it can
/// reach a provider URL.
pub fn validate_payment_id(payment_id: &str) -> Result<(), ServiceError> {
    if PAYMENT_ID.is_match(payment_id) {
        Ok(())
    } else {
        warn!(payment_id = %payment_id, "rejected malformed payment id");
        Err(ServiceError::BadRequest(format!(
            "invalid payment id: {:?}",
            payment_id
        )))
    }
}

/// Appends `segments` to the provider base URL, percent-encoding each one.
pub(crate) fn resource_url(base_url: &str, segments: &[&str]) -> Result<url::Url, ServiceError> {
    let mut url = url::Url::parse(base_url).map_err(|e| {
        ServiceError::Misconfigured(format!("invalid provider base URL {}: {}", base_url, e))
    })?;
    url.path_segments_mut()
        .map_err(|_| {
            ServiceError::Misconfigured(format!("provider base URL {} cannot take a path", base_url))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// What a 404 from the provider means for the call being made.
#[derive(Clone, Copy, Debug)]
pub(crate) enum NotFoundMeans<'a> {
    UnknownPayment(&'a str),
    Rejection,
}

/// Reads a provider response, classifying failures: 5xx is transient, 404 on
/// a read is an unknown payment, other 4xx carry the provider's detail.
pub(crate) async fn read_provider_response<T: DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
    not_found: NotFoundMeans<'_>,
) -> Result<(T, serde_json::Value), ServiceError> {
    let status = response.status();
    let body = response.bytes().await?;

    if status.is_server_error() {
        warn!(provider, status = %status, "provider returned a server error");
        return Err(ServiceError::ProviderUnavailable(format!(
            "{} responded {}",
            provider, status
        )));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        if let NotFoundMeans::UnknownPayment(id) = not_found {
            return Err(ServiceError::OrderNotFound(id.to_string()));
        }
    }
    if !status.is_success() {
        let detail = String::from_utf8_lossy(&body).chars().take(2000).collect::<String>();
        warn!(provider, status = %status, detail = %detail, "provider rejected request");
        return Err(ServiceError::provider_rejected(
            format!("{} responded {}", provider, status),
            Some(detail),
        ));
    }

    let raw: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        ServiceError::provider_rejected(
            format!("{} returned an unreadable body", provider),
            Some(e.to_string()),
        )
    })?;
    let typed = serde_json::from_value(raw.clone()).map_err(|e| {
        ServiceError::provider_rejected(
            format!("{} returned an unexpected schema", provider),
            Some(e.to_string()),
        )
    })?;
    Ok((typed, raw))
}

/// Recovers the submission and plan a checkout stored in provider metadata.
/// Values may arrive as JSON strings or as already-decoded objects.
pub(crate) fn submission_from_metadata(
    metadata: Option<&serde_json::Map<String, serde_json::Value>>,
) -> (Option<crate::dto::PageSubmission>, Option<PlanType>) {
    let Some(metadata) = metadata else {
        return (None, None);
    };

    let submission = metadata
        .get(METADATA_SUBMISSION_KEY)
        .and_then(|value| match value {
            serde_json::Value::String(raw) => crate::dto::PageSubmission::from_metadata(raw).ok(),
            other => serde_json::from_value(other.clone()).ok(),
        });
    let plan = metadata
        .get(METADATA_PLAN_KEY)
        .and_then(|value| value.as_str())
        .and_then(|raw| raw.parse().ok());

    if metadata.contains_key(METADATA_SUBMISSION_KEY) && submission.is_none() {
        warn!("provider metadata carries an unreadable page submission");
    }
    (submission, plan)
}
