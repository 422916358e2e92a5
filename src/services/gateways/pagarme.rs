use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::{
    read_provider_response, resource_url, submission_from_metadata, validate_payment_id,
    CheckoutOrder, GatewaySettings, NotFoundMeans, PaymentGateway, WebhookNotification,
    METADATA_PLAN_KEY, METADATA_SUBMISSION_KEY,
};
use crate::dto::payment::DocumentKind;
use crate::dto::{CheckoutOutcome, PaymentEvent, PaymentMethod, PaymentStatus, PixInstrument};
use crate::errors::ServiceError;

const PROVIDER: &str = "pagarme";
const DEFAULT_BASE_URL: &str = "https://api.pagar.me/core/v5";
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Pagar.me v5 order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub charges: Vec<Charge>,
    #[serde(default)]
    pub checkouts: Vec<Checkout>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Charge {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub last_transaction: Option<Transaction>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub qr_code_url: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub gateway_response: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkout {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub payment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeEventData {
    #[serde(flatten)]
    charge: Charge,
    order: OrderRef,
}

#[derive(Debug, Deserialize)]
struct OrderRef {
    id: String,
}

/// Order status table.
pub fn map_order_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "pending" | "processing" => Some(PaymentStatus::Pending),
        "paid" => Some(PaymentStatus::Paid),
        "failed" => Some(PaymentStatus::Failed),
        "canceled" => Some(PaymentStatus::Canceled),
        _ => None,
    }
}

/// Charge status table, used when an order carries no status.
pub fn map_charge_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "pending" | "processing" | "underpaid" => Some(PaymentStatus::Pending),
        "paid" | "overpaid" => Some(PaymentStatus::Paid),
        "failed" => Some(PaymentStatus::Failed),
        "canceled" | "chargedback" => Some(PaymentStatus::Canceled),
        _ => None,
    }
}

fn order_status(order: &Order) -> Result<PaymentStatus, ServiceError> {
    if let Some(status) = order.status.as_deref() {
        return map_order_status(status).ok_or_else(|| {
            error!(provider = PROVIDER, order_id = %order.id, status, "unmapped order status");
            ServiceError::UnknownStatus(format!("pagarme order status '{}'", status))
        });
    }
    let charge_status = order
        .charges
        .first()
        .and_then(|charge| charge.status.as_deref())
        .ok_or_else(|| {
            ServiceError::UnknownStatus(format!("pagarme order {} carries no status", order.id))
        })?;
    map_charge_status(charge_status).ok_or_else(|| {
        error!(provider = PROVIDER, order_id = %order.id, status = charge_status, "unmapped charge status");
        ServiceError::UnknownStatus(format!("pagarme charge status '{}'", charge_status))
    })
}

/// Normalizes an order into a payment event.
pub fn order_to_event(order: &Order, raw: serde_json::Value) -> Result<PaymentEvent, ServiceError> {
    let status = order_status(order)?;
    let (submission, plan) = submission_from_metadata(order.metadata.as_ref());
    Ok(PaymentEvent {
        payment_id: order.id.clone(),
        status,
        customer_email: order.customer.as_ref().and_then(|c| c.email.clone()),
        submission,
        plan,
        raw,
    })
}

/// Pagar.me v5 client: hosted checkout for cards, direct PIX charges.
pub struct PagarmeGateway {
    client: reqwest::Client,
    settings: GatewaySettings,
    base_url: String,
}

impl PagarmeGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, ServiceError> {
        let base_url = settings
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client: settings.http_client()?,
            settings,
            base_url,
        })
    }

    fn order_body(&self, order: &CheckoutOrder) -> serde_json::Value {
        let customer = &order.customer;
        let (document_type, customer_type) = match customer.document_kind {
            DocumentKind::Individual => ("CPF", "individual"),
            DocumentKind::Company => ("CNPJ", "company"),
        };

        let payment = match order.method {
            PaymentMethod::CreditCard => json!({
                "payment_method": "checkout",
                "checkout": {
                    "expires_in": self.settings.pix_expires_in_secs,
                    "accepted_payment_methods": ["credit_card"],
                    "success_url": format!("{}/payment/success", self.settings.public_base_url),
                    "skip_checkout_success_page": true,
                    "customer_editable": false,
                    "billing_address_editable": false,
                    "credit_card": {
                        "installments": [{ "number": 1, "total": order.amount_cents }]
                    }
                }
            }),
            PaymentMethod::Pix => json!({
                "payment_method": "pix",
                "pix": { "expires_in": self.settings.pix_expires_in_secs }
            }),
        };

        json!({
            "code": order.reference,
            "customer": {
                "name": customer.name,
                "email": customer.email,
                "document": customer.document,
                "document_type": document_type,
                "type": customer_type,
                "phones": {
                    "mobile_phone": {
                        "country_code": customer.phone.country_code,
                        "area_code": customer.phone.area_code,
                        "number": customer.phone.number,
                    }
                }
            },
            "items": [{
                "amount": order.amount_cents,
                "description": order.description(),
                "quantity": 1,
                "code": order.plan.to_string(),
            }],
            "payments": [payment],
            "metadata": {
                METADATA_SUBMISSION_KEY: order.metadata,
                METADATA_PLAN_KEY: order.plan.to_string(),
            }
        })
    }
}

fn checkout_outcome(method: PaymentMethod, order: &Order) -> Result<CheckoutOutcome, ServiceError> {
    match method {
        PaymentMethod::CreditCard => {
            let url = order
                .checkouts
                .iter()
                .find_map(|checkout| checkout.payment_url.clone())
                .ok_or_else(|| {
                    ServiceError::provider_rejected(
                        "pagarme order has no checkout payment_url",
                        None,
                    )
                })?;
            Ok(CheckoutOutcome::Redirect {
                payment_id: order.id.clone(),
                url,
            })
        }
        PaymentMethod::Pix => {
            let charge = order.charges.first().ok_or_else(|| {
                ServiceError::provider_rejected("pagarme order has no PIX charge", None)
            })?;
            if charge.status.as_deref() == Some("failed") {
                let detail = charge
                    .last_transaction
                    .as_ref()
                    .and_then(|t| t.gateway_response.as_ref())
                    .map(|r| r.to_string());
                return Err(ServiceError::provider_rejected(
                    "pagarme refused the PIX charge",
                    detail,
                ));
            }
            let transaction = charge.last_transaction.as_ref().ok_or_else(|| {
                ServiceError::provider_rejected("pagarme PIX charge has no transaction", None)
            })?;
            match (&transaction.qr_code, &transaction.qr_code_url) {
                (Some(code), Some(key)) => Ok(CheckoutOutcome::Pix {
                    payment_id: order.id.clone(),
                    instrument: PixInstrument {
                        code: code.clone(),
                        key: key.clone(),
                        expires_at: transaction.expires_at,
                    },
                }),
                _ => Err(ServiceError::provider_rejected(
                    "pagarme PIX transaction is missing qr_code",
                    None,
                )),
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for PagarmeGateway {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    #[instrument(skip(self, order), fields(reference = %order.reference, method = %order.method))]
    async fn create_checkout(&self, order: CheckoutOrder) -> Result<CheckoutOutcome, ServiceError> {
        let api_key = self.settings.require_api_key(PROVIDER)?;
        let body = self.order_body(&order);

        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(api_key, Some(""))
            .json(&body)
            .send()
            .await?;
        let (created, _raw): (Order, _) =
            read_provider_response(PROVIDER, response, NotFoundMeans::Rejection).await?;

        info!(order_id = %created.id, status = ?created.status, "pagarme order created");
        checkout_outcome(order.method, &created)
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentEvent, ServiceError> {
        validate_payment_id(payment_id)?;
        let api_key = self.settings.require_api_key(PROVIDER)?;
        let url = resource_url(&self.base_url, &["orders", payment_id])?;
        let response = self
            .client
            .get(url)
            .basic_auth(api_key, Some(""))
            .send()
            .await?;
        let (order, raw): (Order, _) = read_provider_response(
            PROVIDER,
            response,
            NotFoundMeans::UnknownPayment(payment_id),
        )
        .await?;
        debug!(order_id = %order.id, status = ?order.status, "pagarme order fetched");
        order_to_event(&order, raw)
    }

    fn parse_notification(&self, body: &[u8]) -> Result<WebhookNotification, ServiceError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| ServiceError::BadRequest(format!("invalid pagarme webhook: {}", e)))?;

        let family = envelope.event_type.split('.').next().unwrap_or_default();
        match family {
            "order" => {
                let order: Order = serde_json::from_value(envelope.data.clone()).map_err(|e| {
                    ServiceError::BadRequest(format!("invalid pagarme order payload: {}", e))
                })?;
                Ok(WebhookNotification::PagarmeOrder {
                    event_type: envelope.event_type,
                    order: Box::new(order),
                    raw: envelope.data,
                })
            }
            "charge" => {
                let data: ChargeEventData = serde_json::from_value(envelope.data).map_err(|e| {
                    ServiceError::BadRequest(format!("invalid pagarme charge payload: {}", e))
                })?;
                Ok(WebhookNotification::PagarmeCharge {
                    event_type: envelope.event_type,
                    order_id: data.order.id,
                    charge: data.charge,
                })
            }
            _ => {
                debug!(event_type = %envelope.event_type, "ignoring pagarme event");
                Ok(WebhookNotification::Ignored {
                    event_type: envelope.event_type,
                })
            }
        }
    }

    fn embedded_event(
        &self,
        notification: &WebhookNotification,
    ) -> Result<Option<PaymentEvent>, ServiceError> {
        match notification {
            WebhookNotification::PagarmeOrder { order, raw, .. } => {
                order_to_event(order, raw.clone()).map(Some)
            }
            WebhookNotification::PagarmeCharge { order_id, charge, .. } => {
                // charge events carry no order metadata
                warn!(order_id = %order_id, charge_status = ?charge.status, "charge event needs refetch");
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}
