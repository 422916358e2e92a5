use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument};

use super::{
    read_provider_response, resource_url, submission_from_metadata, validate_payment_id,
    CheckoutOrder, GatewaySettings, NotFoundMeans, PaymentGateway, WebhookNotification,
    METADATA_PLAN_KEY, METADATA_SUBMISSION_KEY,
};
use crate::dto::payment::DocumentKind;
use crate::dto::{CheckoutOutcome, PaymentEvent, PaymentMethod, PaymentStatus, PixInstrument};
use crate::errors::ServiceError;

const PROVIDER: &str = "mercadopago";
const DEFAULT_BASE_URL: &str = "https://api.mercadopago.com";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Mercado Pago sends numeric ids; we key everything on strings.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub payer: Option<Payer>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub date_of_expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payer {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointOfInteraction {
    #[serde(default)]
    pub transaction_data: Option<TransactionData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionData {
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub ticket_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
struct Preference {
    id: String,
    init_point: Option<String>,
}

/// Either the current `{type, action, data.id}` shape or the legacy
/// `{topic, resource}` feed.
#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    data: Option<NotificationData>,
    #[serde(default)]
    resource: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
}

/// Payment status table.
pub fn map_payment_status(status: &str) -> Option<PaymentStatus> {
    match status {
        "pending" | "authorized" | "in_process" | "in_mediation" => Some(PaymentStatus::Pending),
        "approved" => Some(PaymentStatus::Paid),
        "rejected" => Some(PaymentStatus::Failed),
        "cancelled" | "refunded" | "charged_back" => Some(PaymentStatus::Canceled),
        _ => None,
    }
}

pub fn payment_to_event(
    payment: &Payment,
    raw: serde_json::Value,
) -> Result<PaymentEvent, ServiceError> {
    let status = map_payment_status(&payment.status).ok_or_else(|| {
        error!(provider = PROVIDER, payment_id = %payment.id, status = %payment.status, "unmapped payment status");
        ServiceError::UnknownStatus(format!("mercadopago payment status '{}'", payment.status))
    })?;
    let (submission, plan) = submission_from_metadata(payment.metadata.as_ref());
    Ok(PaymentEvent {
        payment_id: payment.id.clone(),
        status,
        customer_email: payment.payer.as_ref().and_then(|p| p.email.clone()),
        submission,
        plan,
        raw,
    })
}

/// Mercado Pago client: checkout preferences for cards, direct PIX payments.
pub struct MercadoPagoGateway {
    client: reqwest::Client,
    settings: GatewaySettings,
    base_url: String,
}

impl MercadoPagoGateway {
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

    fn metadata(order: &CheckoutOrder) -> serde_json::Value {
        json!({
            METADATA_SUBMISSION_KEY: order.metadata,
            METADATA_PLAN_KEY: order.plan.to_string(),
        })
    }

    fn identification(order: &CheckoutOrder) -> serde_json::Value {
        let kind = match order.customer.document_kind {
            DocumentKind::Individual => "CPF",
            DocumentKind::Company => "CNPJ",
        };
        json!({ "type": kind, "number": order.customer.document })
    }

    async fn create_preference(
        &self,
        api_key: &str,
        order: &CheckoutOrder,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let unit_price = order.amount.to_f64().ok_or_else(|| {
            ServiceError::InternalError(format!("price {} is not representable", order.amount))
        })?;
        let base = &self.settings.public_base_url;
        let body = json!({
            "items": [{
                "id": order.plan.to_string(),
                "title": order.description(),
                "quantity": 1,
                "unit_price": unit_price,
                "currency_id": order.currency,
            }],
            "payer": {
                "name": order.customer.name,
                "email": order.customer.email,
                "identification": Self::identification(order),
                "phone": {
                    "area_code": order.customer.phone.area_code,
                    "number": order.customer.phone.number,
                }
            },
            "metadata": Self::metadata(order),
            "back_urls": {
                "success": format!("{}/payment/success", base),
                "failure": format!("{}/payment/failure", base),
                "pending": format!("{}/payment/pending", base),
            },
            "auto_return": "approved",
            "external_reference": order.reference,
            "payment_methods": { "installments": 1 },
        });

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let (preference, _raw): (Preference, _) =
            read_provider_response(PROVIDER, response, NotFoundMeans::Rejection).await?;

        let url = preference.init_point.ok_or_else(|| {
            ServiceError::provider_rejected("mercadopago preference has no init_point", None)
        })?;
        info!(preference_id = %preference.id, "mercadopago preference created");
        Ok(CheckoutOutcome::Redirect {
            payment_id: preference.id,
            url,
        })
    }

    async fn create_pix_payment(
        &self,
        api_key: &str,
        order: &CheckoutOrder,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let amount = order.amount.to_f64().ok_or_else(|| {
            ServiceError::InternalError(format!("price {} is not representable", order.amount))
        })?;
        let expires_in = i64::try_from(self.settings.pix_expires_in_secs).unwrap_or(i64::MAX);
        let expires_at = Utc::now() + ChronoDuration::seconds(expires_in.min(86_400 * 30));
        let body = json!({
            "transaction_amount": amount,
            "description": order.description(),
            "payment_method_id": "pix",
            "external_reference": order.reference,
            "payer": {
                "email": order.customer.email,
                "first_name": order.customer.name,
                "identification": Self::identification(order),
            },
            "metadata": Self::metadata(order),
            "date_of_expiration": expires_at.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
        });

        let response = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(api_key)
            .header("X-Idempotency-Key", &order.reference)
            .json(&body)
            .send()
            .await?;
        let (payment, _raw): (Payment, _) =
            read_provider_response(PROVIDER, response, NotFoundMeans::Rejection).await?;

        if payment.status == "rejected" {
            return Err(ServiceError::provider_rejected(
                "mercadopago rejected the PIX payment",
                payment.status_detail.clone(),
            ));
        }
        let data = payment
            .point_of_interaction
            .as_ref()
            .and_then(|poi| poi.transaction_data.as_ref());
        match data {
            Some(TransactionData {
                qr_code: Some(code),
                ticket_url: Some(key),
            }) => {
                info!(payment_id = %payment.id, "mercadopago PIX payment created");
                Ok(CheckoutOutcome::Pix {
                    payment_id: payment.id.clone(),
                    instrument: PixInstrument {
                        code: code.clone(),
                        key: key.clone(),
                        expires_at: payment.date_of_expiration.or(Some(expires_at)),
                    },
                })
            }
            _ => Err(ServiceError::provider_rejected(
                "mercadopago PIX payment has no transaction data",
                None,
            )),
        }
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    #[instrument(skip(self, order), fields(reference = %order.reference, method = %order.method))]
    async fn create_checkout(&self, order: CheckoutOrder) -> Result<CheckoutOutcome, ServiceError> {
        let api_key = self.settings.require_api_key(PROVIDER)?;
        match order.method {
            PaymentMethod::CreditCard => self.create_preference(api_key, &order).await,
            PaymentMethod::Pix => self.create_pix_payment(api_key, &order).await,
        }
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentEvent, ServiceError> {
        validate_payment_id(payment_id)?;
        let api_key = self.settings.require_api_key(PROVIDER)?;
        let url = resource_url(&self.base_url, &["v1", "payments", payment_id])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(api_key)
            .send()
            .await?;
        let (payment, raw): (Payment, _) = read_provider_response(
            PROVIDER,
            response,
            NotFoundMeans::UnknownPayment(payment_id),
        )
        .await?;
        debug!(payment_id = %payment.id, status = %payment.status, "mercadopago payment fetched");
        payment_to_event(&payment, raw)
    }

    fn parse_notification(&self, body: &[u8]) -> Result<WebhookNotification, ServiceError> {
        let notification: Notification = serde_json::from_slice(body).map_err(|e| {
            ServiceError::BadRequest(format!("invalid mercadopago notification: {}", e))
        })?;

        let kind = notification
            .kind
            .clone()
            .or_else(|| notification.topic.clone())
            .unwrap_or_default();
        if kind != "payment" {
            debug!(kind = %kind, "ignoring mercadopago notification");
            return Ok(WebhookNotification::Ignored { event_type: kind });
        }

        let payment_id = match (notification.data, notification.resource) {
            (Some(data), _) => data.id,
            // legacy feed sends either the bare id or the resource URL
            (None, Some(resource)) => resource
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string(),
            (None, None) => String::new(),
        };
        if payment_id.is_empty() {
            return Err(ServiceError::BadRequest(
                "mercadopago notification carries no payment id".to_string(),
            ));
        }
        Ok(WebhookNotification::MercadoPagoPayment {
            action: notification.action,
            payment_id,
        })
    }

    fn embedded_event(
        &self,
        _notification: &WebhookNotification,
    ) -> Result<Option<PaymentEvent>, ServiceError> {
        // notifications only announce the id
        Ok(None)
    }
}
