use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::StatusStrategy;
use crate::dto::PaymentEvent;
use crate::errors::ServiceError;
use crate::services::gateways::{PaymentGateway, WebhookNotification};

/// Produces the authoritative [`PaymentEvent`] for a payment id.
#[derive(Clone)]
pub struct PaymentStatusResolver {
    gateway: Arc<dyn PaymentGateway>,
    strategy: StatusStrategy,
}

impl PaymentStatusResolver {
    pub fn new(gateway: Arc<dyn PaymentGateway>, strategy: StatusStrategy) -> Self {
        Self { gateway, strategy }
    }

    pub fn strategy(&self) -> StatusStrategy {
        self.strategy
    }

    /// Resolves a verified webhook. Returns `None` for notifications about
    /// resources we do not act on.
    #[instrument(skip(self, notification), fields(event_type = %notification.event_type(), strategy = %self.strategy))]
    pub async fn resolve_notification(
        &self,
        notification: &WebhookNotification,
    ) -> Result<Option<PaymentEvent>, ServiceError> {
        let Some(payment_id) = notification.payment_id() else {
            debug!("notification carries no payment, nothing to resolve");
            return Ok(None);
        };

        if self.strategy == StatusStrategy::TrustWebhook {
            if let Some(event) = self.gateway.embedded_event(notification)? {
                debug!(payment_id = %event.payment_id, status = %event.status, "using embedded payment record");
                return Ok(Some(event));
            }
        }

        // the webhook's own status claim is discarded here
        self.fetch(payment_id).await.map(Some)
    }

    /// Reads the payment from the provider. Used by status polling
    /// regardless of the configured strategy.
    #[instrument(skip(self))]
    pub async fn fetch(&self, payment_id: &str) -> Result<PaymentEvent, ServiceError> {
        let event = self.gateway.fetch_payment(payment_id).await?;
        info!(payment_id, status = %event.status, provider = self.gateway.provider(), "payment status resolved");
        Ok(event)
    }
}
