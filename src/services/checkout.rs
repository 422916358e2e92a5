use metrics::counter;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::dto::{CheckoutOutcome, CreatePaymentRequest, PlanType};
use crate::errors::ServiceError;
use crate::services::gateways::{CheckoutOrder, PaymentGateway};

/// Converts a decimal price to integer minor units, rounding half away
/// from zero (29.905 becomes 2991).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount {} out of range", amount)))
}

/// Plan prices, taken from configuration only.
#[derive(Clone, Debug)]
pub struct PriceList {
    pub forever: Decimal,
    pub annual: Decimal,
    pub currency: String,
}

impl PriceList {
    pub fn price(&self, plan: PlanType) -> Decimal {
        match plan {
            PlanType::Forever => self.forever,
            PlanType::Annual => self.annual,
        }
    }
}

impl From<&AppConfig> for PriceList {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            forever: cfg.price_forever,
            annual: cfg.price_annual,
            currency: cfg.currency.clone(),
        }
    }
}

/// Opens checkouts with the configured provider.
#[derive(Clone)]
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    prices: PriceList,
    metadata_max_bytes: usize,
}

impl CheckoutService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, prices: PriceList, metadata_max_bytes: usize) -> Self {
        Self {
            gateway,
            prices,
            metadata_max_bytes,
        }
    }

    pub fn from_config(gateway: Arc<dyn PaymentGateway>, cfg: &AppConfig) -> Self {
        Self::new(gateway, PriceList::from(cfg), cfg.metadata_max_bytes)
    }

    /// Validates the request and creates the provider order. The buyer is
    /// sent to the returned redirect URL or shown the PIX instrument.
    #[instrument(skip(self, request), fields(plan = %request.plan, method = %request.payment_method))]
    pub async fn create_checkout(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<CheckoutOutcome, ServiceError> {
        request.validate()?;
        let customer = request.customer.normalize()?;

        // only what the plan will publish travels through the provider
        let metadata = request
            .submission
            .clone()
            .restricted_to(request.plan)
            .to_metadata()?;
        if metadata.len() > self.metadata_max_bytes {
            error!(
                size = metadata.len(),
                limit = self.metadata_max_bytes,
                "page submission exceeds provider metadata limit"
            );
            return Err(ServiceError::PayloadTooLarge(format!(
                "page submission is {} bytes, limit is {}",
                metadata.len(),
                self.metadata_max_bytes
            )));
        }

        let amount = self.prices.price(request.plan);
        let order = CheckoutOrder {
            reference: format!("dl_{}", Uuid::new_v4().simple()),
            plan: request.plan,
            amount_cents: to_minor_units(amount)?,
            amount,
            currency: self.prices.currency.clone(),
            customer,
            method: request.payment_method,
            metadata,
        };

        let provider = self.gateway.provider();
        match self.gateway.create_checkout(order).await {
            Ok(outcome) => {
                counter!("daylove_checkouts_total", 1, "provider" => provider, "result" => "created");
                info!(payment_id = %outcome.payment_id(), provider, "checkout created");
                Ok(outcome)
            }
            Err(e) => {
                counter!("daylove_checkouts_total", 1, "provider" => provider, "result" => "failed");
                Err(e)
            }
        }
    }
}
