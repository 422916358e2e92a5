use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use tracing::{error, info};

use crate::dto::{PaymentStatus, WebhookAck};
use crate::errors::ServiceError;
use crate::handlers::AppState;

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Delivery authenticated; `success` reports processing", body = WebhookAck),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ServiceError> {
    // signature covers the exact received bytes, so verify before parsing
    state.verifier.verify(&headers, &body)?;
    let notification = state.gateway.parse_notification(&body)?;
    info!(
        provider = state.gateway.provider(),
        event_type = notification.event_type(),
        payment_id = ?notification.payment_id(),
        "payment webhook received"
    );

    let success = match state.resolver.resolve_notification(&notification).await {
        Ok(Some(event)) if event.status == PaymentStatus::Paid => {
            match state.publication.publish_paid(&event).await {
                Ok(_) => true,
                Err(e) => {
                    error!(payment_id = %event.payment_id, error = %e, "webhook publication failed");
                    false
                }
            }
        }
        Ok(Some(event)) => {
            info!(payment_id = %event.payment_id, status = %event.status, "payment not paid, nothing to publish");
            true
        }
        Ok(None) => true,
        Err(e) => {
            error!(error = %e, "could not resolve webhook payment");
            false
        }
    };

    // always 200 once authenticated so the provider does not hammer us
    Ok(Json(WebhookAck { success }))
}
