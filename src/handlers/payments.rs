use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::{error, info};

use crate::dto::{
    CreatePaymentRequest, CreatePaymentResponse, PageView, PaymentStatus, PaymentStatusResponse,
};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::gateways::validate_payment_id;
use crate::services::PublicationOutcome;

/// Create a checkout for a page
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePaymentRequest,
    responses(
        (status = 201, description = "Checkout created; redirect the buyer or show the PIX code", body = CreatePaymentResponse,
            headers(
                ("X-Request-Id" = String, description = "Unique request identifier"),
            )
        ),
        (status = 400, description = "Invalid submission or customer contact", body = crate::errors::ErrorResponse),
        (status = 413, description = "Page submission too large for provider metadata", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider refused the order", body = crate::errors::ErrorResponse),
        (status = 503, description = "Provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), ServiceError> {
    let outcome = state.checkout.create_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(CreatePaymentResponse::from(outcome))))
}

/// Poll the status of a payment
///
/// A published local record answers directly. Otherwise the provider is
/// asked, and a paid payment is published on the spot.
#[utoipa::path(
    get,
    path = "/api/v1/payments/{payment_id}/status",
    params(
        ("payment_id" = String, Path, description = "Provider payment or order id")
    ),
    responses(
        (status = 200, description = "Payment status", body = PaymentStatusResponse),
        (status = 400, description = "Malformed payment id", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment", body = crate::errors::ErrorResponse),
        (status = 503, description = "Provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>, ServiceError> {
    validate_payment_id(&payment_id)?;
    if let Some(record) = state.pages.find_by_payment_id(&payment_id).await? {
        if record.is_published() {
            return Ok(Json(PaymentStatusResponse {
                success: true,
                status: PaymentStatus::Paid,
                record: Some(PageView::from(record)),
            }));
        }
    }

    let event = state.resolver.fetch(&payment_id).await?;
    let record = if event.status == PaymentStatus::Paid {
        match state.publication.publish_paid(&event).await {
            Ok(PublicationOutcome::InProgress(_)) => None,
            Ok(outcome) => Some(PageView::from(outcome.into_record())),
            Err(e) => {
                // the payment is still paid; the next poll or webhook retries
                error!(payment_id = %payment_id, error = %e, "publication from status poll failed");
                None
            }
        }
    } else {
        info!(payment_id = %payment_id, status = %event.status, "payment not paid yet");
        None
    };

    Ok(Json(PaymentStatusResponse {
        success: true,
        status: event.status,
        record,
    }))
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/webhook", post(super::payment_webhooks::payment_webhook))
        .route("/payments/:payment_id/status", get(payment_status))
}
