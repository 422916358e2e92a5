use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "DayLove API",
        version = "1.0.0",
        description = r#"
# DayLove API

Checkout, webhook and publication backend for DayLove personalized pages.

## Flow

1. `POST /api/v1/payments` creates a provider checkout carrying the page submission.
2. The buyer pays on the hosted checkout or with the returned PIX code.
3. The provider calls `POST /api/v1/payments/webhook`, or the browser polls
   `GET /api/v1/payments/{payment_id}/status`.
4. The first confirmed payment publishes the page exactly once and emails the
   customer a link and QR code.

## Webhook authentication

Deliveries are signed with HMAC-SHA256 over the raw body using the shared
webhook secret. The hex digest is sent in the provider's signature header
(`X-Hub-Signature` for Pagar.me, `x-signature` for Mercado Pago); a
`sha256=` prefix or a `v1=` component are accepted.

## Error Handling

```json
{
  "error": "Unauthorized",
  "message": "Unauthenticated: webhook signature mismatch",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development")
    ),
    tags(
        (name = "Payments", description = "Checkout, webhook and status endpoints"),
        (name = "Pages", description = "Published pages and QR codes"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Payments
        crate::handlers::payments::create_payment,
        crate::handlers::payments::payment_status,

        // Webhooks
        crate::handlers::payment_webhooks::payment_webhook,

        // Pages
        crate::handlers::pages::get_page,
        crate::handlers::qrcode::generate_qr_code,

        // Health
        crate::handlers::health::health_check,
        crate::handlers::health::api_status,
    ),
    components(
        schemas(
            // Common types
            crate::ApiResponse<serde_json::Value>,

            // Page types
            crate::dto::PageSubmission,
            crate::dto::PageView,
            crate::dto::MusicReference,
            crate::dto::MusicKind,
            crate::dto::Animation,
            crate::dto::DateDisplay,
            crate::dto::PlanType,

            // Payment types
            crate::dto::CreatePaymentRequest,
            crate::dto::CreatePaymentResponse,
            crate::dto::CustomerContact,
            crate::dto::PaymentMethod,
            crate::dto::PaymentStatus,
            crate::dto::PaymentStatusResponse,
            crate::dto::PixInstrument,
            crate::dto::WebhookAck,

            // QR code
            crate::handlers::qrcode::QrCodeRequest,
            crate::handlers::qrcode::QrCodeResponse,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
