use axum::{routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::qr::qr_data_url;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct QrCodeRequest {
    /// Text or URL to encode
    #[validate(length(min = 1, max = 2048))]
    #[schema(example = "https://daylove.app/pages/3f1c7d0e-8a7b-4b8e-9a57-0d3c5f1e2a10")]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QrCodeResponse {
    pub success: bool,
    /// `data:image/svg+xml;base64,...`
    pub data_url: String,
}

/// Render a QR code
#[utoipa::path(
    post,
    path = "/api/v1/qrcode",
    request_body = QrCodeRequest,
    responses(
        (status = 200, description = "QR code as SVG data URL", body = QrCodeResponse),
        (status = 400, description = "Empty or oversized text", body = crate::errors::ErrorResponse)
    ),
    tag = "Pages"
)]
pub async fn generate_qr_code(
    Json(request): Json<QrCodeRequest>,
) -> Result<Json<QrCodeResponse>, ServiceError> {
    request.validate()?;
    let data_url = qr_data_url(&request.text)?;
    Ok(Json(QrCodeResponse {
        success: true,
        data_url,
    }))
}

pub fn qrcode_routes() -> Router<AppState> {
    Router::new().route("/qrcode", post(generate_qr_code))
}
