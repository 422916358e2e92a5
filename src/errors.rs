use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Simplified error structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unauthorized",
    "message": "Unauthenticated: webhook signature mismatch",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Internal Server Error")
    #[schema(example = "Unauthorized")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Unauthenticated: webhook signature mismatch")]
    pub message: String,
    /// Additional error details (provider error payloads, validation errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Required credentials or settings are missing.
    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    /// The payment provider refused the request.
    #[error("Provider rejected request: {message}")]
    ProviderRejected {
        message: String,
        detail: Option<String>,
    },

    /// Network failure, timeout or provider-side outage.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The provider does not know the payment/order id.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Unknown provider status: {0}")]
    UnknownStatus(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Asset upload failed: {0}")]
    AssetUploadFailed(String),

    #[error("Publication failed for payment {payment_id}: {source}")]
    PublicationFailed {
        payment_id: String,
        #[source]
        source: Box<ServiceError>,
    },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::SerializationError(err.to_string())
        } else {
            // connect, timeout and body errors are all transient from our side
            ServiceError::ProviderUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Wraps a pipeline failure, keeping the originating cause.
    pub fn publication_failed(payment_id: impl Into<String>, cause: ServiceError) -> Self {
        ServiceError::PublicationFailed {
            payment_id: payment_id.into(),
            source: Box::new(cause),
        }
    }

    pub fn provider_rejected(message: impl Into<String>, detail: Option<String>) -> Self {
        ServiceError::ProviderRejected {
            message: message.into(),
            detail,
        }
    }

    /// The innermost cause of a publication failure, or the error itself.
    pub fn root_cause(&self) -> &ServiceError {
        match self {
            ServiceError::PublicationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether a caller may retry the whole operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_)
                | Self::ProviderRejected { .. }
                | Self::AssetUploadFailed(_)
                | Self::PublicationFailed { .. }
                | Self::DatabaseError(_)
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::BadRequest(_) | Self::InvalidStatus(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ProviderRejected { .. } | Self::UnknownStatus(_) | Self::AssetUploadFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Misconfigured(_)
            | Self::PublicationFailed { .. }
            | Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::Misconfigured(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::ProviderUnavailable(_) => {
                "Payment provider temporarily unavailable, please try again".to_string()
            }
            Self::PublicationFailed { .. } => {
                "Page publication failed, it will be retried".to_string()
            }
            _ => self.to_string(),
        }
    }

    fn response_details(&self) -> Option<String> {
        match self {
            Self::ProviderRejected { detail, .. } => detail.clone(),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.response_details(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn provider_rejection_exposes_provider_detail() {
        let response = ServiceError::provider_rejected(
            "order creation refused",
            Some("customer.document: invalid".into()),
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.details.as_deref(), Some("customer.document: invalid"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::Unauthenticated("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::OrderNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::PayloadTooLarge("x".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ServiceError::ProviderUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::UnknownStatus("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::Misconfigured("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::publication_failed("pay_1", ServiceError::AssetUploadFailed("x".into()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::Misconfigured("PAGARME key missing".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::InternalError("boom".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Page not found".into()).response_message(),
            "Not found: Page not found"
        );
    }

    #[test]
    fn root_cause_unwraps_publication_failures() {
        let err = ServiceError::publication_failed(
            "pay_9",
            ServiceError::AssetUploadFailed("photo 2".into()),
        );
        assert!(matches!(err.root_cause(), ServiceError::AssetUploadFailed(_)));
        assert!(err.is_retryable());
        assert!(!ServiceError::UnknownStatus("weird".into()).is_retryable());
        assert!(!ServiceError::Unauthenticated("bad sig".into()).is_retryable());
    }
}
