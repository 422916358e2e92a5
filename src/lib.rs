//! DayLove API Library
//!
//! Checkout, webhook verification, payment status resolution and
//! exactly-once publication of DayLove pages.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod dto;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::repositories::{PageRepository, PageStore};
use crate::services::assets::{asset_store_from_config, AssetStore};
use crate::services::gateways::{gateway_from_config, PaymentGateway};
use crate::services::notifications::{dispatcher_from_config, NotificationDispatcher};
use crate::services::{
    CheckoutService, PaymentStatusResolver, PublicationService, PublicationSettings,
};
use crate::webhooks::WebhookVerifier;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub pages: Arc<dyn PageStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub checkout: CheckoutService,
    pub resolver: PaymentStatusResolver,
    pub publication: PublicationService,
    pub verifier: WebhookVerifier,
}

/// Collaborators that differ between production wiring and tests.
pub struct AppComponents {
    pub pages: Arc<dyn PageStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub assets: Arc<dyn AssetStore>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl AppState {
    pub fn new(
        config: config::AppConfig,
        db: Arc<DatabaseConnection>,
        components: AppComponents,
    ) -> Self {
        let AppComponents {
            pages,
            gateway,
            assets,
            notifier,
        } = components;

        let checkout = CheckoutService::from_config(gateway.clone(), &config);
        let resolver = PaymentStatusResolver::new(gateway.clone(), config.status_strategy());
        let publication = PublicationService::new(
            pages.clone(),
            assets,
            notifier,
            PublicationSettings::from(&config),
        );
        let verifier = WebhookVerifier::from_config(&config, gateway.signature_header());

        Self {
            db,
            config,
            pages,
            gateway,
            checkout,
            resolver,
            publication,
            verifier,
        }
    }

    /// Wires the configured provider, asset store and email API around a
    /// database-backed page store.
    pub fn from_config(
        config: config::AppConfig,
        db: Arc<DatabaseConnection>,
    ) -> Result<Self, errors::ServiceError> {
        let components = AppComponents {
            pages: Arc::new(PageRepository::new(db.clone())),
            gateway: gateway_from_config(&config)?,
            assets: asset_store_from_config(&config)?,
            notifier: dispatcher_from_config(&config)?,
        };
        Ok(Self::new(config, db, components))
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!meta.timestamp.is_empty());
    }
}

// API v1 routes
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::payments::payment_routes())
        .merge(handlers::pages::page_routes())
        .merge(handlers::qrcode::qrcode_routes())
}

/// Full application router without the outer CORS/compression layers.
pub fn app_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_size;
    Router::<AppState>::new()
        .route("/status", get(handlers::health::api_status))
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
