#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use bytes::Bytes;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use daylove_api::{
    app_router,
    config::AppConfig,
    db,
    dto::{Animation, DateDisplay, MusicKind, MusicReference, PageSubmission, PlanType},
    errors::ServiceError,
    repositories::{PageRepository, PageStore},
    services::{
        assets::{AssetStore, InMemoryAssetStore},
        gateways::{GatewaySettings, PagarmeGateway, PaymentGateway},
        notifications::{NotificationDispatcher, PageSummary},
    },
    webhooks::SignatureGenerator,
    AppComponents, AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const PUBLIC_BASE_URL: &str = "https://daylove.test";

/// One email the recording dispatcher was asked to send.
#[derive(Clone, Debug, PartialEq)]
pub enum SentEmail {
    PageCreated {
        recipient: String,
        page_url: String,
        summary: PageSummary,
    },
    PaymentConfirmation {
        recipient: String,
        summary: PageSummary,
    },
}

impl SentEmail {
    pub fn recipient(&self) -> &str {
        match self {
            SentEmail::PageCreated { recipient, .. }
            | SentEmail::PaymentConfirmation { recipient, .. } => recipient,
        }
    }
}

/// Records every email instead of delivering it.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentEmail>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn page_created_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|email| matches!(email, SentEmail::PageCreated { .. }))
            .count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send_page_created_email(
        &self,
        recipient: &str,
        page_url: &str,
        summary: &PageSummary,
    ) -> bool {
        self.sent.lock().unwrap().push(SentEmail::PageCreated {
            recipient: recipient.to_string(),
            page_url: page_url.to_string(),
            summary: summary.clone(),
        });
        true
    }

    async fn send_payment_confirmation_email(
        &self,
        recipient: &str,
        summary: &PageSummary,
    ) -> bool {
        self.sent.lock().unwrap().push(SentEmail::PaymentConfirmation {
            recipient: recipient.to_string(),
            summary: summary.clone(),
        });
        true
    }
}

/// Asset store whose uploads always fail.
pub struct FailingAssetStore;

#[async_trait]
impl AssetStore for FailingAssetStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        _bytes: Bytes,
    ) -> Result<String, ServiceError> {
        Err(ServiceError::AssetUploadFailed(format!(
            "{}/{}: storage offline",
            bucket, key
        )))
    }
}

pub fn test_config(provider_url: &str) -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.cors_allow_any_origin = true;
    cfg.public_base_url = PUBLIC_BASE_URL.to_string();
    cfg.payment_provider = "pagarme".to_string();
    cfg.payment_api_key = Some("sk_test_integration".to_string());
    cfg.payment_api_base_url = Some(provider_url.to_string());
    cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg.provider_timeout_secs = 2;
    cfg
}

/// Router backed by an in-memory SQLite database and a wiremock provider.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub config: AppConfig,
    pub pages: Arc<dyn PageStore>,
    pub assets: Arc<InMemoryAssetStore>,
    pub mailer: Arc<RecordingDispatcher>,
    pub provider: MockServer,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let provider = MockServer::start().await;
        let mut cfg = test_config(&provider.uri());
        adjust(&mut cfg);

        let pool = db::establish_connection(&cfg.database_url)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let gateway = PagarmeGateway::new(GatewaySettings::from(&cfg))
            .expect("pagarme gateway for tests");
        let pages: Arc<dyn PageStore> = Arc::new(PageRepository::new(db_arc.clone()));
        let assets = Arc::new(InMemoryAssetStore::new());
        let mailer = Arc::new(RecordingDispatcher::default());

        let state = AppState::new(
            cfg.clone(),
            db_arc,
            AppComponents {
                pages: pages.clone(),
                gateway: Arc::new(gateway) as Arc<dyn PaymentGateway>,
                assets: assets.clone(),
                notifier: mailer.clone(),
            },
        );

        Self {
            router: app_router(state.clone()),
            state,
            config: cfg,
            pages,
            assets,
            mailer,
            provider,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts raw bytes to the webhook endpoint with an optional signature.
    pub async fn deliver_webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-hub-signature", signature);
        }

        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    /// Signs and delivers a webhook the way the provider does.
    pub async fn deliver_signed_webhook(&self, payload: &[u8]) -> Response {
        let signature = format!("sha256={}", SignatureGenerator::new(WEBHOOK_SECRET).sign(payload));
        self.deliver_webhook(payload, Some(&signature)).await
    }

    /// Serves `order` for `GET /orders/{id}`.
    pub async fn provider_serves_order(&self, order: &Value) {
        let id = order["id"].as_str().expect("order fixture carries an id");
        Mock::given(method("GET"))
            .and(path(format!("/orders/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(order))
            .mount(&self.provider)
            .await;
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// A fully loaded submission: eight photos, music and an animation.
pub fn rich_submission(title: &str) -> PageSubmission {
    PageSubmission {
        title: title.to_string(),
        start_date: NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
        message: "Feliz aniversário de namoro".to_string(),
        photos: (1..=8)
            .map(|i| format!("https://cdn.daylove.test/p{}.jpg", i))
            .collect(),
        music: Some(MusicReference {
            kind: MusicKind::Youtube,
            source: "dQw4w9WgXcQ".to_string(),
            title: "Nossa música".to_string(),
        }),
        animation: Animation::Hearts,
        date_display: DateDisplay::Counter,
    }
}

/// Provider order as Pagar.me returns it, carrying our metadata.
pub fn pagarme_order(
    id: &str,
    status: &str,
    email: &str,
    submission: &PageSubmission,
    plan: PlanType,
) -> Value {
    json!({
        "id": id,
        "code": format!("dl_{}", id),
        "status": status,
        "customer": { "name": "Ana Souza", "email": email },
        "metadata": {
            "submission": submission.to_metadata().expect("submission serializes"),
            "plan_type": plan.to_string(),
        },
        "charges": [{
            "id": format!("ch_{}", id),
            "status": status,
            "payment_method": "credit_card"
        }],
        "checkouts": []
    })
}

/// `order.<status>` webhook body wrapping `order`.
pub fn order_webhook(order: &Value) -> Vec<u8> {
    let status = order["status"].as_str().unwrap_or("paid");
    serde_json::to_vec(&json!({
        "id": "hook_1",
        "type": format!("order.{}", status),
        "data": order,
    }))
    .expect("webhook body serializes")
}
