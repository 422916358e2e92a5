//! Mercado Pago client behavior against a mocked API.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use wiremock::{
    matchers::{header, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

use daylove_api::{
    dto::{CheckoutOutcome, CreatePaymentRequest, PaymentStatus, PlanType},
    errors::ServiceError,
    services::{
        checkout::PriceList,
        gateways::{GatewaySettings, MercadoPagoGateway, PaymentGateway},
        CheckoutService,
    },
};

fn gateway(server: &MockServer) -> MercadoPagoGateway {
    MercadoPagoGateway::new(GatewaySettings {
        api_key: Some("APP_USR-test".to_string()),
        base_url: Some(server.uri()),
        timeout: Duration::from_secs(2),
        pix_expires_in_secs: 3600,
        public_base_url: "https://daylove.test".to_string(),
    })
    .expect("gateway builds")
}

fn checkout(server: &MockServer) -> CheckoutService {
    CheckoutService::new(
        Arc::new(gateway(server)),
        PriceList {
            forever: dec!(29.90),
            annual: dec!(19.90),
            currency: "BRL".to_string(),
        },
        64 * 1024,
    )
}

fn request(payment_method: &str) -> CreatePaymentRequest {
    serde_json::from_value(json!({
        "submission": { "title": "A & B", "start_date": "2020-01-01" },
        "plan": "forever",
        "customer": {
            "name": "Ana Souza",
            "email": "ana@example.com",
            "document": "12.345.678/0001-95",
            "phone": "11987654321"
        },
        "payment_method": payment_method
    }))
    .expect("valid request")
}

#[tokio::test]
async fn card_checkout_uses_preference_init_point() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/preferences"))
        .and(header("authorization", "Bearer APP_USR-test"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "pref_123",
            "init_point": "https://www.mercadopago.com.br/checkout/v1/redirect?pref_id=pref_123"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = checkout(&server)
        .create_checkout(request("credit_card"))
        .await
        .unwrap();

    assert_matches!(
        outcome,
        CheckoutOutcome::Redirect { ref payment_id, ref url }
            if payment_id == "pref_123" && url.contains("pref_id=pref_123")
    );
    let sent: Value =
        serde_json::from_slice(&server.received_requests().await.unwrap()[0].body).unwrap();
    assert_eq!(sent["metadata"]["plan_type"], "forever");
    assert_eq!(sent["payer"]["identification"]["type"], "CNPJ");
}

#[tokio::test]
async fn pix_checkout_reads_point_of_interaction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .and(header_exists("x-idempotency-key"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 987654321u64,
            "status": "pending",
            "point_of_interaction": {
                "transaction_data": {
                    "qr_code": "00020126580014br.gov.bcb.pix",
                    "ticket_url": "https://www.mercadopago.com.br/payments/987654321/ticket"
                }
            }
        })))
        .mount(&server)
        .await;

    let outcome = checkout(&server).create_checkout(request("pix")).await.unwrap();

    let instrument = assert_matches!(
        outcome,
        CheckoutOutcome::Pix { payment_id, instrument } if payment_id == "987654321" => instrument
    );
    assert_eq!(instrument.code, "00020126580014br.gov.bcb.pix");
    assert!(instrument.expires_at.is_some());
    let sent: Value =
        serde_json::from_slice(&server.received_requests().await.unwrap()[0].body).unwrap();
    assert_eq!(sent["transaction_amount"], 29.9);
}

#[tokio::test]
async fn rejected_pix_payment_is_provider_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 1,
            "status": "rejected",
            "status_detail": "cc_rejected_other_reason"
        })))
        .mount(&server)
        .await;

    let err = checkout(&server)
        .create_checkout(request("pix"))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::ProviderRejected { detail: Some(ref d), .. } if d == "cc_rejected_other_reason"
    );
}

#[tokio::test]
async fn approved_payment_recovers_submission_from_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/555"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 555,
            "status": "approved",
            "payer": { "email": "ana@example.com" },
            "metadata": {
                "submission": "{\"title\":\"A & B\",\"start_date\":\"2020-01-01\"}",
                "plan_type": "annual"
            }
        })))
        .mount(&server)
        .await;

    let event = gateway(&server).fetch_payment("555").await.unwrap();

    assert_eq!(event.payment_id, "555");
    assert_eq!(event.status, PaymentStatus::Paid);
    assert_eq!(event.plan, Some(PlanType::Annual));
    assert_eq!(event.submission.unwrap().title, "A & B");
    assert_eq!(event.customer_email.as_deref(), Some("ana@example.com"));
}

#[tokio::test]
async fn fetch_failures_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/503"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/401"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid access token"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/odd"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "odd",
            "status": "partially_refunded_maybe"
        })))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    assert_matches!(
        gateway.fetch_payment("404").await,
        Err(ServiceError::OrderNotFound(id)) if id == "404"
    );
    assert_matches!(
        gateway.fetch_payment("503").await,
        Err(ServiceError::ProviderUnavailable(_))
    );
    assert_matches!(
        gateway.fetch_payment("401").await,
        Err(ServiceError::ProviderRejected { .. })
    );
    assert_matches!(
        gateway.fetch_payment("odd").await,
        Err(ServiceError::UnknownStatus(_))
    );
}

#[tokio::test]
async fn missing_access_token_is_misconfigured() {
    let server = MockServer::start().await;
    let gateway = MercadoPagoGateway::new(GatewaySettings {
        api_key: None,
        base_url: Some(server.uri()),
        timeout: Duration::from_secs(1),
        pix_expires_in_secs: 60,
        public_base_url: "https://daylove.test".to_string(),
    })
    .unwrap();

    assert_matches!(
        gateway.fetch_payment("1").await,
        Err(ServiceError::Misconfigured(_))
    );
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn malformed_payment_id_is_refused_before_any_request() {
    let server = MockServer::start().await;
    let gateway = gateway(&server);

    assert_matches!(
        gateway.fetch_payment("../v1/customers/1").await,
        Err(ServiceError::BadRequest(_))
    );
    assert_matches!(
        gateway.fetch_payment("1/refunds").await,
        Err(ServiceError::BadRequest(_))
    );
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
