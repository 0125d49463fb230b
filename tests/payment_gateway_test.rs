//! Payment gateway client against a faked gateway: request signing,
//! response parsing, and the three-way error taxonomy
//! (configuration vs gateway rejection vs transport).

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use robux_shop_api::config::AppConfig;
use robux_shop_api::errors::ServiceError;
use robux_shop_api::services::payment_gateway::{
    CreateGatewayPayment, GatewayPaymentStatus, PaymentGatewayClient,
};

fn gateway_config(base_url: &str) -> AppConfig {
    serde_json::from_value(json!({
        "database_url": "sqlite::memory:",
        "host": "127.0.0.1",
        "environment": "development",
        "verification_signing_secret": "a-perfectly-reasonable-signing-secret-0123456789",
        "payment_gateway_base_url": base_url,
        "payment_gateway_api_key": "api-key",
        "payment_gateway_merchant_code": "M001",
        "payment_gateway_private_key": "private-key",
        "payment_gateway_callback_url": "https://shop.example/api/v1/payments/webhook",
        "payment_gateway_return_url": "https://shop.example/thanks",
        "payment_gateway_timeout_secs": 2,
    }))
    .expect("test config deserializes")
}

fn charge_request() -> CreateGatewayPayment {
    CreateGatewayPayment {
        transaction_id: Uuid::new_v4(),
        channel: "QRIS".into(),
        amount: dec!(63000),
        customer_name: "CoolSeller".into(),
        customer_email: Some("cool@example.com".into()),
        customer_phone: Some("+6281200000000".into()),
        item_name: "500 Robux".into(),
    }
}

#[tokio::test]
async fn create_payment_sends_signed_request_and_parses_references() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/create"))
        .and(header("authorization", "Bearer api-key"))
        .and(body_partial_json(json!({
            "method": "QRIS",
            "amount": 63000,
            "customer_name": "CoolSeller",
            "callback_url": "https://shop.example/api/v1/payments/webhook",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "",
            "data": {
                "reference": "T1234567890",
                "checkout_url": "https://gateway.example/checkout/T1234567890"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PaymentGatewayClient::from_config(&gateway_config(&server.uri())).unwrap();
    let session = client.create_payment(&charge_request()).await.unwrap();

    assert_eq!(session.reference, "T1234567890");
    assert_eq!(
        session.checkout_url,
        "https://gateway.example/checkout/T1234567890"
    );
    assert!(session.merchant_ref.starts_with("RBX-"));

    // The signature in the submitted body matches an HMAC recomputed
    // from the merchant reference the client generated
    let requests = server.received_requests().await.unwrap();
    let request: &Request = &requests[0];
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    let sent_signature = body["signature"].as_str().unwrap();
    let sent_merchant_ref = body["merchant_ref"].as_str().unwrap();
    assert_eq!(sent_merchant_ref, session.merchant_ref);
    assert_eq!(sent_signature, client.signature(sent_merchant_ref, 63000));
}

#[tokio::test]
async fn gateway_rejection_is_distinguished_from_transport_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "amount below channel minimum"
        })))
        .mount(&server)
        .await;

    let client = PaymentGatewayClient::from_config(&gateway_config(&server.uri())).unwrap();
    let err = client.create_payment(&charge_request()).await.unwrap_err();

    match err {
        ServiceError::GatewayRejected(message) => {
            assert!(message.contains("below channel minimum"));
        }
        other => panic!("expected GatewayRejected, got {:?}", other),
    }
}

#[tokio::test]
async fn non_2xx_is_an_external_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/create"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let client = PaymentGatewayClient::from_config(&gateway_config(&server.uri())).unwrap();
    let err = client.create_payment(&charge_request()).await.unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
}

#[tokio::test]
async fn non_json_success_is_an_external_service_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transaction/create"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login page</html>"))
        .mount(&server)
        .await;

    let client = PaymentGatewayClient::from_config(&gateway_config(&server.uri())).unwrap();
    let err = client.create_payment(&charge_request()).await.unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
}

#[tokio::test]
async fn status_check_maps_gateway_statuses() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/transaction/detail"))
        .and(query_param("reference", "T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "status": "PAID" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/transaction/detail"))
        .and(query_param("reference", "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "status": "SOMETHING_NEW" }
        })))
        .mount(&server)
        .await;

    let client = PaymentGatewayClient::from_config(&gateway_config(&server.uri())).unwrap();

    assert_eq!(
        client.check_status("T1").await.unwrap(),
        GatewayPaymentStatus::Paid
    );
    assert_eq!(
        client.check_status("T2").await.unwrap(),
        GatewayPaymentStatus::Unknown("SOMETHING_NEW".into())
    );
}

#[tokio::test]
async fn missing_configuration_is_fatal_before_any_request() {
    let mut cfg = gateway_config("https://gateway.example/api");
    cfg.payment_gateway_api_key = None;
    let err = PaymentGatewayClient::from_config(&cfg).unwrap_err();
    assert_matches!(err, ServiceError::ConfigurationError(_));
}
