use std::time::Duration;

use assert_matches::assert_matches;
use gift_fulfillment::{
    vendor::{
        FulfillmentVendor, HttpVendorClient, VendorError, VendorOrderRequest, VendorProduct,
        VendorShippingAddress,
    },
    webhooks::callback_urls,
};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;
use wiremock::{
    matchers::{header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client(server: &MockServer) -> HttpVendorClient {
    HttpVendorClient::new(server.uri(), Some("vendor-key".into()), Duration::from_secs(5))
        .expect("client builds")
}

fn sample_request() -> VendorOrderRequest {
    let order_id = Uuid::new_v4();
    VendorOrderRequest {
        idempotency_key: order_id.to_string(),
        retailer: "amazon".into(),
        products: vec![VendorProduct {
            product_id: "B0TESTASIN".into(),
            quantity: 1,
        }],
        max_price: 12_000,
        shipping_address: VendorShippingAddress {
            first_name: "Alex".into(),
            last_name: "Morgan".into(),
            address_line1: "1 Main St".into(),
            address_line2: String::new(),
            zip_code: "62701".into(),
            city: "Springfield".into(),
            state: "IL".into(),
            country: "US".into(),
            phone_number: "555-0100".into(),
        },
        shipping_method: "cheapest".into(),
        is_gift: true,
        gift_message: Some("Happy birthday! - From Jamie".into()),
        webhooks: callback_urls("https://gifts.example.com", order_id, "token"),
        client_notes: json!({ "order_id": order_id }),
    }
}

#[tokio::test]
async fn accepted_order_returns_request_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "request_id": "abc123" })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server).submit_order(&sample_request()).await.unwrap();
    assert_eq!(response.request_id, "abc123");
}

#[tokio::test]
async fn unprocessable_reply_keeps_vendor_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "invalid address" })),
        )
        .mount(&server)
        .await;

    let err = client(&server).submit_order(&sample_request()).await.unwrap_err();
    assert_matches!(
        err,
        VendorError::Rejected { status: 422, ref message, .. } if message == "invalid address"
    );
    assert_eq!(err.raw_body(), Some(&json!({ "message": "invalid address" })));
}

#[tokio::test]
async fn typed_error_body_is_a_rejection_even_with_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_type": "error",
            "code": "invalid_quantity",
            "data": { "message": "quantity too large" }
        })))
        .mount(&server)
        .await;

    let err = client(&server).submit_order(&sample_request()).await.unwrap_err();
    assert_matches!(err, VendorError::Rejected { status: 422, .. });
}

#[tokio::test]
async fn server_error_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server).submit_order(&sample_request()).await.unwrap_err();
    assert_matches!(err, VendorError::Unavailable { ref message, .. } if message == "maintenance");
}

#[tokio::test]
async fn accepted_reply_without_request_id_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "status": "queued" })))
        .mount(&server)
        .await;

    let err = client(&server).submit_order(&sample_request()).await.unwrap_err();
    assert_matches!(err, VendorError::InvalidResponse(_));
}

#[tokio::test]
async fn balance_is_converted_from_cents() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/addax/balance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "balance": 123456 })))
        .mount(&server)
        .await;

    let balance = client(&server).fetch_balance().await.unwrap();
    assert_eq!(balance, Decimal::new(123456, 2));
}

#[tokio::test]
async fn slow_vendor_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/addax/balance"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "balance": 100 }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client = HttpVendorClient::new(server.uri(), Some("k".into()), Duration::from_millis(200))
        .unwrap();
    let err = client.fetch_balance().await.unwrap_err();
    assert_matches!(err, VendorError::Timeout);
}
