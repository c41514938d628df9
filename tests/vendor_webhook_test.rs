mod common;

use axum::http::StatusCode;
use common::{body_json, OrderSeed, TestApp};
use gift_fulfillment::{
    entities::{funding_reservation::ReservationState, OrderStatus},
    services::{fulfillment_pipeline::FulfillmentOutcome, order_state::Trigger},
};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

/// Submits a fresh order and returns its id with the issued webhook token.
async fn submitted_order(app: &TestApp) -> (Uuid, String) {
    let user = app.seed_profile(None, None).await;
    let order_id = app.seed_order(OrderSeed::paid(user)).await;
    app.state
        .services
        .pipeline
        .process(order_id, Trigger::PaymentConfirmed)
        .await
        .expect("submission succeeds");
    let token = app
        .load_order(order_id)
        .await
        .webhook_token
        .expect("token issued");
    (order_id, token)
}

fn hook_uri(order_id: Uuid, event: &str, token: &str) -> String {
    format!("/api/v1/webhooks/vendor/{}/{}?token={}", order_id, event, token)
}

#[tokio::test]
async fn request_succeeded_settles_funding_and_records_vendor_order() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;
    let before = app.state.services.pipeline.ledger().snapshot().await.unwrap();

    let response = app
        .post(
            &hook_uri(order_id, "request_succeeded", &token),
            Some(json!({ "merchant_order_ids": [{ "merchant_order_id": "112-7654321" }] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["event"], "request_succeeded");
    assert_eq!(body["data"]["status"], "completed");

    let order = app.load_order(order_id).await;
    assert_eq!(order.vendor_order_id.as_deref(), Some("112-7654321"));

    let ledger = app.state.services.pipeline.ledger();
    let reservation = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::Settled);
    let after = ledger.snapshot().await.unwrap();
    assert_eq!(after.in_flight, Decimal::ZERO);
    assert_eq!(after.balance, before.balance - reservation.amount);
}

#[tokio::test]
async fn request_failed_parks_submitted_order() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;

    let response = app
        .post(
            &hook_uri(order_id, "request_failed", &token),
            Some(json!({ "_type": "error", "code": "product_unavailable", "message": "Product is out of stock" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.load_order(order_id).await;
    assert_eq!(order.status, OrderStatus::RequiresAttention);
    assert_eq!(order.last_error.as_deref(), Some("Product is out of stock"));
    let reservation = app
        .state
        .services
        .pipeline
        .ledger()
        .reservation(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.state, ReservationState::Released);
}

#[tokio::test]
async fn failed_vendor_request_can_be_forced_again() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;
    assert_eq!(app.vendor.submit_calls(), 1);

    app.post(
        &hook_uri(order_id, "request_failed", &token),
        Some(json!({ "_type": "error", "code": "product_unavailable", "message": "Product is out of stock" })),
    )
    .await;

    let parked = app.load_order(order_id).await;
    assert_eq!(parked.status, OrderStatus::RequiresAttention);
    assert_eq!(parked.vendor_request_id, None);
    let notes = app.notes(order_id).await;
    let audit = notes.last().unwrap();
    assert_eq!(
        audit.details.as_ref().unwrap()["failed_vendor_request_id"],
        json!("req-1")
    );

    let outcome = app
        .state
        .services
        .pipeline
        .process(order_id, Trigger::ManualForce { bypass_funding_check: false })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        FulfillmentOutcome::Submitted {
            vendor_request_id: "req-2".to_string()
        }
    );
    assert_eq!(app.vendor.submit_calls(), 2);

    let order = app.load_order(order_id).await;
    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.vendor_request_id.as_deref(), Some("req-2"));
    let reservation = app
        .state
        .services
        .pipeline
        .ledger()
        .reservation(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reservation.state, ReservationState::InFlight);
}

#[tokio::test]
async fn failed_vendor_request_is_not_redriven_by_payment_trigger() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;
    app.post(&hook_uri(order_id, "request_failed", &token), Some(json!({})))
        .await;

    let result = app
        .state
        .services
        .pipeline
        .process(order_id, Trigger::PaymentConfirmed)
        .await;
    assert!(matches!(result, Err(gift_fulfillment::errors::ServiceError::InvalidStatus(_))));
    assert_eq!(app.vendor.submit_calls(), 1);
}

#[tokio::test]
async fn tracking_events_merge_without_duplicates() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;

    let first = json!({ "tracking": [{ "carrier": "UPS", "tracking_number": "1Z999" }] });
    app.post(&hook_uri(order_id, "tracking_obtained", &token), Some(first))
        .await;
    let second = json!({ "tracking": [
        { "carrier": "UPS", "tracking_number": "1Z999" },
        { "carrier": "USPS", "tracking_number": "9400" }
    ] });
    let response = app
        .post(&hook_uri(order_id, "tracking_updated", &token), Some(second))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.load_order(order_id).await;
    let tracking = order.tracking_numbers.unwrap();
    assert_eq!(tracking.as_array().unwrap().len(), 2);
    assert_eq!(order.status, OrderStatus::Completed);
}

#[tokio::test]
async fn status_update_is_only_noted() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;
    let notes_before = app.notes(order_id).await.len();

    let response = app
        .post(
            &hook_uri(order_id, "status_updated", &token),
            Some(json!({ "status": "shipped" })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let notes = app.notes(order_id).await;
    assert_eq!(notes.len(), notes_before + 1);
    assert!(notes.last().unwrap().note.contains("shipped"));
    assert_eq!(app.load_order(order_id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn wrong_token_is_unauthorized() {
    let app = TestApp::new().await;
    let (order_id, _) = submitted_order(&app).await;

    let response = app
        .post(&hook_uri(order_id, "request_failed", "forged"), Some(json!({})))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.load_order(order_id).await.status, OrderStatus::Completed);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = TestApp::new().await;
    let (order_id, _) = submitted_order(&app).await;

    let response = app
        .post(
            &format!("/api/v1/webhooks/vendor/{}/request_failed", order_id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_event_is_bad_request() {
    let app = TestApp::new().await;
    let (order_id, token) = submitted_order(&app).await;

    let response = app
        .post(&hook_uri(order_id, "order_exploded", &token), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .post(&hook_uri(Uuid::new_v4(), "tracking_obtained", "anything"), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn order_without_token_rejects_every_callback() {
    let app = TestApp::new().await;
    let user = app.seed_profile(None, None).await;
    let order_id = app.seed_order(OrderSeed::paid(user)).await;

    let response = app
        .post(&hook_uri(order_id, "request_succeeded", "guess"), None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
