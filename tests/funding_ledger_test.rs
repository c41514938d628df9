mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{OrderSeed, TestApp};
use gift_fulfillment::{
    entities::{funding_pool::DEFAULT_POOL_ID, funding_reservation::ReservationState},
    services::{
        funding_gate::{FundingDecision, FundingPolicy},
        funding_ledger::FundingLedger,
    },
};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

async fn app_with_order() -> (TestApp, Uuid) {
    let app = TestApp::new().await;
    let user = app.seed_profile(None, None).await;
    let order_id = app.seed_order(OrderSeed::paid(user)).await;
    (app, order_id)
}

#[tokio::test]
async fn approved_reservation_counts_against_later_orders() {
    let (app, first) = app_with_order().await;
    let user = app.seed_profile(None, None).await;
    let second = app.seed_order(OrderSeed::paid(user)).await;
    let ledger = app.state.services.pipeline.ledger();
    // 300 - 50 margin leaves 250: room for one 200 order (220 with buffer).
    ledger.refresh_balance(Decimal::from(300)).await.unwrap();

    let decision = ledger.reserve(first, Decimal::from(200), Utc::now()).await.unwrap();
    assert!(decision.is_proceed());

    let decision = ledger.reserve(second, Decimal::from(200), Utc::now()).await.unwrap();
    assert_matches!(decision, FundingDecision::Defer { available, .. } if available == Decimal::from(30));

    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.in_flight, Decimal::from(220));
    assert_eq!(snapshot.committed, Decimal::from(200));
}

#[tokio::test]
async fn redriven_order_does_not_count_against_itself() {
    let (app, order_id) = app_with_order().await;
    let ledger = app.state.services.pipeline.ledger();
    ledger.refresh_balance(Decimal::from(100)).await.unwrap();

    let deferred = ledger.reserve(order_id, Decimal::from(100), Utc::now()).await.unwrap();
    assert!(!deferred.is_proceed());

    ledger.refresh_balance(Decimal::from(1_000)).await.unwrap();
    let approved = ledger.reserve(order_id, Decimal::from(100), Utc::now()).await.unwrap();
    assert_matches!(approved, FundingDecision::Proceed { available, .. } if available == Decimal::from(950));

    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.committed, Decimal::ZERO);
    assert_eq!(snapshot.in_flight, Decimal::from(110));
}

#[tokio::test]
async fn release_and_settle_close_the_reservation_once() {
    let (app, order_id) = app_with_order().await;
    let ledger = app.state.services.pipeline.ledger();
    ledger.refresh_balance(Decimal::from(1_000)).await.unwrap();
    ledger.reserve(order_id, Decimal::from(100), Utc::now()).await.unwrap();

    assert_eq!(ledger.settle(order_id).await.unwrap(), Some(Decimal::from(110)));
    // Already closed: neither call moves money again.
    assert_eq!(ledger.settle(order_id).await.unwrap(), None);
    assert_eq!(ledger.release(order_id).await.unwrap(), None);

    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.balance, Decimal::from(890));
    assert_eq!(snapshot.in_flight, Decimal::ZERO);
    let reservation = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::Settled);
}

#[tokio::test]
async fn committed_hold_is_released_not_settled() {
    let (app, order_id) = app_with_order().await;
    let ledger = app.state.services.pipeline.ledger();
    ledger.refresh_balance(Decimal::ZERO).await.unwrap();
    ledger.reserve(order_id, Decimal::from(100), Utc::now()).await.unwrap();

    assert_eq!(ledger.settle(order_id).await.unwrap(), None);
    assert_eq!(ledger.release(order_id).await.unwrap(), Some(Decimal::from(100)));
    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.committed, Decimal::ZERO);
    assert_eq!(snapshot.balance, Decimal::ZERO);
}

#[tokio::test]
async fn unchecked_hold_ignores_shortfall() {
    let (app, order_id) = app_with_order().await;
    let ledger = app.state.services.pipeline.ledger();
    ledger.refresh_balance(Decimal::ZERO).await.unwrap();

    let held = ledger.reserve_unchecked(order_id, Decimal::from(100)).await.unwrap();
    assert_eq!(held, Decimal::from(110));
    let reservation = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::InFlight);
}

#[tokio::test]
async fn refreshed_balance_does_not_count_charged_holds_twice() {
    let (app, first) = app_with_order().await;
    let user = app.seed_profile(None, None).await;
    let second = app.seed_order(OrderSeed::paid(user)).await;
    // Every approved hold counts as charged by the next balance read.
    let ledger = FundingLedger::new(app.state.db.clone(), DEFAULT_POOL_ID, FundingPolicy::default())
        .with_in_flight_ttl(Duration::ZERO);

    ledger.refresh_balance(Decimal::from(1_000)).await.unwrap();
    let decision = ledger.reserve(first, Decimal::from(500), Utc::now()).await.unwrap();
    assert!(decision.is_proceed());
    assert_eq!(ledger.snapshot().await.unwrap().in_flight, Decimal::from(550));

    // The vendor charged the first order; its balance already reflects it.
    let settled = ledger.refresh_balance(Decimal::from(500)).await.unwrap();
    assert_eq!(settled, Decimal::from(550));
    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.balance, Decimal::from(500));
    assert_eq!(snapshot.in_flight, Decimal::ZERO);

    let decision = ledger.reserve(second, Decimal::from(100), Utc::now()).await.unwrap();
    assert_matches!(decision, FundingDecision::Proceed { available, .. } if available == Decimal::from(450));

    // A late success callback for the first order moves nothing.
    assert_eq!(ledger.settle(first).await.unwrap(), None);
    assert_eq!(ledger.snapshot().await.unwrap().balance, Decimal::from(500));
    let reservation = ledger.reservation(first).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::Settled);
}

#[tokio::test]
async fn recent_hold_survives_balance_refresh() {
    let (app, order_id) = app_with_order().await;
    let ledger = app.state.services.pipeline.ledger();
    ledger.refresh_balance(Decimal::from(1_000)).await.unwrap();
    ledger.reserve(order_id, Decimal::from(500), Utc::now()).await.unwrap();

    let settled = ledger.refresh_balance(Decimal::from(1_000)).await.unwrap();
    assert_eq!(settled, Decimal::ZERO);
    assert_eq!(ledger.snapshot().await.unwrap().in_flight, Decimal::from(550));
    let reservation = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::InFlight);
}

#[tokio::test]
async fn committed_holds_are_not_settled_by_refresh() {
    let (app, order_id) = app_with_order().await;
    let ledger = FundingLedger::new(app.state.db.clone(), DEFAULT_POOL_ID, FundingPolicy::default())
        .with_in_flight_ttl(Duration::ZERO);
    ledger.refresh_balance(Decimal::ZERO).await.unwrap();
    ledger.reserve(order_id, Decimal::from(100), Utc::now()).await.unwrap();

    assert_eq!(ledger.refresh_balance(Decimal::from(20)).await.unwrap(), Decimal::ZERO);
    let snapshot = ledger.snapshot().await.unwrap();
    assert_eq!(snapshot.committed, Decimal::from(100));
    let reservation = ledger.reservation(order_id).await.unwrap().unwrap();
    assert_eq!(reservation.state, ReservationState::Committed);
}
