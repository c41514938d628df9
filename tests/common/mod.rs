#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use gift_fulfillment::{
    app_router,
    config::AppConfig,
    db,
    entities::{
        customer_profile, order, order_note, wishlist_item, FundingStatus, OrderStatus,
        PaymentStatus,
    },
    events::{self, EventSender},
    handlers::AppServices,
    message_queue::{InMemoryMessageQueue, MessageQueue},
    rate_limiter::{RateLimitConfig, RateLimiter},
    vendor::{FulfillmentVendor, VendorError, VendorOrderRequest, VendorOrderResponse},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue::Set, EntityTrait};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "test-admin-token-0123456789";
pub const VALID_ASIN: &str = "B0TESTASIN";
pub const OTHER_ASIN: &str = "B0OTHERSKU";

/// Scripted stand-in for the purchasing vendor.
///
/// Submissions pop queued results and default to success with a generated
/// request id. `balance == None` makes the balance endpoint unavailable.
pub struct FakeVendor {
    submit_calls: AtomicUsize,
    balance_calls: AtomicUsize,
    submit_results: Mutex<VecDeque<Result<VendorOrderResponse, VendorError>>>,
    balance: Mutex<Option<Decimal>>,
    requests: Mutex<Vec<VendorOrderRequest>>,
}

impl FakeVendor {
    pub fn with_balance(balance: Decimal) -> Self {
        Self {
            submit_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
            submit_results: Mutex::new(VecDeque::new()),
            balance: Mutex::new(Some(balance)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, balance: Option<Decimal>) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn push_submit_result(&self, result: Result<VendorOrderResponse, VendorError>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<VendorOrderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl FulfillmentVendor for FakeVendor {
    async fn submit_order(
        &self,
        request: &VendorOrderRequest,
    ) -> Result<VendorOrderResponse, VendorError> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(request.clone());
        let scripted = self.submit_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(VendorOrderResponse {
                request_id: format!("req-{}", n),
            })
        })
    }

    async fn fetch_balance(&self) -> Result<Decimal, VendorError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        let balance = *self.balance.lock().unwrap();
        balance.ok_or_else(|| VendorError::Unavailable {
            message: "balance endpoint down".to_string(),
            body: None,
        })
    }
}

/// Application wired against in-memory SQLite, an in-memory queue and a
/// [`FakeVendor`].
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub vendor: Arc<FakeVendor>,
    pub queue: Arc<InMemoryMessageQueue>,
    _event_task: tokio::task::JoinHandle<()>,
}

pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new("sqlite::memory:", "test");
    // One connection keeps every query on the same in-memory database.
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.admin_api_token = Some(ADMIN_TOKEN.to_string());
    cfg.ops_notification_email = Some("ops@example.com".to_string());
    cfg.webhook_base_url = "https://gifts.example.com".to_string();
    cfg
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(test_config(), FakeVendor::with_balance(Decimal::from(10_000))).await
    }

    pub async fn with_vendor(vendor: FakeVendor) -> Self {
        Self::build(test_config(), vendor).await
    }

    pub async fn build(cfg: AppConfig, vendor: FakeVendor) -> Self {
        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx, Vec::new()));

        let vendor = Arc::new(vendor);
        let queue = Arc::new(InMemoryMessageQueue::new());
        let rate_limiter = Arc::new(
            RateLimiter::in_memory(RateLimitConfig {
                requests_per_window: cfg.rate_limit_submissions_per_window,
                window_duration: Duration::from_secs(cfg.rate_limit_window_seconds),
            })
            .expect("valid rate limit config"),
        );

        let services = AppServices::new(
            db_arc.clone(),
            &cfg,
            vendor.clone() as Arc<dyn FulfillmentVendor>,
            event_sender.clone(),
            queue.clone() as Arc<dyn MessageQueue>,
            rate_limiter,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: app_router(state.clone()),
            state,
            vendor,
            queue,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

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

    pub async fn post(&self, uri: &str, body: Option<Value>) -> Response {
        self.request(Method::POST, uri, body, &[]).await
    }

    pub async fn post_admin(&self, uri: &str, body: Option<Value>) -> Response {
        self.request(Method::POST, uri, body, &[("x-admin-token", ADMIN_TOKEN)])
            .await
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.request(Method::GET, uri, None, &[]).await
    }

    pub async fn load_order(&self, id: Uuid) -> order::Model {
        self.state
            .services
            .pipeline
            .state()
            .load(id)
            .await
            .expect("order exists")
    }

    pub async fn notes(&self, id: Uuid) -> Vec<order_note::Model> {
        self.state
            .services
            .pipeline
            .state()
            .notes(id)
            .await
            .expect("notes load")
    }

    pub async fn seed_profile(&self, email: Option<&str>, phone: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        customer_profile::Entity::insert(customer_profile::ActiveModel {
            id: Set(id),
            display_name: Set(Some("Jamie Rivera".to_string())),
            email: Set(email.map(str::to_string)),
            phone: Set(phone.map(str::to_string)),
            created_at: Set(Utc::now()),
        })
        .exec_without_returning(&*self.state.db)
        .await
        .expect("seed profile");
        id
    }

    pub async fn seed_order(&self, seed: OrderSeed) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        order::Entity::insert(order::ActiveModel {
            id: Set(id),
            order_number: Set(format!("GIFT-{}", &id.simple().to_string()[..8])),
            user_id: Set(seed.user_id),
            status: Set(seed.status),
            payment_status: Set(seed.payment_status),
            funding_status: Set(seed.funding_status),
            total_amount: Set(seed.total_amount),
            currency: Set("USD".to_string()),
            line_items: Set(seed.line_items),
            shipping_address: Set(seed.shipping_address),
            is_gift: Set(true),
            gift_message: Set(Some("Happy birthday!".to_string())),
            vendor_request_id: Set(seed.vendor_request_id),
            vendor_order_id: Set(None),
            vendor_error: Set(None),
            last_error: Set(None),
            funding_hold_reason: Set(None),
            expected_funding_date: Set(seed.expected_funding_date),
            scheduled_delivery_date: Set(None),
            webhook_token: Set(None),
            tracking_numbers: Set(None),
            processing_started_at: Set(seed.processing_started_at),
            submitted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            version: Set(1),
        })
        .exec_without_returning(&*self.state.db)
        .await
        .expect("seed order");
        id
    }

    pub async fn seed_wishlist_item(&self, owner_id: Uuid, product_id: &str, is_public: bool) -> Uuid {
        let id = Uuid::new_v4();
        wishlist_item::Entity::insert(wishlist_item::ActiveModel {
            id: Set(id),
            owner_id: Set(owner_id),
            product_id: Set(product_id.to_string()),
            title: Set(Some("Ceramic pour-over set".to_string())),
            is_public: Set(is_public),
            purchased_at: Set(None),
            purchased_by_order_id: Set(None),
            created_at: Set(Utc::now()),
        })
        .exec_without_returning(&*self.state.db)
        .await
        .expect("seed wishlist item");
        id
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Order row fields that tests vary; everything else gets a fixed default.
pub struct OrderSeed {
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub funding_status: FundingStatus,
    pub total_amount: Decimal,
    pub line_items: Value,
    pub shipping_address: Option<Value>,
    pub vendor_request_id: Option<String>,
    pub expected_funding_date: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
}

impl OrderSeed {
    /// A paid gift for one valid product shipped to a complete flat address.
    pub fn paid(user_id: Uuid) -> Self {
        Self {
            user_id,
            status: OrderStatus::PendingPayment,
            payment_status: PaymentStatus::Paid,
            funding_status: FundingStatus::None,
            total_amount: Decimal::from(100),
            line_items: json!([{ "product_id": VALID_ASIN, "quantity": 1, "price": 100 }]),
            shipping_address: Some(complete_address()),
            vendor_request_id: None,
            expected_funding_date: None,
            processing_started_at: None,
        }
    }
}

pub fn complete_address() -> Value {
    json!({
        "name": "Alex Morgan",
        "address_line1": "1 Main St",
        "city": "Springfield",
        "state": "IL",
        "zip_code": "62701",
        "phone": "555-0100"
    })
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
