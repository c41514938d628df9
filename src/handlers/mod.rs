pub mod auto_gifts;
pub mod fulfillment;
pub mod vendor_webhooks;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    message_queue::MessageQueue,
    rate_limiter::RateLimiter,
    services::{
        fulfillment_pipeline::{FulfillmentPipeline, PipelineDeps, PipelineSettings},
        fulfillment_submitter::{FulfillmentSubmitter, SubmitterSettings},
        funding_gate::FundingPolicy,
        funding_ledger::FundingLedger,
        notifications::NotificationService,
        order_state::OrderStateManager,
        wishlist::WishlistService,
    },
    vendor::FulfillmentVendor,
    webhooks::WebhookTokenSigner,
};
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by HTTP handlers and background workers.
#[derive(Clone)]
pub struct AppServices {
    pub pipeline: Arc<FulfillmentPipeline>,
    pub wishlist: WishlistService,
    pub notifications: NotificationService,
    pub message_queue: Arc<dyn MessageQueue>,
}

impl AppServices {
    /// Wires the fulfillment services from configuration.
    ///
    /// The vendor, queue and rate limiter are passed in so tests can
    /// substitute fakes and in-memory backends.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        vendor: Arc<dyn FulfillmentVendor>,
        event_sender: EventSender,
        message_queue: Arc<dyn MessageQueue>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let notifications = NotificationService::new(db_pool.clone());
        let state = OrderStateManager::new(db_pool.clone(), config.processing_claim_ttl());
        let ledger = FundingLedger::new(
            db_pool.clone(),
            config.funding_pool_id.clone(),
            FundingPolicy::from(config),
        )
        .with_in_flight_ttl(config.funding_in_flight_ttl());
        let submitter = FulfillmentSubmitter::new(vendor.clone(), SubmitterSettings::from(config));
        let balance_breaker = CircuitBreaker::new(
            "vendor_balance",
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failure_threshold,
                timeout: Duration::from_secs(config.circuit_breaker_timeout_secs),
                ..Default::default()
            },
        );

        let pipeline = FulfillmentPipeline::new(
            PipelineDeps {
                db: db_pool.clone(),
                state,
                ledger,
                submitter,
                vendor,
                balance_breaker,
                rate_limiter,
                notifications: notifications.clone(),
                queue: message_queue.clone(),
                events: event_sender,
                signer: WebhookTokenSigner::new(config.webhook_signing_secret.clone()),
            },
            PipelineSettings::from(config),
        );

        Self {
            pipeline: Arc::new(pipeline),
            wishlist: WishlistService::new(db_pool, notifications.clone()),
            notifications,
            message_queue,
        }
    }
}
