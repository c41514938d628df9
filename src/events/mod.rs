use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Domain events emitted by the fulfillment pipeline and webhook intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderClaimed {
        order_id: Uuid,
        trigger: String,
    },
    OrderSubmitted {
        order_id: Uuid,
        vendor_request_id: String,
    },
    OrderDeferred {
        order_id: Uuid,
        expected_funding_date: DateTime<Utc>,
        scheduled_delivery_date: DateTime<Utc>,
    },
    OrderRequiresAttention {
        order_id: Uuid,
        reason: String,
    },
    OrderFailed {
        order_id: Uuid,
        error: String,
    },
    FundingSettled {
        order_id: Uuid,
        amount: Decimal,
    },
    FundingReleased {
        order_id: Uuid,
        amount: Decimal,
    },
    VendorWebhookReceived {
        order_id: Uuid,
        event: String,
    },
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderClaimed { order_id, .. }
            | Event::OrderSubmitted { order_id, .. }
            | Event::OrderDeferred { order_id, .. }
            | Event::OrderRequiresAttention { order_id, .. }
            | Event::OrderFailed { order_id, .. }
            | Event::FundingSettled { order_id, .. }
            | Event::FundingReleased { order_id, .. }
            | Event::VendorWebhookReceived { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and the sender half wrapped for the services.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Emits without waiting. A full or closed channel drops the event with a warning.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping event: {}", e);
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Default handler: structured log line per event.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        match event {
            Event::OrderSubmitted {
                order_id,
                vendor_request_id,
            } => info!(order_id = %order_id, vendor_request_id = %vendor_request_id, "Order submitted to vendor"),
            Event::OrderDeferred {
                order_id,
                expected_funding_date,
                ..
            } => info!(order_id = %order_id, expected_funding_date = %expected_funding_date, "Order deferred for funding"),
            Event::OrderRequiresAttention { order_id, reason } => {
                warn!(order_id = %order_id, reason = %reason, "Order requires attention")
            }
            Event::OrderFailed { order_id, error } => {
                error!(order_id = %order_id, error = %error, "Order failed")
            }
            other => debug!(order_id = %other.order_id(), event = ?other, "Fulfillment event"),
        }
        Ok(())
    }
}

/// Drains the channel, fanning every event out to each handler in turn.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(
                    "Failed to handle event: order_id={}, error={}",
                    event.order_id(),
                    e
                );
            }
        }
    }

    warn!("Event processing loop has ended");
}
