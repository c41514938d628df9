//! Drives one order from a trigger to a recorded outcome.
//!
//! Caller errors (unknown order, unconfirmed payment) return before any
//! mutation. After the claim every path ends in a persisted state: data
//! problems park the order in `requires_attention`, funding shortfalls
//! defer it, and unexpected errors mark it `failed` before propagating.

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerError},
    config::AppConfig,
    db::DbPool,
    entities::{customer_profile::Entity as ProfileEntity, order, NoteKind, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    message_queue::{topics, Message, MessageQueue},
    metrics::{
        FULFILLMENT_ATTENTION, FULFILLMENT_DEFERRALS, FULFILLMENT_FAILURES,
        FULFILLMENT_RATE_LIMITED, FULFILLMENT_SUBMISSIONS, FUNDING_FAIL_OPEN,
        VENDOR_WEBHOOK_EVENTS,
    },
    rate_limiter::RateLimiter,
    services::{
        address_normalizer::{self, AddressInputs},
        fulfillment_submitter::{FulfillmentSubmitter, SubmissionContext},
        funding_gate::FundingDecision,
        funding_ledger::FundingLedger,
        line_items::{self, ExtractedItems},
        notifications::{event_types, NotificationService},
        order_state::{AttentionReason, ClaimOutcome, OrderStateManager, Trigger},
        wishlist::PurchaseCheck,
    },
    vendor::{error_message_from_body, FulfillmentVendor},
    webhooks::{VendorWebhookEvent, WebhookTokenSigner},
};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Result of one pipeline run that the caller can act on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FulfillmentOutcome {
    Submitted {
        vendor_request_id: String,
    },
    AlreadySubmitted {
        vendor_request_id: String,
    },
    Deferred {
        expected_funding_date: DateTime<Utc>,
        scheduled_delivery_date: DateTime<Utc>,
        reason: String,
    },
    RequiresAttention {
        reason: AttentionReason,
    },
    RateLimited {
        retry_after_secs: u64,
    },
}

impl FulfillmentOutcome {
    /// Whether the order is (now or already) with the vendor.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FulfillmentOutcome::Submitted { .. } | FulfillmentOutcome::AlreadySubmitted { .. }
        )
    }

    pub fn summary(&self) -> String {
        match self {
            FulfillmentOutcome::Submitted { vendor_request_id } => {
                format!("Order submitted to vendor ({})", vendor_request_id)
            }
            FulfillmentOutcome::AlreadySubmitted { vendor_request_id } => {
                format!("Order was already submitted ({})", vendor_request_id)
            }
            FulfillmentOutcome::Deferred { reason, .. } => reason.clone(),
            FulfillmentOutcome::RequiresAttention { reason } => reason.message(),
            FulfillmentOutcome::RateLimited { retry_after_secs } => format!(
                "Submission rate limit reached, retry in {}s",
                retry_after_secs
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RedriveResult {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FulfillmentOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookReceipt {
    pub order_id: Uuid,
    pub event: VendorWebhookEvent,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Proceed when the pool balance cannot be read.
    pub fail_open: bool,
    pub ops_notification_email: Option<String>,
    pub redrive_batch_size: u64,
    pub redrive_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fail_open: true,
            ops_notification_email: None,
            redrive_batch_size: 50,
            redrive_concurrency: 4,
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            fail_open: cfg.funding_fail_open,
            ops_notification_email: cfg.ops_notification_email.clone(),
            redrive_batch_size: cfg.redrive_batch_size,
            redrive_concurrency: cfg.redrive_concurrency.max(1),
        }
    }
}

enum FundingStep {
    Funded(String),
    Deferred(FulfillmentOutcome),
}

#[derive(Clone)]
pub struct FulfillmentPipeline {
    db: Arc<DbPool>,
    state: OrderStateManager,
    ledger: FundingLedger,
    submitter: FulfillmentSubmitter,
    vendor: Arc<dyn FulfillmentVendor>,
    balance_breaker: CircuitBreaker,
    rate_limiter: Arc<RateLimiter>,
    notifications: NotificationService,
    queue: Arc<dyn MessageQueue>,
    events: EventSender,
    signer: WebhookTokenSigner,
    settings: PipelineSettings,
}

/// Collaborators of [`FulfillmentPipeline`], grouped for construction.
pub struct PipelineDeps {
    pub db: Arc<DbPool>,
    pub state: OrderStateManager,
    pub ledger: FundingLedger,
    pub submitter: FulfillmentSubmitter,
    pub vendor: Arc<dyn FulfillmentVendor>,
    pub balance_breaker: CircuitBreaker,
    pub rate_limiter: Arc<RateLimiter>,
    pub notifications: NotificationService,
    pub queue: Arc<dyn MessageQueue>,
    pub events: EventSender,
    pub signer: WebhookTokenSigner,
}

pub fn rate_limit_key(user_id: Uuid) -> String {
    format!("user:{}:fulfillment", user_id)
}

impl FulfillmentPipeline {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            db: deps.db,
            state: deps.state,
            ledger: deps.ledger,
            submitter: deps.submitter,
            vendor: deps.vendor,
            balance_breaker: deps.balance_breaker,
            rate_limiter: deps.rate_limiter,
            notifications: deps.notifications,
            queue: deps.queue,
            events: deps.events,
            signer: deps.signer,
            settings,
        }
    }

    pub fn state(&self) -> &OrderStateManager {
        &self.state
    }

    pub fn ledger(&self) -> &FundingLedger {
        &self.ledger
    }

    #[instrument(skip(self), fields(order_id = %order_id, trigger = trigger.as_str()))]
    pub async fn process(
        &self,
        order_id: Uuid,
        trigger: Trigger,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let order = self.state.load(order_id).await?;

        if let Some(vendor_request_id) = order.vendor_request_id.clone() {
            info!(order_id = %order_id, "Order already submitted, skipping");
            return Ok(FulfillmentOutcome::AlreadySubmitted { vendor_request_id });
        }

        if trigger.requires_confirmed_payment() && !order.payment_status.is_confirmed() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} payment status is {}",
                order_id, order.payment_status
            )));
        }

        // Checked before the rate limiter so refused triggers cost no quota.
        if !self.state.is_claimable(&order, trigger, Utc::now()) {
            return Err(not_claimable(order_id, order.status, trigger));
        }

        if trigger.requires_confirmed_payment() {
            if let Some(outcome) = self.check_rate_limit(&order).await? {
                return Ok(outcome);
            }
        }

        let order = match self.state.claim(order_id, trigger).await? {
            ClaimOutcome::Claimed(order) => order,
            ClaimOutcome::AlreadySubmitted(vendor_request_id) => {
                return Ok(FulfillmentOutcome::AlreadySubmitted { vendor_request_id })
            }
            ClaimOutcome::NotClaimable(status) => {
                return Err(not_claimable(order_id, status, trigger))
            }
        };
        self.events.emit(Event::OrderClaimed {
            order_id,
            trigger: trigger.as_str().to_string(),
        });

        match self.run_claimed(&order, trigger).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.fail(order_id, &err).await;
                Err(err)
            }
        }
    }

    /// Blocked submissions leave the order untouched apart from a note.
    async fn check_rate_limit(
        &self,
        order: &order::Model,
    ) -> Result<Option<FulfillmentOutcome>, ServiceError> {
        let result = match self
            .rate_limiter
            .check_rate_limit(&rate_limit_key(order.user_id))
            .await
        {
            Ok(result) => result,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Rate limiter unavailable, allowing submission");
                return Ok(None);
            }
        };
        if result.allowed {
            return Ok(None);
        }

        let retry_after_secs = result.retry_after_secs();
        FULFILLMENT_RATE_LIMITED.inc();
        self.state
            .append_note(
                order.id,
                NoteKind::RateLimited,
                &format!(
                    "Submission blocked: {} submissions per window exceeded, retry in {}s",
                    result.limit, retry_after_secs
                ),
                Some(json!({"retry_after_secs": retry_after_secs, "limit": result.limit})),
            )
            .await?;
        warn!(order_id = %order.id, user_id = %order.user_id, "Fulfillment rate limited");
        Ok(Some(FulfillmentOutcome::RateLimited { retry_after_secs }))
    }

    async fn run_claimed(
        &self,
        order: &order::Model,
        trigger: Trigger,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        let items = match line_items::extract(&order.line_items) {
            Ok(items) => items,
            Err(e) => return self.park(order, e.into(), None).await,
        };

        let profile = ProfileEntity::find_by_id(order.user_id)
            .one(&*self.db)
            .await?;
        let recipient_override = items.recipient_override().map(|(_, address)| address);
        let recipient_phone = items
            .first_recipient()
            .and_then(|r| r.recipient_phone.as_deref());
        let normalized = match address_normalizer::normalize(AddressInputs {
            order_address: order.shipping_address.as_ref(),
            recipient_override,
            recipient_phone,
            profile_phone: profile.as_ref().and_then(|p| p.phone.as_deref()),
        }) {
            Ok(normalized) => normalized,
            Err(e) => return self.park(order, e.into(), None).await,
        };
        for warning in &normalized.warnings {
            self.state
                .append_note(order.id, NoteKind::Warning, warning, None)
                .await?;
        }

        let funding_note = match self.fund(order, &items, trigger).await? {
            FundingStep::Funded(note) => note,
            FundingStep::Deferred(outcome) => return Ok(outcome),
        };

        let token = self.signer.issue(order.id);
        let order = self
            .state
            .prepare_submission(order.id, token.clone(), &funding_note)
            .await?;

        let request = self.submitter.build_request(
            &order,
            SubmissionContext {
                items: &items,
                address: &normalized.address,
                purchaser_display_name: profile.as_ref().and_then(|p| p.display_name.as_deref()),
                webhook_token: &token,
            },
        );

        let response = match self.submitter.submit(&request).await {
            Ok(response) => response,
            Err(vendor_error) => {
                let raw = vendor_error.raw_body().cloned();
                return self
                    .park(&order, AttentionReason::from(&vendor_error), raw)
                    .await;
            }
        };

        let order = self
            .state
            .mark_submitted(order.id, &response.request_id)
            .await?;
        FULFILLMENT_SUBMISSIONS.inc();
        self.events.emit(Event::OrderSubmitted {
            order_id: order.id,
            vendor_request_id: response.request_id.clone(),
        });
        self.publish_purchase_check(&order, &items).await;

        Ok(FulfillmentOutcome::Submitted {
            vendor_request_id: response.request_id,
        })
    }

    fn funding_amount(order: &order::Model, items: &ExtractedItems) -> Decimal {
        if order.total_amount > Decimal::ZERO {
            order.total_amount
        } else {
            items.subtotal()
        }
    }

    async fn fund(
        &self,
        order: &order::Model,
        items: &ExtractedItems,
        trigger: Trigger,
    ) -> Result<FundingStep, ServiceError> {
        let amount = Self::funding_amount(order, items);

        if trigger.bypasses_funding() {
            let held = self.ledger.reserve_unchecked(order.id, amount).await?;
            return Ok(FundingStep::Funded(format!(
                "Funding check bypassed by manual force; holding {}",
                held
            )));
        }

        if !self.refresh_balance().await? {
            if self.settings.fail_open {
                FUNDING_FAIL_OPEN.inc();
                let held = self.ledger.reserve_unchecked(order.id, amount).await?;
                self.state
                    .append_note(
                        order.id,
                        NoteKind::Warning,
                        "Funding balance unavailable; proceeding without a balance check",
                        Some(json!({"held": held})),
                    )
                    .await?;
                return Ok(FundingStep::Funded(format!(
                    "Funding assumed (fail-open); holding {}",
                    held
                )));
            }
            self.state
                .append_note(
                    order.id,
                    NoteKind::Warning,
                    "Funding balance unavailable; deciding on the last known balance",
                    None,
                )
                .await?;
        }

        let decision = self.ledger.reserve(order.id, amount, Utc::now()).await?;
        match decision {
            FundingDecision::Proceed {
                required,
                available,
            } => Ok(FundingStep::Funded(format!(
                "Funding approved: {} required, {} available",
                required, available
            ))),
            FundingDecision::Defer {
                expected_funding_date,
                scheduled_delivery_date,
                ..
            } => {
                let reason = decision.hold_reason().unwrap_or_default();
                self.state
                    .mark_deferred(
                        order.id,
                        &reason,
                        expected_funding_date,
                        scheduled_delivery_date,
                    )
                    .await?;
                FULFILLMENT_DEFERRALS.inc();
                self.events.emit(Event::OrderDeferred {
                    order_id: order.id,
                    expected_funding_date,
                    scheduled_delivery_date,
                });
                self.notify_purchaser_of_delay(order, scheduled_delivery_date)
                    .await;
                Ok(FundingStep::Deferred(FulfillmentOutcome::Deferred {
                    expected_funding_date,
                    scheduled_delivery_date,
                    reason,
                }))
            }
        }
    }

    /// `Ok(false)` when the vendor balance could not be read.
    async fn refresh_balance(&self) -> Result<bool, ServiceError> {
        let vendor = self.vendor.clone();
        match self
            .balance_breaker
            .call(|| async move { vendor.fetch_balance().await })
            .await
        {
            Ok(balance) => {
                self.ledger.refresh_balance(balance).await?;
                Ok(true)
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                warn!(breaker = self.balance_breaker.name(), "Balance check skipped, circuit open");
                Ok(false)
            }
            Err(CircuitBreakerError::ServiceFailure(e)) => {
                warn!(error = %e, "Balance check failed");
                Ok(false)
            }
        }
    }

    async fn park(
        &self,
        order: &order::Model,
        reason: AttentionReason,
        vendor_error: Option<Value>,
    ) -> Result<FulfillmentOutcome, ServiceError> {
        if let Some(amount) = self.ledger.release(order.id).await? {
            self.events.emit(Event::FundingReleased {
                order_id: order.id,
                amount,
            });
        }
        self.state
            .mark_requires_attention(order.id, &reason, vendor_error)
            .await?;
        FULFILLMENT_ATTENTION
            .with_label_values(&[reason.code()])
            .inc();
        self.events.emit(Event::OrderRequiresAttention {
            order_id: order.id,
            reason: reason.message(),
        });
        self.notify_ops(order, &reason).await;
        Ok(FulfillmentOutcome::RequiresAttention { reason })
    }

    /// Records `failed` after an unexpected error. Secondary failures are only logged.
    async fn fail(&self, order_id: Uuid, err: &ServiceError) {
        FULFILLMENT_FAILURES.inc();
        error!(order_id = %order_id, error = %err, "Fulfillment failed unexpectedly");
        if let Err(e) = self.ledger.release(order_id).await {
            error!(order_id = %order_id, error = %e, "Failed to release funding after error");
        }
        if let Err(e) = self.state.mark_failed(order_id, &err.to_string()).await {
            error!(order_id = %order_id, error = %e, "Failed to record failed status");
        }
        self.events.emit(Event::OrderFailed {
            order_id,
            error: err.to_string(),
        });
    }

    async fn publish_purchase_check(&self, order: &order::Model, items: &ExtractedItems) {
        let recipient_ids = items.recipient_ids();
        if recipient_ids.is_empty() {
            debug!(order_id = %order.id, "No identified recipients; skipping wishlist check");
            return;
        }
        let check = PurchaseCheck {
            order_id: order.id,
            purchaser_id: order.user_id,
            recipient_ids,
            product_ids: items.product_ids(),
        };
        let published = match Message::from_payload(topics::WISHLIST_PURCHASE_CHECK, &check) {
            Ok(message) => self.queue.publish(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            warn!(order_id = %order.id, error = %e, "Failed to queue wishlist purchase check");
        }
    }

    async fn notify_purchaser_of_delay(&self, order: &order::Model, delivery: DateTime<Utc>) {
        let profile = match ProfileEntity::find_by_id(order.user_id).one(&*self.db).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Could not load purchaser for delay notice");
                return;
            }
        };
        self.notifications
            .enqueue_best_effort(
                profile.as_ref().and_then(|p| p.email.as_deref()),
                event_types::ORDER_DELAYED_FUNDING,
                json!({
                    "order_id": order.id,
                    "order_number": order.order_number,
                    "customer_name": profile.as_ref().and_then(|p| p.display_name.clone()),
                    "estimated_delivery": delivery.date_naive().to_string(),
                }),
            )
            .await;
    }

    async fn notify_ops(&self, order: &order::Model, reason: &AttentionReason) {
        self.notifications
            .enqueue_best_effort(
                self.settings.ops_notification_email.as_deref(),
                event_types::ORDER_REQUIRES_ATTENTION,
                json!({
                    "order_id": order.id,
                    "order_number": order.order_number,
                    "reason": reason,
                    "message": reason.message(),
                }),
            )
            .await;
    }

    /// Re-drives scheduled orders whose funding date has passed.
    #[instrument(skip(self))]
    pub async fn redrive_due(&self) -> Result<Vec<RedriveResult>, ServiceError> {
        let due = self
            .state
            .due_for_redrive(Utc::now(), self.settings.redrive_batch_size)
            .await?;
        info!(count = due.len(), "Re-driving scheduled orders");

        let results = stream::iter(due)
            .map(|order_id| async move {
                match self.process(order_id, Trigger::ScheduledRedrive).await {
                    Ok(outcome) => RedriveResult {
                        order_id,
                        outcome: Some(outcome),
                        error: None,
                    },
                    Err(e) => RedriveResult {
                        order_id,
                        outcome: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .buffer_unordered(self.settings.redrive_concurrency)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }

    /// Applies an authenticated vendor callback to the order.
    #[instrument(skip(self, token, payload), fields(order_id = %order_id, event = %event))]
    pub async fn handle_vendor_event(
        &self,
        order_id: Uuid,
        event: VendorWebhookEvent,
        token: &str,
        payload: Value,
    ) -> Result<WebhookReceipt, ServiceError> {
        let order = self.state.load(order_id).await?;
        if !WebhookTokenSigner::verify(order.webhook_token.as_deref(), token) {
            warn!(order_id = %order_id, "Rejected vendor webhook with invalid token");
            return Err(ServiceError::Unauthorized(
                "Invalid webhook token".to_string(),
            ));
        }

        VENDOR_WEBHOOK_EVENTS
            .with_label_values(&[event.to_string().as_str()])
            .inc();
        self.events.emit(Event::VendorWebhookReceived {
            order_id,
            event: event.to_string(),
        });

        let order = match event {
            VendorWebhookEvent::RequestSucceeded => {
                self.on_request_succeeded(order, &payload).await?
            }
            VendorWebhookEvent::RequestFailed => self.on_request_failed(order, payload).await?,
            VendorWebhookEvent::TrackingObtained | VendorWebhookEvent::TrackingUpdated => {
                let tracking = tracking_entries(&payload);
                if tracking.is_empty() {
                    self.state
                        .append_note(order_id, NoteKind::Info, &format!("Vendor {} without tracking data", event), None)
                        .await?;
                    order
                } else {
                    self.state.merge_tracking(order_id, tracking).await?
                }
            }
            VendorWebhookEvent::StatusUpdated | VendorWebhookEvent::CaseUpdated => {
                let summary = error_message_from_body(&payload)
                    .or_else(|| payload.get("status").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "no details".to_string());
                self.state
                    .append_note(
                        order_id,
                        NoteKind::Info,
                        &format!("Vendor {}: {}", event, summary),
                        Some(payload),
                    )
                    .await?;
                order
            }
        };

        Ok(WebhookReceipt {
            order_id,
            event,
            status: order.status,
        })
    }

    async fn on_request_succeeded(
        &self,
        order: order::Model,
        payload: &Value,
    ) -> Result<order::Model, ServiceError> {
        if let Some(amount) = self.ledger.settle(order.id).await? {
            self.events.emit(Event::FundingSettled {
                order_id: order.id,
                amount,
            });
        }
        match merchant_order_id(payload) {
            Some(vendor_order_id) if order.status == OrderStatus::Completed => {
                self.state
                    .record_vendor_order_id(order.id, &vendor_order_id)
                    .await
            }
            _ => {
                self.state
                    .append_note(order.id, NoteKind::Info, "Vendor reported request succeeded", None)
                    .await?;
                Ok(order)
            }
        }
    }

    async fn on_request_failed(
        &self,
        order: order::Model,
        payload: Value,
    ) -> Result<order::Model, ServiceError> {
        let message = error_message_from_body(&payload)
            .unwrap_or_else(|| "Vendor reported the request failed".to_string());
        if !matches!(order.status, OrderStatus::Completed | OrderStatus::Processing) {
            self.state
                .append_note(
                    order.id,
                    NoteKind::Warning,
                    &format!("Vendor request failed while order is {}: {}", order.status, message),
                    Some(payload),
                )
                .await?;
            return Ok(order);
        }

        let reason = AttentionReason::VendorRequestFailed { message };
        if let Some(amount) = self.ledger.release(order.id).await? {
            self.events.emit(Event::FundingReleased {
                order_id: order.id,
                amount,
            });
        }
        let updated = self
            .state
            .mark_vendor_request_failed(order.id, &reason, Some(payload))
            .await?;
        FULFILLMENT_ATTENTION
            .with_label_values(&[reason.code()])
            .inc();
        self.events.emit(Event::OrderRequiresAttention {
            order_id: order.id,
            reason: reason.message(),
        });
        self.notify_ops(&updated, &reason).await;
        Ok(updated)
    }
}

fn not_claimable(order_id: Uuid, status: OrderStatus, trigger: Trigger) -> ServiceError {
    match status {
        OrderStatus::Processing => {
            ServiceError::Conflict(format!("Order {} is already being processed", order_id))
        }
        status => ServiceError::InvalidStatus(format!(
            "Order {} is {} and cannot be processed by {}",
            order_id,
            status,
            trigger.as_str()
        )),
    }
}

/// First merchant order id in a `request_succeeded` payload.
fn merchant_order_id(payload: &Value) -> Option<String> {
    let from_list = payload
        .get("merchant_order_ids")
        .and_then(Value::as_array)
        .and_then(|ids| ids.first())
        .and_then(|first| match first {
            Value::String(s) => Some(s.clone()),
            other => other
                .get("merchant_order_id")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    from_list.or_else(|| {
        payload
            .get("merchant_order_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}

/// Tracking entries from either a `tracking` array or `tracking_numbers`.
fn tracking_entries(payload: &Value) -> Vec<Value> {
    ["tracking", "tracking_numbers"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_array))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = FulfillmentOutcome::RequiresAttention {
            reason: AttentionReason::InvalidProductIds {
                product_ids: vec!["sku-123".into()],
            },
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "requires_attention");
        assert_eq!(value["reason"]["code"], "invalid_product_ids");
        assert!(!outcome.is_success());
        assert!(outcome.summary().contains("sku-123"));
    }

    #[test]
    fn merchant_order_id_shapes() {
        assert_eq!(
            merchant_order_id(&json!({"merchant_order_ids": [{"merchant_order_id": "112-1"}]})),
            Some("112-1".to_string())
        );
        assert_eq!(
            merchant_order_id(&json!({"merchant_order_ids": ["112-2"]})),
            Some("112-2".to_string())
        );
        assert_eq!(merchant_order_id(&json!({})), None);
    }

    #[test]
    fn tracking_entries_from_either_key() {
        assert_eq!(tracking_entries(&json!({"tracking": [{"tracking_number": "1Z"}]})).len(), 1);
        assert_eq!(tracking_entries(&json!({"tracking_numbers": ["1Z", "2Z"]})).len(), 2);
        assert!(tracking_entries(&json!({"status": "shipped"})).is_empty());
    }

    #[test]
    fn rate_limit_key_is_per_user() {
        let user = Uuid::nil();
        assert_eq!(
            rate_limit_key(user),
            "user:00000000-0000-0000-0000-000000000000:fulfillment"
        );
    }
}
