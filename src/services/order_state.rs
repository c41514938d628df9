//! Single writer of an order's lifecycle and funding fields.
//!
//! Entering `processing` is an atomic conditional update so two concurrent
//! triggers can never both claim the same order. Every other transition
//! re-reads the row inside a transaction, checks the transition table, and
//! writes with a version guard. Each transition appends an `order_notes`
//! row with its reason.

use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity},
        order_note::{self, Entity as NoteEntity},
        FundingStatus, NoteKind, OrderStatus,
    },
    errors::ServiceError,
    services::{
        address_normalizer::AddressError, line_items::LineItemError,
    },
    vendor::VendorError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const SYSTEM_ACTOR: &str = "fulfillment-pipeline";

/// What caused a fulfillment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    PaymentConfirmed,
    ScheduledRedrive,
    ManualForce { bypass_funding_check: bool },
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::PaymentConfirmed => "payment_confirmed",
            Trigger::ScheduledRedrive => "scheduled_redrive",
            Trigger::ManualForce { .. } => "manual_force",
        }
    }

    /// Statuses this trigger may claim (stale `processing` is always claimable).
    pub fn claimable_statuses(&self) -> Vec<OrderStatus> {
        match self {
            Trigger::PaymentConfirmed => {
                vec![OrderStatus::PendingPayment, OrderStatus::Scheduled]
            }
            Trigger::ScheduledRedrive => vec![OrderStatus::Scheduled],
            Trigger::ManualForce { .. } => vec![
                OrderStatus::PendingPayment,
                OrderStatus::Scheduled,
                OrderStatus::RequiresAttention,
                OrderStatus::Failed,
            ],
        }
    }

    pub fn requires_confirmed_payment(&self) -> bool {
        !matches!(self, Trigger::ManualForce { .. })
    }

    pub fn bypasses_funding(&self) -> bool {
        matches!(
            self,
            Trigger::ManualForce {
                bypass_funding_check: true
            }
        )
    }
}

/// Enumerable reason an order was parked for a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AttentionReason {
    LineItemsUnrecognizedShape,
    LineItemsEmpty,
    LineItemMalformed { index: usize, detail: String },
    InvalidProductIds { product_ids: Vec<String> },
    MissingShippingAddress,
    InvalidAddress { missing_fields: Vec<String> },
    VendorRejected { status: u16, message: String },
    VendorUnavailable { message: String },
    /// Accepted at submission, failed later per vendor webhook.
    VendorRequestFailed { message: String },
}

impl AttentionReason {
    pub fn code(&self) -> &'static str {
        match self {
            AttentionReason::LineItemsUnrecognizedShape => "line_items_unrecognized_shape",
            AttentionReason::LineItemsEmpty => "line_items_empty",
            AttentionReason::LineItemMalformed { .. } => "line_item_malformed",
            AttentionReason::InvalidProductIds { .. } => "invalid_product_ids",
            AttentionReason::MissingShippingAddress => "missing_shipping_address",
            AttentionReason::InvalidAddress { .. } => "invalid_address",
            AttentionReason::VendorRejected { .. } => "vendor_rejected",
            AttentionReason::VendorUnavailable { .. } => "vendor_unavailable",
            AttentionReason::VendorRequestFailed { .. } => "vendor_request_failed",
        }
    }

    /// Text stored in `last_error`. Vendor messages are kept verbatim.
    pub fn message(&self) -> String {
        match self {
            AttentionReason::LineItemsUnrecognizedShape => {
                "Line items are in an unrecognized format".to_string()
            }
            AttentionReason::LineItemsEmpty => "Order has no line items".to_string(),
            AttentionReason::LineItemMalformed { index, detail } => {
                format!("Line item {} is malformed: {}", index, detail)
            }
            AttentionReason::InvalidProductIds { product_ids } => {
                format!("Invalid product identifiers: {}", product_ids.join(", "))
            }
            AttentionReason::MissingShippingAddress => "Order has no shipping address".to_string(),
            AttentionReason::InvalidAddress { missing_fields } => format!(
                "Shipping address is missing required fields: {}",
                missing_fields.join(", ")
            ),
            AttentionReason::VendorRejected { message, .. }
            | AttentionReason::VendorUnavailable { message }
            | AttentionReason::VendorRequestFailed { message } => message.clone(),
        }
    }
}

impl From<LineItemError> for AttentionReason {
    fn from(err: LineItemError) -> Self {
        match err {
            LineItemError::UnrecognizedShape => AttentionReason::LineItemsUnrecognizedShape,
            LineItemError::Empty => AttentionReason::LineItemsEmpty,
            LineItemError::Malformed { index, detail } => {
                AttentionReason::LineItemMalformed { index, detail }
            }
            LineItemError::InvalidProductIds(product_ids) => {
                AttentionReason::InvalidProductIds { product_ids }
            }
        }
    }
}

impl From<AddressError> for AttentionReason {
    fn from(err: AddressError) -> Self {
        match err {
            AddressError::Missing => AttentionReason::MissingShippingAddress,
            AddressError::Incomplete { missing_fields } => {
                AttentionReason::InvalidAddress { missing_fields }
            }
        }
    }
}

impl From<&VendorError> for AttentionReason {
    fn from(err: &VendorError) -> Self {
        match err {
            VendorError::Rejected {
                status, message, ..
            } => AttentionReason::VendorRejected {
                status: *status,
                message: message.clone(),
            },
            other => AttentionReason::VendorUnavailable {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(order::Model),
    AlreadySubmitted(String),
    NotClaimable(OrderStatus),
}

/// Field updates applied together with a transition.
#[derive(Debug, Clone, Default)]
struct OrderChanges {
    funding_status: Option<FundingStatus>,
    funding_hold_reason: Option<Option<String>>,
    expected_funding_date: Option<Option<DateTime<Utc>>>,
    scheduled_delivery_date: Option<Option<DateTime<Utc>>>,
    last_error: Option<Option<String>>,
    vendor_error: Option<Option<Value>>,
    vendor_request_id: Option<Option<String>>,
    vendor_order_id: Option<String>,
    webhook_token: Option<String>,
    tracking_numbers: Option<Value>,
    submitted_at: Option<DateTime<Utc>>,
    processing_started_at: Option<Option<DateTime<Utc>>>,
}

impl OrderChanges {
    fn apply(self, am: &mut order::ActiveModel) {
        if let Some(v) = self.funding_status {
            am.funding_status = Set(v);
        }
        if let Some(v) = self.funding_hold_reason {
            am.funding_hold_reason = Set(v);
        }
        if let Some(v) = self.expected_funding_date {
            am.expected_funding_date = Set(v);
        }
        if let Some(v) = self.scheduled_delivery_date {
            am.scheduled_delivery_date = Set(v);
        }
        if let Some(v) = self.last_error {
            am.last_error = Set(v);
        }
        if let Some(v) = self.vendor_error {
            am.vendor_error = Set(v);
        }
        if let Some(v) = self.vendor_request_id {
            am.vendor_request_id = Set(v);
        }
        if let Some(v) = self.vendor_order_id {
            am.vendor_order_id = Set(Some(v));
        }
        if let Some(v) = self.webhook_token {
            am.webhook_token = Set(Some(v));
        }
        if let Some(v) = self.tracking_numbers {
            am.tracking_numbers = Set(Some(v));
        }
        if let Some(v) = self.submitted_at {
            am.submitted_at = Set(Some(v));
        }
        if let Some(v) = self.processing_started_at {
            am.processing_started_at = Set(v);
        }
    }
}

#[derive(Debug, Clone)]
struct NewNote {
    kind: NoteKind,
    note: String,
    details: Option<Value>,
}

pub(crate) async fn insert_note<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    kind: NoteKind,
    note: &str,
    details: Option<Value>,
) -> Result<(), DbErr> {
    let row = order_note::ActiveModel {
        order_id: Set(order_id),
        kind: Set(kind),
        note: Set(note.to_string()),
        details: Set(details),
        created_by: Set(Some(SYSTEM_ACTOR.to_string())),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    NoteEntity::insert(row).exec_without_returning(conn).await?;
    Ok(())
}

#[derive(Clone)]
pub struct OrderStateManager {
    db: Arc<DbPool>,
    claim_ttl: Duration,
}

impl OrderStateManager {
    pub fn new(db: Arc<DbPool>, claim_ttl: Duration) -> Self {
        Self { db, claim_ttl }
    }

    pub async fn load(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(|e| {
                error!("Failed to fetch order {}: {}", order_id, e);
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    pub async fn notes(&self, order_id: Uuid) -> Result<Vec<order_note::Model>, ServiceError> {
        Ok(NoteEntity::find()
            .filter(order_note::Column::OrderId.eq(order_id))
            .order_by_asc(order_note::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Appends an audit note without touching the order row.
    pub async fn append_note(
        &self,
        order_id: Uuid,
        kind: NoteKind,
        note: &str,
        details: Option<Value>,
    ) -> Result<(), ServiceError> {
        insert_note(&*self.db, order_id, kind, note, details).await?;
        Ok(())
    }

    /// Atomically moves the order into `processing` for `trigger`.
    ///
    /// Zero affected rows means another trigger holds a fresh claim, the
    /// order is already submitted, or its status is not claimable.
    /// Whether `claim` would accept `order` for `trigger` as of `now`.
    pub fn is_claimable(&self, order: &order::Model, trigger: Trigger, now: DateTime<Utc>) -> bool {
        if order.vendor_request_id.is_some() {
            return false;
        }
        if trigger.claimable_statuses().contains(&order.status) {
            return true;
        }
        order.status == OrderStatus::Processing
            && order
                .processing_started_at
                .map_or(false, |started| started < now - self.claim_ttl_chrono())
    }

    fn claim_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.claim_ttl).unwrap_or_else(|_| chrono::Duration::minutes(15))
    }

    #[instrument(skip(self), fields(order_id = %order_id, trigger = trigger.as_str()))]
    pub async fn claim(&self, order_id: Uuid, trigger: Trigger) -> Result<ClaimOutcome, ServiceError> {
        let now = Utc::now();
        let stale_before = now - self.claim_ttl_chrono();
        let statuses = trigger.claimable_statuses();

        let claimed = self
            .db
            .transaction::<_, Option<order::Model>, ServiceError>(move |txn| {
                Box::pin(async move {
                    let before = OrderEntity::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Order {} not found", order_id))
                        })?;

                    let claimable = Condition::any()
                        .add(order::Column::Status.is_in(statuses))
                        .add(
                            Condition::all()
                                .add(order::Column::Status.eq(OrderStatus::Processing))
                                .add(order::Column::ProcessingStartedAt.lt(stale_before)),
                        );

                    let result = OrderEntity::update_many()
                        .col_expr(order::Column::Status, Expr::value(OrderStatus::Processing))
                        .col_expr(order::Column::ProcessingStartedAt, Expr::value(Some(now)))
                        .col_expr(order::Column::LastError, Expr::value(Option::<String>::None))
                        .col_expr(order::Column::VendorError, Expr::value(Option::<Value>::None))
                        .col_expr(order::Column::UpdatedAt, Expr::value(now))
                        .col_expr(order::Column::Version, Expr::col(order::Column::Version).add(1))
                        .filter(order::Column::Id.eq(order_id))
                        .filter(order::Column::VendorRequestId.is_null())
                        .filter(claimable)
                        .exec(txn)
                        .await?;

                    if result.rows_affected == 0 {
                        return Ok(None);
                    }

                    let note = if before.status == OrderStatus::Processing {
                        format!("Took over stale processing claim ({})", trigger.as_str())
                    } else {
                        format!("{} -> processing ({})", before.status, trigger.as_str())
                    };
                    insert_note(
                        txn,
                        order_id,
                        NoteKind::Transition,
                        &note,
                        Some(json!({"from": before.status, "to": OrderStatus::Processing, "trigger": trigger})),
                    )
                    .await?;

                    Ok(OrderEntity::find_by_id(order_id).one(txn).await?)
                })
            })
            .await?;

        if let Some(order) = claimed {
            info!(order_id = %order_id, "Order claimed for processing");
            return Ok(ClaimOutcome::Claimed(order));
        }

        let current = self.load(order_id).await?;
        match current.vendor_request_id {
            Some(id) => Ok(ClaimOutcome::AlreadySubmitted(id)),
            None => {
                debug!(order_id = %order_id, status = %current.status, "Order not claimable");
                Ok(ClaimOutcome::NotClaimable(current.status))
            }
        }
    }

    /// Version-guarded transition helper.
    async fn transition(
        &self,
        order_id: Uuid,
        allowed_from: Vec<OrderStatus>,
        to: Option<OrderStatus>,
        changes: OrderChanges,
        note: NewNote,
        require_unsubmitted: bool,
    ) -> Result<order::Model, ServiceError> {
        let updated = self
            .db
            .transaction::<_, order::Model, ServiceError>(move |txn| {
                Box::pin(async move {
                    let current = OrderEntity::find_by_id(order_id)
                        .one(txn)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::NotFound(format!("Order {} not found", order_id))
                        })?;

                    if !allowed_from.contains(&current.status) {
                        return Err(ServiceError::InvalidStatus(format!(
                            "Order {} is {} and cannot move to {}",
                            order_id,
                            current.status,
                            to.map(|s| s.to_string()).unwrap_or_else(|| current.status.to_string())
                        )));
                    }
                    if let Some(next) = to {
                        if next != current.status && !current.status.can_transition_to(next) {
                            return Err(ServiceError::InvalidStatus(format!(
                                "Transition {} -> {} is not allowed",
                                current.status, next
                            )));
                        }
                    }
                    if require_unsubmitted && current.vendor_request_id.is_some() {
                        return Err(ServiceError::Conflict(format!(
                            "Order {} already has a vendor submission",
                            order_id
                        )));
                    }

                    let version = current.version;
                    let mut am = current.into_active_model();
                    if let Some(next) = to {
                        am.status = Set(next);
                    }
                    changes.apply(&mut am);
                    am.version = Set(version + 1);
                    am.updated_at = Set(Utc::now());

                    let mut update = OrderEntity::update(am)
                        .filter(order::Column::Version.eq(version));
                    if require_unsubmitted {
                        update = update.filter(order::Column::VendorRequestId.is_null());
                    }
                    let updated = update.exec(txn).await.map_err(|e| match e {
                        DbErr::RecordNotUpdated => ServiceError::ConcurrentModification(order_id),
                        other => ServiceError::DatabaseError(other),
                    })?;

                    insert_note(txn, order_id, note.kind, &note.note, note.details).await?;
                    Ok(updated)
                })
            })
            .await?;
        Ok(updated)
    }

    /// Persists the webhook token and marks the order funded right before submission.
    #[instrument(skip(self, webhook_token), fields(order_id = %order_id))]
    pub async fn prepare_submission(
        &self,
        order_id: Uuid,
        webhook_token: String,
        funding_note: &str,
    ) -> Result<order::Model, ServiceError> {
        self.transition(
            order_id,
            vec![OrderStatus::Processing],
            None,
            OrderChanges {
                funding_status: Some(FundingStatus::Funded),
                funding_hold_reason: Some(None),
                expected_funding_date: Some(None),
                scheduled_delivery_date: Some(None),
                webhook_token: Some(webhook_token),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Info,
                note: funding_note.to_string(),
                details: None,
            },
            true,
        )
        .await
    }

    /// Records the vendor's acceptance. Only succeeds while no vendor id is set.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_submitted(
        &self,
        order_id: Uuid,
        vendor_request_id: &str,
    ) -> Result<order::Model, ServiceError> {
        self.transition(
            order_id,
            vec![OrderStatus::Processing],
            Some(OrderStatus::Completed),
            OrderChanges {
                vendor_request_id: Some(Some(vendor_request_id.to_string())),
                submitted_at: Some(Utc::now()),
                funding_status: Some(FundingStatus::Funded),
                processing_started_at: Some(None),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Transition,
                note: format!(
                    "processing -> completed (vendor request {})",
                    vendor_request_id
                ),
                details: Some(json!({"vendor_request_id": vendor_request_id})),
            },
            true,
        )
        .await
    }

    #[instrument(skip(self, expected_funding_date, scheduled_delivery_date), fields(order_id = %order_id))]
    pub async fn mark_deferred(
        &self,
        order_id: Uuid,
        hold_reason: &str,
        expected_funding_date: DateTime<Utc>,
        scheduled_delivery_date: DateTime<Utc>,
    ) -> Result<order::Model, ServiceError> {
        self.transition(
            order_id,
            vec![OrderStatus::Processing],
            Some(OrderStatus::Scheduled),
            OrderChanges {
                funding_status: Some(FundingStatus::AwaitingFunds),
                funding_hold_reason: Some(Some(hold_reason.to_string())),
                expected_funding_date: Some(Some(expected_funding_date)),
                scheduled_delivery_date: Some(Some(scheduled_delivery_date)),
                processing_started_at: Some(None),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Transition,
                note: format!("processing -> scheduled (awaiting funds): {}", hold_reason),
                details: Some(json!({
                    "expected_funding_date": expected_funding_date,
                    "scheduled_delivery_date": scheduled_delivery_date,
                })),
            },
            true,
        )
        .await
    }

    /// Parks the order for a human. `vendor_error` is the raw vendor payload, if any.
    #[instrument(skip(self, vendor_error), fields(order_id = %order_id, reason = reason.code()))]
    pub async fn mark_requires_attention(
        &self,
        order_id: Uuid,
        reason: &AttentionReason,
        vendor_error: Option<Value>,
    ) -> Result<order::Model, ServiceError> {
        let message = reason.message();
        warn!(order_id = %order_id, reason = %message, "Order requires attention");
        self.transition(
            order_id,
            vec![OrderStatus::Processing, OrderStatus::Completed],
            Some(OrderStatus::RequiresAttention),
            OrderChanges {
                last_error: Some(Some(message.clone())),
                vendor_error: Some(vendor_error),
                processing_started_at: Some(None),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Error,
                note: format!("-> requires_attention: {}", message),
                details: serde_json::to_value(reason).ok(),
            },
            false,
        )
        .await
    }

    /// Parks an accepted order whose vendor request later failed.
    ///
    /// The failed request id moves into the audit note and the order loses
    /// its vendor id, so a forced re-drive can submit it again.
    #[instrument(skip(self, reason, vendor_error), fields(order_id = %order_id))]
    pub async fn mark_vendor_request_failed(
        &self,
        order_id: Uuid,
        reason: &AttentionReason,
        vendor_error: Option<Value>,
    ) -> Result<order::Model, ServiceError> {
        let failed_request_id = self.load(order_id).await?.vendor_request_id;
        let message = reason.message();
        warn!(
            order_id = %order_id,
            vendor_request_id = ?failed_request_id,
            reason = %message,
            "Vendor request failed after acceptance"
        );
        self.transition(
            order_id,
            vec![OrderStatus::Processing, OrderStatus::Completed],
            Some(OrderStatus::RequiresAttention),
            OrderChanges {
                last_error: Some(Some(message.clone())),
                vendor_error: Some(vendor_error),
                vendor_request_id: Some(None),
                processing_started_at: Some(None),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Error,
                note: format!("-> requires_attention: {}", message),
                details: Some(json!({
                    "reason": reason,
                    "failed_vendor_request_id": failed_request_id,
                })),
            },
            false,
        )
        .await
    }

    /// Terminal-but-correctable failure after an unexpected internal error.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn mark_failed(&self, order_id: Uuid, error: &str) -> Result<order::Model, ServiceError> {
        self.transition(
            order_id,
            vec![OrderStatus::Processing],
            Some(OrderStatus::Failed),
            OrderChanges {
                last_error: Some(Some(error.to_string())),
                processing_started_at: Some(None),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Error,
                note: format!("processing -> failed: {}", error),
                details: Some(json!({"error": error})),
            },
            false,
        )
        .await
    }

    /// Stores the vendor's merchant order id once the purchase went through.
    pub async fn record_vendor_order_id(
        &self,
        order_id: Uuid,
        vendor_order_id: &str,
    ) -> Result<order::Model, ServiceError> {
        self.transition(
            order_id,
            vec![OrderStatus::Completed],
            None,
            OrderChanges {
                vendor_order_id: Some(vendor_order_id.to_string()),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Info,
                note: format!("Vendor placed order {}", vendor_order_id),
                details: None,
            },
            false,
        )
        .await
    }

    /// Merges new tracking numbers into the stored list, keeping order and dropping duplicates.
    pub async fn merge_tracking(
        &self,
        order_id: Uuid,
        tracking: Vec<Value>,
    ) -> Result<order::Model, ServiceError> {
        let current = self.load(order_id).await?;
        let mut merged: Vec<Value> = current
            .tracking_numbers
            .as_ref()
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut added = 0;
        for entry in tracking {
            if !merged.contains(&entry) {
                merged.push(entry);
                added += 1;
            }
        }

        self.transition(
            order_id,
            vec![OrderStatus::Completed, OrderStatus::RequiresAttention],
            None,
            OrderChanges {
                tracking_numbers: Some(Value::Array(merged)),
                ..Default::default()
            },
            NewNote {
                kind: NoteKind::Info,
                note: format!("Tracking updated ({} new)", added),
                details: None,
            },
            false,
        )
        .await
    }

    /// Scheduled orders whose expected funding date has passed, oldest first.
    pub async fn due_for_redrive(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Uuid>, ServiceError> {
        let rows = OrderEntity::find()
            .select_only()
            .column(order::Column::Id)
            .filter(order::Column::Status.eq(OrderStatus::Scheduled))
            .filter(order::Column::VendorRequestId.is_null())
            .filter(order::Column::ExpectedFundingDate.lte(now))
            .order_by_asc(order::Column::ExpectedFundingDate)
            .limit(limit)
            .into_tuple::<Uuid>()
            .all(&*self.db)
            .await?;
        Ok(rows)
    }
}
