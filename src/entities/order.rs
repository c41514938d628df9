use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of an order as it moves through fulfillment.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending_payment")]
    PendingPayment,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "requires_attention")]
    RequiresAttention,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl OrderStatus {
    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `processing -> processing` is the takeover of a stale claim.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Processing)
                | (Scheduled, Processing)
                | (RequiresAttention, Processing)
                | (Failed, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Scheduled)
                | (Processing, RequiresAttention)
                | (Processing, Failed)
                | (Completed, RequiresAttention)
        )
    }

    /// Parked states an external actor may re-drive back into processing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Scheduled | OrderStatus::RequiresAttention | OrderStatus::Failed
        )
    }
}

/// Payment state written by the payment webhook collaborator.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "authorized")]
    Authorized,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl PaymentStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid | PaymentStatus::Succeeded | PaymentStatus::Authorized
        )
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FundingStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "awaiting_funds")]
    AwaitingFunds,
    #[sea_orm(string_value = "funded")]
    Funded,
}

/// The `orders` table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    /// Purchaser.
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub funding_status: FundingStatus,
    pub total_amount: Decimal,
    pub currency: String,
    /// Raw line-item payload, either a bare array or `{ "items": [...] }`.
    pub line_items: Json,
    /// Raw order-level shipping address in whichever historical shape it was stored.
    pub shipping_address: Option<Json>,
    pub is_gift: bool,
    pub gift_message: Option<String>,
    pub vendor_request_id: Option<String>,
    pub vendor_order_id: Option<String>,
    /// Vendor error payload kept verbatim for diagnosis.
    pub vendor_error: Option<Json>,
    pub last_error: Option<String>,
    pub funding_hold_reason: Option<String>,
    pub expected_funding_date: Option<DateTime<Utc>>,
    pub scheduled_delivery_date: Option<DateTime<Utc>>,
    pub webhook_token: Option<String>,
    pub tracking_numbers: Option<Json>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_note::Entity")]
    Notes,
    #[sea_orm(has_one = "super::funding_reservation::Entity")]
    FundingReservation,
}

impl Related<super::order_note::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notes.def()
    }
}

impl Related<super::funding_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FundingReservation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Lifecycle label shown to callers. A scheduled order held for funds
    /// reports `awaiting_funds`.
    pub fn lifecycle(&self) -> &'static str {
        match (self.status, self.funding_status) {
            (OrderStatus::Scheduled, FundingStatus::AwaitingFunds) => "awaiting_funds",
            (OrderStatus::PendingPayment, _) => "pending_payment",
            (OrderStatus::Processing, _) => "processing",
            (OrderStatus::Completed, _) => "completed",
            (OrderStatus::Scheduled, _) => "scheduled",
            (OrderStatus::RequiresAttention, _) => "requires_attention",
            (OrderStatus::Failed, _) => "failed",
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.vendor_request_id.is_some()
    }
}
