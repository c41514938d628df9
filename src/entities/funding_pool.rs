use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POOL_ID: &str = "default";

/// Ledger row for the shared prepaid balance backing vendor purchases.
///
/// `committed` tracks deferred orders still waiting for funds, `in_flight`
/// tracks orders approved by the gate whose vendor charge has not settled.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "funding_pool")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub balance: Decimal,
    pub committed: Decimal,
    pub in_flight: Decimal,
    pub balance_refreshed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::funding_reservation::Entity")]
    Reservations,
}

impl Related<super::funding_reservation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reservations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
