//! Transactional bookkeeping for the prepaid funding pool.
//!
//! Every gate decision runs in one transaction that reads the pool row,
//! evaluates [`funding_gate::evaluate`], and writes the reservation plus
//! the adjusted `committed`/`in_flight` totals. The pool row carries a
//! version; a concurrent writer makes the update miss and the whole
//! decision is retried.
//!
//! The vendor balance already reflects charged orders. A refresh therefore
//! settles approved holds older than `in_flight_ttl` without touching the
//! balance, so a charge is never subtracted twice.

use crate::{
    db::DbPool,
    entities::{
        funding_pool::{self, Entity as PoolEntity},
        funding_reservation::{self, Entity as ReservationEntity, ReservationState},
    },
    errors::ServiceError,
    services::funding_gate::{self, FundingDecision, FundingPolicy, PoolSnapshot},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveValue::Set,
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const MAX_LEDGER_ATTEMPTS: usize = 3;
const DEFAULT_IN_FLIGHT_TTL: Duration = Duration::from_secs(900);

#[derive(Clone)]
pub struct FundingLedger {
    db: Arc<DbPool>,
    pool_id: String,
    policy: FundingPolicy,
    in_flight_ttl: Duration,
}

/// Pool totals after removing the order's previous open reservation.
fn without_reservation(
    pool: &funding_pool::Model,
    existing: Option<&funding_reservation::Model>,
) -> PoolSnapshot {
    let mut snapshot = PoolSnapshot {
        balance: pool.balance,
        committed: pool.committed,
        in_flight: pool.in_flight,
    };
    if let Some(res) = existing {
        match res.state {
            ReservationState::Committed => {
                snapshot.committed = (snapshot.committed - res.amount).max(Decimal::ZERO)
            }
            ReservationState::InFlight => {
                snapshot.in_flight = (snapshot.in_flight - res.amount).max(Decimal::ZERO)
            }
            ReservationState::Settled | ReservationState::Released => {}
        }
    }
    snapshot
}

async fn ensure_pool<C: ConnectionTrait>(
    conn: &C,
    pool_id: &str,
) -> Result<funding_pool::Model, ServiceError> {
    if let Some(pool) = PoolEntity::find_by_id(pool_id.to_string()).one(conn).await? {
        return Ok(pool);
    }

    let now = Utc::now();
    let row = funding_pool::ActiveModel {
        id: Set(pool_id.to_string()),
        balance: Set(Decimal::ZERO),
        committed: Set(Decimal::ZERO),
        in_flight: Set(Decimal::ZERO),
        balance_refreshed_at: Set(None),
        updated_at: Set(now),
        version: Set(1),
    };
    PoolEntity::insert(row)
        .on_conflict(
            OnConflict::column(funding_pool::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    PoolEntity::find_by_id(pool_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("funding pool {} missing", pool_id)))
}

/// Writes new totals if nobody else touched the pool since `pool` was read.
async fn write_pool<C: ConnectionTrait>(
    conn: &C,
    pool: &funding_pool::Model,
    snapshot: &PoolSnapshot,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let result = PoolEntity::update_many()
        .col_expr(funding_pool::Column::Balance, Expr::value(snapshot.balance))
        .col_expr(funding_pool::Column::Committed, Expr::value(snapshot.committed))
        .col_expr(funding_pool::Column::InFlight, Expr::value(snapshot.in_flight))
        .col_expr(funding_pool::Column::UpdatedAt, Expr::value(Utc::now()))
        .col_expr(funding_pool::Column::Version, Expr::value(pool.version + 1))
        .filter(funding_pool::Column::Id.eq(pool.id.clone()))
        .filter(funding_pool::Column::Version.eq(pool.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(order_id));
    }
    Ok(())
}

async fn upsert_reservation<C: ConnectionTrait>(
    conn: &C,
    existing: Option<&funding_reservation::Model>,
    order_id: Uuid,
    pool_id: &str,
    amount: Decimal,
    state: ReservationState,
) -> Result<(), ServiceError> {
    let now = Utc::now();
    match existing {
        Some(_) => {
            ReservationEntity::update_many()
                .col_expr(funding_reservation::Column::Amount, Expr::value(amount))
                .col_expr(funding_reservation::Column::State, Expr::value(state))
                .col_expr(funding_reservation::Column::PoolId, Expr::value(pool_id))
                .col_expr(funding_reservation::Column::UpdatedAt, Expr::value(now))
                .filter(funding_reservation::Column::OrderId.eq(order_id))
                .exec(conn)
                .await?;
        }
        None => {
            let row = funding_reservation::ActiveModel {
                order_id: Set(order_id),
                pool_id: Set(pool_id.to_string()),
                amount: Set(amount),
                state: Set(state),
                created_at: Set(now),
                updated_at: Set(now),
            };
            ReservationEntity::insert(row).exec_without_returning(conn).await?;
        }
    }
    Ok(())
}

impl FundingLedger {
    pub fn new(db: Arc<DbPool>, pool_id: impl Into<String>, policy: FundingPolicy) -> Self {
        Self {
            db,
            pool_id: pool_id.into(),
            policy,
            in_flight_ttl: DEFAULT_IN_FLIGHT_TTL,
        }
    }

    pub fn with_in_flight_ttl(mut self, ttl: Duration) -> Self {
        self.in_flight_ttl = ttl;
        self
    }

    pub fn policy(&self) -> &FundingPolicy {
        &self.policy
    }

    async fn retrying<F, Fut, T>(&self, order_id: Uuid, op: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(ServiceError::ConcurrentModification(_)) if attempt < MAX_LEDGER_ATTEMPTS => {
                    debug!(order_id = %order_id, attempt, "Funding pool changed concurrently, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, ServiceError> {
        let pool = ensure_pool(&*self.db, &self.pool_id).await?;
        Ok(PoolSnapshot {
            balance: pool.balance,
            committed: pool.committed,
            in_flight: pool.in_flight,
        })
    }

    /// Stores the balance last reported by the vendor.
    ///
    /// In-flight holds approved more than `in_flight_ttl` ago are settled in
    /// the same transaction; the reported balance already has them deducted.
    /// Returns the total amount settled that way.
    #[instrument(skip(self))]
    pub async fn refresh_balance(&self, balance: Decimal) -> Result<Decimal, ServiceError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.in_flight_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(900));
        let charged_before = now - ttl;

        let settled = self
            .retrying(Uuid::nil(), || async {
                let pool_id = self.pool_id.clone();
                self.db
                    .transaction::<_, Decimal, ServiceError>(move |txn| {
                        Box::pin(async move {
                            let pool = ensure_pool(txn, &pool_id).await?;
                            let charged = ReservationEntity::find()
                                .filter(funding_reservation::Column::PoolId.eq(pool_id.clone()))
                                .filter(funding_reservation::Column::State.eq(ReservationState::InFlight))
                                .filter(funding_reservation::Column::UpdatedAt.lte(charged_before))
                                .all(txn)
                                .await?;
                            let settled: Decimal = charged.iter().map(|r| r.amount).sum();

                            if !charged.is_empty() {
                                ReservationEntity::update_many()
                                    .col_expr(
                                        funding_reservation::Column::State,
                                        Expr::value(ReservationState::Settled),
                                    )
                                    .col_expr(funding_reservation::Column::UpdatedAt, Expr::value(now))
                                    .filter(
                                        funding_reservation::Column::OrderId
                                            .is_in(charged.iter().map(|r| r.order_id)),
                                    )
                                    .filter(funding_reservation::Column::State.eq(ReservationState::InFlight))
                                    .exec(txn)
                                    .await?;
                            }

                            let result = PoolEntity::update_many()
                                .col_expr(funding_pool::Column::Balance, Expr::value(balance))
                                .col_expr(
                                    funding_pool::Column::InFlight,
                                    Expr::value((pool.in_flight - settled).max(Decimal::ZERO)),
                                )
                                .col_expr(funding_pool::Column::BalanceRefreshedAt, Expr::value(Some(now)))
                                .col_expr(funding_pool::Column::UpdatedAt, Expr::value(now))
                                .col_expr(funding_pool::Column::Version, Expr::value(pool.version + 1))
                                .filter(funding_pool::Column::Id.eq(pool.id.clone()))
                                .filter(funding_pool::Column::Version.eq(pool.version))
                                .exec(txn)
                                .await?;
                            if result.rows_affected == 0 {
                                return Err(ServiceError::ConcurrentModification(Uuid::nil()));
                            }
                            Ok(settled)
                        })
                    })
                    .await
                    .map_err(ServiceError::from)
            })
            .await?;

        if settled > Decimal::ZERO {
            info!(pool_id = %self.pool_id, %settled, "Settled holds already reflected in vendor balance");
        }
        debug!(pool_id = %self.pool_id, %balance, "Funding pool balance refreshed");
        Ok(settled)
    }

    /// Runs the gate for `order_id` and reserves accordingly, all in one transaction.
    ///
    /// Any earlier open reservation of the same order is folded back first,
    /// so a re-driven deferred order does not count against itself.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reserve(
        &self,
        order_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FundingDecision, ServiceError> {
        self.retrying(order_id, || self.try_reserve(order_id, amount, now))
            .await
    }

    async fn try_reserve(
        &self,
        order_id: Uuid,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<FundingDecision, ServiceError> {
        let pool_id = self.pool_id.clone();
        let policy = self.policy.clone();

        let decision = self
            .db
            .transaction::<_, FundingDecision, ServiceError>(move |txn| {
                Box::pin(async move {
                    let pool = ensure_pool(txn, &pool_id).await?;
                    let existing = ReservationEntity::find_by_id(order_id).one(txn).await?;
                    let mut snapshot = without_reservation(&pool, existing.as_ref());

                    let decision = funding_gate::evaluate(&policy, &snapshot, amount, now);
                    let (held, state) = match &decision {
                        FundingDecision::Proceed { required, .. } => {
                            snapshot.in_flight += *required;
                            (*required, ReservationState::InFlight)
                        }
                        FundingDecision::Defer { .. } => {
                            snapshot.committed += amount;
                            (amount, ReservationState::Committed)
                        }
                    };

                    write_pool(txn, &pool, &snapshot, order_id).await?;
                    upsert_reservation(txn, existing.as_ref(), order_id, &pool_id, held, state)
                        .await?;
                    Ok(decision)
                })
            })
            .await?;

        info!(
            order_id = %order_id,
            proceed = decision.is_proceed(),
            "Funding decision recorded"
        );
        Ok(decision)
    }

    /// Holds funds without consulting the gate (bypass and fail-open paths).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reserve_unchecked(
        &self,
        order_id: Uuid,
        amount: Decimal,
    ) -> Result<Decimal, ServiceError> {
        self.retrying(order_id, || async {
            let pool_id = self.pool_id.clone();
            let required = self.policy.required_for(amount);
            self.db
                .transaction::<_, Decimal, ServiceError>(move |txn| {
                    Box::pin(async move {
                        let pool = ensure_pool(txn, &pool_id).await?;
                        let existing = ReservationEntity::find_by_id(order_id).one(txn).await?;
                        let mut snapshot = without_reservation(&pool, existing.as_ref());
                        snapshot.in_flight += required;
                        write_pool(txn, &pool, &snapshot, order_id).await?;
                        upsert_reservation(
                            txn,
                            existing.as_ref(),
                            order_id,
                            &pool_id,
                            required,
                            ReservationState::InFlight,
                        )
                        .await?;
                        Ok(required)
                    })
                })
                .await
                .map_err(ServiceError::from)
        })
        .await
    }

    /// Vendor charged the order: move the in-flight hold out of the balance.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn settle(&self, order_id: Uuid) -> Result<Option<Decimal>, ServiceError> {
        self.close(order_id, ReservationState::Settled).await
    }

    /// Drops whatever the order still holds.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release(&self, order_id: Uuid) -> Result<Option<Decimal>, ServiceError> {
        self.close(order_id, ReservationState::Released).await
    }

    async fn close(
        &self,
        order_id: Uuid,
        target: ReservationState,
    ) -> Result<Option<Decimal>, ServiceError> {
        self.retrying(order_id, || async {
            let pool_id = self.pool_id.clone();
            self.db
                .transaction::<_, Option<Decimal>, ServiceError>(move |txn| {
                    Box::pin(async move {
                        let Some(existing) =
                            ReservationEntity::find_by_id(order_id).one(txn).await?
                        else {
                            return Ok(None);
                        };
                        if !existing.state.is_open() {
                            return Ok(None);
                        }
                        // Settling only makes sense for an approved hold.
                        if target == ReservationState::Settled
                            && existing.state != ReservationState::InFlight
                        {
                            warn!(order_id = %order_id, state = %existing.state, "Settlement for non in-flight reservation ignored");
                            return Ok(None);
                        }

                        let pool = ensure_pool(txn, &existing.pool_id).await?;
                        let mut snapshot = without_reservation(&pool, Some(&existing));
                        if target == ReservationState::Settled {
                            snapshot.balance -= existing.amount;
                        }
                        write_pool(txn, &pool, &snapshot, order_id).await?;
                        upsert_reservation(
                            txn,
                            Some(&existing),
                            order_id,
                            &pool_id,
                            existing.amount,
                            target,
                        )
                        .await?;
                        Ok(Some(existing.amount))
                    })
                })
                .await
                .map_err(ServiceError::from)
        })
        .await
    }

    pub async fn reservation(
        &self,
        order_id: Uuid,
    ) -> Result<Option<funding_reservation::Model>, ServiceError> {
        Ok(ReservationEntity::find_by_id(order_id).one(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pool(committed: Decimal, in_flight: Decimal) -> funding_pool::Model {
        funding_pool::Model {
            id: "default".into(),
            balance: dec!(1000),
            committed,
            in_flight,
            balance_refreshed_at: None,
            updated_at: Utc::now(),
            version: 1,
        }
    }

    fn reservation(amount: Decimal, state: ReservationState) -> funding_reservation::Model {
        funding_reservation::Model {
            order_id: Uuid::new_v4(),
            pool_id: "default".into(),
            amount,
            state,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn prior_committed_hold_is_folded_back() {
        let p = pool(dec!(500), dec!(100));
        let res = reservation(dec!(200), ReservationState::Committed);
        let snap = without_reservation(&p, Some(&res));
        assert_eq!(snap.committed, dec!(300));
        assert_eq!(snap.in_flight, dec!(100));
    }

    #[test]
    fn closed_reservations_do_not_change_totals() {
        let p = pool(dec!(500), dec!(100));
        let res = reservation(dec!(200), ReservationState::Settled);
        let snap = without_reservation(&p, Some(&res));
        assert_eq!(snap.committed, dec!(500));
        assert_eq!(snap.in_flight, dec!(100));
    }

    #[test]
    fn totals_never_go_negative() {
        let p = pool(dec!(10), dec!(0));
        let res = reservation(dec!(50), ReservationState::Committed);
        assert_eq!(without_reservation(&p, Some(&res)).committed, Decimal::ZERO);
    }
}
