//! Pure funding decision over a snapshot of the prepaid pool.

use crate::config::AppConfig;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct FundingPolicy {
    /// Always held back from the pool.
    pub safety_margin: Decimal,
    /// Covers vendor markup and tax on top of the order amount.
    pub buffer_multiplier: Decimal,
    pub settlement_delay: Duration,
    pub processing_offset: Duration,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            safety_margin: dec!(50.00),
            buffer_multiplier: dec!(1.10),
            settlement_delay: Duration::days(2),
            processing_offset: Duration::days(1),
        }
    }
}

impl From<&AppConfig> for FundingPolicy {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            safety_margin: cfg.funding_safety_margin,
            buffer_multiplier: cfg.funding_buffer_multiplier,
            settlement_delay: Duration::days(cfg.funding_settlement_delay_days),
            processing_offset: Duration::days(cfg.funding_processing_offset_days),
        }
    }
}

impl FundingPolicy {
    pub fn required_for(&self, amount: Decimal) -> Decimal {
        (amount * self.buffer_multiplier).round_dp(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub balance: Decimal,
    /// Held by deferred orders.
    pub committed: Decimal,
    /// Held by approved orders whose vendor charge has not settled.
    pub in_flight: Decimal,
}

impl PoolSnapshot {
    pub fn available(&self, policy: &FundingPolicy) -> Decimal {
        self.balance - self.committed - self.in_flight - policy.safety_margin
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum FundingDecision {
    Proceed {
        required: Decimal,
        available: Decimal,
    },
    Defer {
        required: Decimal,
        available: Decimal,
        expected_funding_date: DateTime<Utc>,
        scheduled_delivery_date: DateTime<Utc>,
    },
}

impl FundingDecision {
    pub fn is_proceed(&self) -> bool {
        matches!(self, FundingDecision::Proceed { .. })
    }

    pub fn hold_reason(&self) -> Option<String> {
        match self {
            FundingDecision::Proceed { .. } => None,
            FundingDecision::Defer {
                required,
                available,
                ..
            } => Some(format!(
                "Insufficient prepaid balance: order needs {} but {} is available",
                required, available
            )),
        }
    }
}

/// Proceed iff `amount * buffer_multiplier <= available`.
pub fn evaluate(
    policy: &FundingPolicy,
    pool: &PoolSnapshot,
    amount: Decimal,
    now: DateTime<Utc>,
) -> FundingDecision {
    let required = policy.required_for(amount);
    let available = pool.available(policy);

    if required <= available {
        FundingDecision::Proceed {
            required,
            available,
        }
    } else {
        let expected_funding_date = now + policy.settlement_delay;
        FundingDecision::Defer {
            required,
            available,
            expected_funding_date,
            scheduled_delivery_date: expected_funding_date + policy.processing_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pool(balance: Decimal) -> PoolSnapshot {
        PoolSnapshot {
            balance,
            committed: Decimal::ZERO,
            in_flight: Decimal::ZERO,
        }
    }

    #[test]
    fn proceeds_when_pool_covers_buffered_amount() {
        let decision = evaluate(&FundingPolicy::default(), &pool(dec!(10000)), dec!(100), Utc::now());
        assert_matches!(decision, FundingDecision::Proceed { required, .. } if required == dec!(110.00));
    }

    #[test]
    fn defers_with_future_dates_when_short() {
        // 350 balance - 50 margin = 300 available
        let now = Utc::now();
        let policy = FundingPolicy::default();
        let decision = evaluate(&policy, &pool(dec!(350)), dec!(500), now);
        match decision {
            FundingDecision::Defer {
                available,
                expected_funding_date,
                scheduled_delivery_date,
                ..
            } => {
                assert_eq!(available, dec!(300));
                assert!(expected_funding_date > now);
                assert_eq!(expected_funding_date, now + Duration::days(2));
                assert_eq!(scheduled_delivery_date - expected_funding_date, Duration::days(1));
            }
            other => panic!("expected defer, got {:?}", other),
        }
    }

    #[test]
    fn committed_and_in_flight_reduce_availability() {
        let snapshot = PoolSnapshot {
            balance: dec!(1000),
            committed: dec!(400),
            in_flight: dec!(300),
        };
        let policy = FundingPolicy::default();
        assert_eq!(snapshot.available(&policy), dec!(250));
        assert!(evaluate(&policy, &snapshot, dec!(200), Utc::now()).is_proceed());
        assert!(!evaluate(&policy, &snapshot, dec!(230), Utc::now()).is_proceed());
    }

    #[test]
    fn boundary_is_inclusive() {
        let policy = FundingPolicy {
            safety_margin: Decimal::ZERO,
            buffer_multiplier: Decimal::ONE,
            ..Default::default()
        };
        assert!(evaluate(&policy, &pool(dec!(100)), dec!(100), Utc::now()).is_proceed());
        assert!(!evaluate(&policy, &pool(dec!(100)), dec!(100.01), Utc::now()).is_proceed());
    }
}
