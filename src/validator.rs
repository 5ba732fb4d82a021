//! Trade Validator (C5)
//!
//! Five ordered checks a candidate trade must clear before it reaches the
//! AMM Client. Fails fast on the first violation and names it — the
//! caller bumps the grid level's `failure_count` on denial.
//!
//! Grounded in the teacher's `filters::whitelist::PoolWhitelist` for the
//! shape of an ordered-gate checker (`is_pool_allowed` style boolean
//! checks backed by named reasons), generalized from pool/liquidity
//! filters to the five USD/budget/balance checks this spec requires.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::error::EngineError;
use crate::types::PairBudget;
use rust_decimal::Decimal;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CandidateTrade {
    pub pair_id: u32,
    pub price: Decimal,
    pub mid_price: Decimal,
    pub estimated_usd: Decimal,
    pub amount_in: Decimal,
    pub in_token_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct ValidatorLimits {
    pub band_pct: Decimal,
    pub min_usd: Decimal,
    pub max_usd: Decimal,
    pub max_daily_loss_usd: Decimal,
}

impl Default for ValidatorLimits {
    fn default() -> Self {
        Self {
            band_pct: Decimal::new(50, 0),
            min_usd: Decimal::ONE,
            max_usd: Decimal::from(200),
            max_daily_loss_usd: Decimal::from(100),
        }
    }
}

/// Run the five ordered checks from §4.5. Returns `Ok(())` only if every
/// check passes; otherwise the first violation is returned as an
/// `EngineError` carrying its specific reason.
pub fn validate(
    candidate: &CandidateTrade,
    limits: &ValidatorLimits,
    budget: &PairBudget,
    realized_day_pnl_usd: Decimal,
    estimated_cost_usd: Decimal,
) -> Result<(), EngineError> {
    // 1. Price plausibility
    let deviation = ((candidate.price - candidate.mid_price) / candidate.mid_price).abs();
    if deviation > limits.band_pct / Decimal::from(100) {
        warn!(pair_id = candidate.pair_id, %deviation, "validator: price implausible");
        return Err(EngineError::ValidationFailed(format!(
            "price {} deviates {}% from mid {}, band is {}%",
            candidate.price, deviation * Decimal::from(100), candidate.mid_price, limits.band_pct
        )));
    }

    // 2. USD sizing
    if candidate.estimated_usd < limits.min_usd || candidate.estimated_usd > limits.max_usd {
        warn!(pair_id = candidate.pair_id, usd = %candidate.estimated_usd, "validator: USD size out of bounds");
        return Err(EngineError::ValidationFailed(format!(
            "usd value {} outside [{}, {}]",
            candidate.estimated_usd, limits.min_usd, limits.max_usd
        )));
    }

    // 3. Pair budget
    if !budget.can_commit(candidate.estimated_usd) {
        warn!(pair_id = candidate.pair_id, "validator: budget exceeded");
        return Err(EngineError::BudgetExceeded { pair_id: candidate.pair_id });
    }

    // 4. Global daily loss
    if realized_day_pnl_usd - estimated_cost_usd < -limits.max_daily_loss_usd {
        warn!(pair_id = candidate.pair_id, "validator: global daily loss limit breached");
        return Err(EngineError::ValidationFailed(format!(
            "projected day pnl {} would breach daily loss limit {}",
            realized_day_pnl_usd - estimated_cost_usd, limits.max_daily_loss_usd
        )));
    }

    // 5. Balance sufficiency
    let safety_factor = if budget.allocated_usd < Decimal::from(200) { Decimal::new(8, 1) } else { Decimal::new(9, 1) };
    if candidate.in_token_balance * safety_factor < candidate.amount_in {
        warn!(pair_id = candidate.pair_id, "validator: insufficient balance");
        return Err(EngineError::BalanceInsufficient {
            needed: candidate.amount_in.to_string(),
            available: candidate.in_token_balance.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candidate() -> CandidateTrade {
        CandidateTrade {
            pair_id: 1,
            price: dec!(100),
            mid_price: dec!(100),
            estimated_usd: dec!(30),
            amount_in: dec!(1),
            in_token_balance: dec!(10),
        }
    }

    #[test]
    fn accepts_reasonable_candidate() {
        let budget = PairBudget::new(1, dec!(500));
        assert!(validate(&candidate(), &ValidatorLimits::default(), &budget, Decimal::ZERO, dec!(1)).is_ok());
    }

    #[test]
    fn rejects_oversized_against_budget() {
        let mut budget = PairBudget::new(1, dec!(500));
        budget.commit(dec!(480));
        let mut c = candidate();
        c.estimated_usd = dec!(30);
        let err = validate(&c, &ValidatorLimits::default(), &budget, Decimal::ZERO, dec!(1)).unwrap_err();
        assert!(matches!(err, EngineError::BudgetExceeded { pair_id: 1 }));
    }

    #[test]
    fn rejects_implausible_price() {
        let budget = PairBudget::new(1, dec!(500));
        let mut c = candidate();
        c.price = dec!(200);
        let err = validate(&c, &ValidatorLimits::default(), &budget, Decimal::ZERO, dec!(1)).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn rejects_daily_loss_breach() {
        let budget = PairBudget::new(1, dec!(500));
        let err = validate(&candidate(), &ValidatorLimits::default(), &budget, dec!(-99), dec!(5)).unwrap_err();
        assert!(matches!(err, EngineError::ValidationFailed(_)));
    }

    #[test]
    fn rejects_insufficient_balance() {
        let budget = PairBudget::new(1, dec!(500));
        let mut c = candidate();
        c.amount_in = dec!(100);
        let err = validate(&c, &ValidatorLimits::default(), &budget, Decimal::ZERO, dec!(1)).unwrap_err();
        assert!(matches!(err, EngineError::BalanceInsufficient { .. }));
    }
}
