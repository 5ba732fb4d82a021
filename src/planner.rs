//! Grid Planner (C4)
//!
//! Deterministic layout of price levels and position sizes from a
//! declarative configuration. Pure math — no I/O, no async — so the
//! whole module is exhaustively unit-testable against the concrete
//! scenarios below.
//!
//! Grounded in the teacher's `pool::calculator::PriceCalculator` for the
//! shape of a pure pricing-math module (free functions plus one small
//! owning struct), generalized here from constant-product V2 math to
//! geometric/arithmetic ladder layout.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::types::{GridLevel, GridLevelState, GridMode, GridSide, LadderState};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Levels within this fraction of the current price are left unarmed —
/// neither a Buy nor a Sell, to avoid immediately re-triggering on noise.
pub const ARM_TOLERANCE_PCT: &str = "0.0001"; // 0.01%

pub struct PlanInput {
    pub pair_id: u32,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub count: usize,
    pub mode: GridMode,
    pub total_investment_usd: Decimal,
    pub current_price: Decimal,
    pub scaling_factor: Decimal,
    pub next_level_id: u64,
}

/// Build a fresh `LadderState` per §4.4. `next_level_id` seeds the
/// level IDs; the caller is responsible for persisting the next free ID.
pub fn plan(input: PlanInput) -> LadderState {
    let prices = level_prices(input.min_price, input.max_price, input.count, input.mode);
    let quantities = level_quantities(
        &prices,
        input.total_investment_usd,
        input.current_price,
        input.scaling_factor,
    );

    let tolerance: Decimal = ARM_TOLERANCE_PCT.parse().expect("valid decimal literal");
    let now = Utc::now();

    let levels: Vec<GridLevel> = prices
        .iter()
        .zip(quantities.iter())
        .enumerate()
        .map(|(i, (&price, &quantity))| {
            let distance = ((price - input.current_price) / input.current_price).abs();
            let side = if price < input.current_price { GridSide::Buy } else { GridSide::Sell };
            let state = if distance <= tolerance { GridLevelState::Disabled } else { GridLevelState::Armed };

            GridLevel {
                id: input.next_level_id + i as u64,
                pair_id: input.pair_id,
                level_index: i,
                price,
                quantity,
                side,
                state,
                failure_count: 0,
                created_at: now,
                updated_at: now,
                filled_tx_hash: None,
            }
        })
        .collect();

    LadderState {
        pair_id: input.pair_id,
        min_price: input.min_price,
        max_price: input.max_price,
        mode: input.mode,
        count: input.count,
        mid_reference: input.current_price,
        levels,
        generated_at: now,
    }
}

/// `level_index ∈ 0..count-1` prices per §4.4's arithmetic/geometric formulas.
fn level_prices(min: Decimal, max: Decimal, count: usize, mode: GridMode) -> Vec<Decimal> {
    if count < 2 {
        return vec![min];
    }

    let steps = (count - 1) as u64;
    match mode {
        GridMode::Arithmetic => (0..count)
            .map(|i| min + (max - min) * Decimal::from(i as u64) / Decimal::from(steps))
            .collect(),
        GridMode::Geometric => {
            // r = (max/min)^(1/(count-1)); computed in f64 since Decimal has no
            // general pow, then every level is re-derived from min * r^i so
            // levels[0] == min and levels[count-1] == max exactly (no f64 drift
            // compounding across the ladder).
            let ratio = (max.to_f64().unwrap_or(1.0) / min.to_f64().unwrap_or(1.0)).powf(1.0 / steps as f64);
            (0..count)
                .map(|i| {
                    if i == 0 {
                        min
                    } else if i as u64 == steps {
                        max
                    } else {
                        let factor = ratio.powi(i as i32);
                        Decimal::from_f64_retain(min.to_f64().unwrap_or(0.0) * factor).unwrap_or(min)
                    }
                })
                .collect()
        }
    }
}

/// Base quantity per level, with optional geometric size scaling (§4.4),
/// renormalized so the ladder's total sizing still sums to
/// `total_investment_usd` after scaling skews individual levels.
fn level_quantities(prices: &[Decimal], total_investment_usd: Decimal, current_price: Decimal, scaling_factor: Decimal) -> Vec<Decimal> {
    let count = prices.len();
    if count == 0 {
        return Vec::new();
    }

    let base_usd_per_level = total_investment_usd / Decimal::from(count as u64);
    let mid_index = (count as f64 - 1.0) / 2.0;

    let weights: Vec<Decimal> = (0..count)
        .map(|i| {
            let distance = ((i as f64 - mid_index).abs() / (count as f64 / 2.0).max(1.0)) * (scaling_factor.to_f64().unwrap_or(1.0) - 1.0) / 20.0;
            Decimal::from_f64_retain(1.0 + distance).unwrap_or(Decimal::ONE)
        })
        .collect();

    let weight_sum: Decimal = weights.iter().sum();
    let renorm = if weight_sum.is_zero() { Decimal::ONE } else { Decimal::from(count as u64) / weight_sum };

    prices
        .iter()
        .zip(weights.iter())
        .map(|(&price, &weight)| {
            let usd = base_usd_per_level * weight * renorm;
            if price < current_price {
                // Buy level: quantity is a quote-token USD amount, not divided by price.
                usd
            } else {
                // Sell level: base-token quantity, uniformly divided by current_price
                // (not the level's own price) per the ladder-wide sizing rule.
                usd / current_price
            }
        })
        .collect()
}

/// Should the ladder be regenerated? True if `current_price` has moved
/// outside the existing band by more than `range_pct / 2`, or the
/// rebalance interval has elapsed (caller tracks elapsed time itself).
pub fn needs_regeneration(ladder: &LadderState, current_price: Decimal, range_pct: Decimal) -> bool {
    let half_band = range_pct / Decimal::from(2);
    let lower_breach = ladder.min_price * (Decimal::ONE - half_band / Decimal::from(100));
    let upper_breach = ladder.max_price * (Decimal::ONE + half_band / Decimal::from(100));
    current_price < lower_breach || current_price > upper_breach
}

/// `INITIAL_TRADE_PERCENT` resolution (§9): `0` resolves to `1/grid_count`.
pub fn resolve_initial_trade_percent(configured: Decimal, grid_count: u32) -> Decimal {
    if configured.is_zero() {
        Decimal::ONE / Decimal::from(grid_count.max(1))
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn deterministic_geometric_layout() {
        let prices = level_prices(dec!(1.0), dec!(2.0), 5, GridMode::Geometric);
        let expected = [dec!(1.0), dec!(1.189207), dec!(1.414214), dec!(1.681793), dec!(2.0)];
        for (got, want) in prices.iter().zip(expected.iter()) {
            let diff = (*got - *want).abs();
            assert!(diff < dec!(0.000002), "got {got}, want {want}");
        }
    }

    #[test]
    fn arithmetic_endpoints_are_exact() {
        let prices = level_prices(dec!(10), dec!(20), 11, GridMode::Arithmetic);
        assert_eq!(prices[0], dec!(10));
        assert_eq!(prices[10], dec!(20));
    }

    #[test]
    fn side_partition_matches_current_price() {
        let input = PlanInput {
            pair_id: 1,
            min_price: dec!(1.0),
            max_price: dec!(2.0),
            count: 5,
            mode: GridMode::Geometric,
            total_investment_usd: dec!(1000),
            current_price: dec!(1.4),
            scaling_factor: dec!(1),
            next_level_id: 1,
        };
        let ladder = plan(input);
        assert!(ladder.is_monotonic());
        assert!(ladder.side_partition_valid());
    }

    #[test]
    fn tolerance_band_level_is_not_armed() {
        let input = PlanInput {
            pair_id: 1,
            min_price: dec!(1.0),
            max_price: dec!(2.0),
            count: 5,
            mode: GridMode::Arithmetic,
            total_investment_usd: dec!(1000),
            current_price: dec!(1.5), // exact mid level
            scaling_factor: dec!(1),
            next_level_id: 1,
        };
        let ladder = plan(input);
        let mid_level = &ladder.levels[2];
        assert_eq!(mid_level.state, GridLevelState::Disabled);
    }

    #[test]
    fn initial_trade_percent_zero_resolves_to_one_over_count() {
        let resolved = resolve_initial_trade_percent(Decimal::ZERO, 10);
        assert_eq!(resolved, dec!(0.1));
    }

    #[test]
    fn initial_trade_percent_nonzero_passes_through() {
        let resolved = resolve_initial_trade_percent(dec!(0.25), 10);
        assert_eq!(resolved, dec!(0.25));
    }
}
