//! Pair Engine (C7)
//!
//! The per-pair state machine from §4.7: `Idle → Armed → Executing →
//! Settled → (re-armed) Armed`, with `fail`/`stop`/`regenerate`
//! transitions. Owns one pair's ladder, budget, and accountant lots;
//! the Scheduler drives its `tick()` once per pair per cycle.
//!
//! Grounded in the teacher's `mempool::types::ConfirmationTracker`-style
//! owned-state-plus-method-per-transition shape, and `arbitrage::executor`
//! for the validate → quote → swap → settle sequencing (there: a
//! fire-and-forget two-leg arb; here: single-leg grid fills with
//! re-arming).
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::accountant::{CostInputs, ProfitAccountant};
use crate::amm::SwapExecutor;
use crate::error::EngineError;
use crate::oracle::PriceOracle;
use crate::planner::{self, PlanInput};
use crate::store::StateStore;
use crate::types::{
    GridLevel, GridLevelState, GridMode, GridSide, LadderState, Pair, PairBudget, PairEngineState, PairStatus,
    TradeRecord, TradeStatus,
};
use crate::validator::{self, CandidateTrade, ValidatorLimits};
use alloy::primitives::Address;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PairEngineParams {
    pub grid_mode: GridMode,
    pub scaling_factor: Decimal,
    pub range_percent: Decimal,
    pub profit_margin: Decimal,
    pub min_profit_usd: Decimal,
    pub max_concurrent_fills: usize,
    pub native_usd_symbol: String,
}

pub struct PairEngine {
    pub pair: Pair,
    owner: Address,
    state: PairEngineState,
    ladder: Option<LadderState>,
    budget: PairBudget,
    accountant: ProfitAccountant,
    params: PairEngineParams,
    previous_price: Option<Decimal>,
    last_action: String,
    ladder_generation: u32,
    next_level_id: u64,
    next_trade_id: u64,
    max_level_failures_ceiling: u32,
}

impl PairEngine {
    pub fn new(pair: Pair, owner: Address, allocated_usd: Decimal, params: PairEngineParams, max_level_failures_ceiling: u32) -> Self {
        let pair_id = pair.id;
        Self {
            pair,
            owner,
            state: PairEngineState::Idle,
            ladder: None,
            budget: PairBudget::new(pair_id, allocated_usd),
            accountant: ProfitAccountant::new(params.min_profit_usd),
            params,
            previous_price: None,
            last_action: "idle".to_string(),
            ladder_generation: 0,
            next_level_id: 1,
            next_trade_id: 1,
            max_level_failures_ceiling,
        }
    }

    /// **plan** transition (§4.7): build a fresh ladder from the Grid Planner.
    pub fn plan(&mut self, current_price: Decimal, total_investment_usd: Decimal, grid_count: usize) {
        let (min_price, max_price) = adaptive_band(current_price, self.params.range_percent);
        let input = PlanInput {
            pair_id: self.pair.id,
            min_price,
            max_price,
            count: grid_count,
            mode: self.params.grid_mode,
            total_investment_usd,
            current_price,
            scaling_factor: self.params.scaling_factor,
            next_level_id: self.next_level_id,
        };
        let ladder = planner::plan(input);
        self.next_level_id += ladder.levels.len() as u64;
        self.ladder_generation += 1;
        self.ladder = Some(ladder);
        self.state = PairEngineState::Armed;
        self.last_action = "planned".to_string();
        info!(pair_id = self.pair.id, generation = self.ladder_generation, "ladder planned");
    }

    /// **stop** transition: park the pair without discarding accounting state.
    pub fn stop(&mut self) {
        self.state = PairEngineState::Idle;
        self.last_action = "stopped".to_string();
    }

    fn regenerate_if_needed(&mut self, current_price: Decimal, total_investment_usd: Decimal, grid_count: usize) {
        let should_regen = match &self.ladder {
            Some(ladder) => planner::needs_regeneration(ladder, current_price, self.params.range_percent),
            None => true,
        };
        if should_regen {
            self.plan(current_price, total_investment_usd, grid_count);
        }
    }

    /// One scheduler cycle for this pair. Returns the trades settled this
    /// tick (zero or more, bounded by `max_concurrent_fills`).
    #[allow(clippy::too_many_arguments)]
    pub async fn tick(
        &mut self,
        oracle: &PriceOracle,
        executor: &Arc<dyn SwapExecutor>,
        store: &StateStore,
        limits: &ValidatorLimits,
        realized_day_pnl_usd: Decimal,
        total_investment_usd: Decimal,
        grid_count: usize,
        max_slippage_bps: u32,
    ) -> Vec<TradeRecord> {
        if self.state == PairEngineState::Idle {
            return Vec::new();
        }

        let price_sample = match oracle.get_pair_price(&self.pair.base.symbol, &self.pair.quote.symbol).await {
            Ok(sample) => sample,
            Err(EngineError::PriceUnavailable { .. }) => {
                self.last_action = "skipped:price".to_string();
                return Vec::new();
            }
            Err(_) => {
                self.last_action = "skipped:price".to_string();
                return Vec::new();
            }
        };
        let current_price = price_sample.price;

        self.regenerate_if_needed(current_price, total_investment_usd, grid_count);

        let previous_price = self.previous_price.unwrap_or(current_price);
        self.previous_price = Some(current_price);

        let hits = self.find_hits(previous_price, current_price);
        if hits.is_empty() {
            self.last_action = "no_hit".to_string();
            return Vec::new();
        }

        let mut settled = Vec::new();
        for level_index in hits.into_iter().take(self.params.max_concurrent_fills) {
            if let Some(trade) = self
                .execute_level(
                    level_index,
                    current_price,
                    executor,
                    limits,
                    realized_day_pnl_usd,
                    max_slippage_bps,
                )
                .await
            {
                if let Err(e) = store.append_trade(&trade) {
                    warn!(pair_id = self.pair.id, error = %e, "failed to append trade journal");
                }
                settled.push(trade);
            }
        }

        if let Some(ladder) = &self.ladder {
            if let Err(e) = store.write_ladder(ladder) {
                warn!(pair_id = self.pair.id, error = %e, "failed to write ladder snapshot");
            }
        }

        settled
    }

    /// **hit** transition (§4.7): levels whose price the market just crossed.
    fn find_hits(&self, previous_price: Decimal, current_price: Decimal) -> Vec<usize> {
        let Some(ladder) = &self.ladder else { return Vec::new() };

        let mut hits: Vec<(usize, Decimal)> = ladder
            .levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.state == GridLevelState::Armed)
            .filter(|(_, l)| match l.side {
                GridSide::Buy => previous_price >= l.price && current_price <= l.price,
                GridSide::Sell => previous_price <= l.price && current_price >= l.price,
            })
            .map(|(i, l)| (i, (l.price - current_price).abs()))
            .collect();

        hits.sort_by(|a, b| a.1.cmp(&b.1));
        hits.into_iter().map(|(i, _)| i).collect()
    }

    /// **Executing** → **ok**/**fail** (§4.7): validate, quote, swap, settle.
    #[allow(clippy::too_many_arguments)]
    async fn execute_level(
        &mut self,
        level_index: usize,
        current_price: Decimal,
        executor: &Arc<dyn SwapExecutor>,
        limits: &ValidatorLimits,
        realized_day_pnl_usd: Decimal,
        max_slippage_bps: u32,
    ) -> Option<TradeRecord> {
        self.state = PairEngineState::Executing;
        let now = Utc::now();

        let (side, price, quantity) = {
            let ladder = self.ladder.as_mut()?;
            let level = ladder.levels.get_mut(level_index)?;
            level.state = GridLevelState::Executing;
            (level.side, level.price, level.quantity)
        };

        // `quantity` units depend on side (planner §4.4): a Buy level's quantity is
        // already a quote-token/USD amount, a Sell level's is a base-token amount.
        let (in_token, out_token, amount_in, estimated_usd) = match side {
            GridSide::Buy => (self.pair.quote.clone(), self.pair.base.clone(), quantity, quantity),
            GridSide::Sell => (self.pair.base.clone(), self.pair.quote.clone(), quantity, quantity * price),
        };

        let in_token_balance = match executor.balance_of(&in_token, self.owner).await {
            Ok(balance) => balance,
            Err(e) => {
                self.fail_level(level_index, now);
                warn!(pair_id = self.pair.id, level_index, error = %e, "balance check failed");
                return None;
            }
        };

        let candidate = CandidateTrade {
            pair_id: self.pair.id,
            price,
            mid_price: current_price,
            estimated_usd,
            amount_in,
            in_token_balance,
        };

        if let Err(e) = validator::validate(&candidate, limits, &self.budget, realized_day_pnl_usd, estimated_usd) {
            self.fail_level(level_index, now);
            warn!(pair_id = self.pair.id, level_index, error = %e, "validator denied candidate");
            return None;
        }

        let quote = match executor.quote_exact_input(&in_token, &out_token, amount_in, self.pair.pool_fee_bps).await {
            Ok(q) => q,
            Err(e) => {
                self.fail_level(level_index, now);
                warn!(pair_id = self.pair.id, level_index, error = %e, "quote failed");
                return None;
            }
        };

        let slippage_tolerance = Decimal::from(max_slippage_bps) / Decimal::from(10_000);
        let amount_out_minimum = quote.amount_out * (Decimal::ONE - slippage_tolerance);

        self.budget.commit(estimated_usd);

        let outcome = match executor
            .exact_input_single(&in_token, &out_token, amount_in, amount_out_minimum, quote.fee_tier)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.budget.release(estimated_usd);
                self.fail_level(level_index, now);
                warn!(pair_id = self.pair.id, level_index, error = %e, "swap failed");
                return None;
            }
        };

        let cost_inputs = CostInputs {
            usd_value: estimated_usd,
            pool_fee_bps: self.pair.pool_fee_bps,
            gas_used: outcome.gas_used,
            effective_gas_price_wei: Decimal::new(20, 9),
            native_usd: Decimal::ZERO,
            expected_out: quote.amount_out,
            actual_out: outcome.amount_out,
            out_token_usd: Decimal::ONE,
        };
        let settlement = self.accountant.settle(self.pair.id, side, quantity, price, &cost_inputs);

        {
            let ladder = self.ladder.as_mut()?;
            let level = ladder.levels.get_mut(level_index)?;
            level.record_fill(outcome.tx_hash.clone(), now);
        }

        self.rearm_opposite(level_index, price, settlement.below_min_profit);

        self.last_action = format!("filled:{side}");
        self.state = PairEngineState::Armed;

        let trade_id = self.next_trade_id;
        self.next_trade_id += 1;

        Some(TradeRecord {
            id: trade_id,
            pair_id: self.pair.id,
            grid_id: self.ladder.as_ref().map(|l| l.levels[level_index].id).unwrap_or(0),
            side,
            in_token: in_token.symbol,
            out_token: out_token.symbol,
            amount_in,
            amount_out: outcome.amount_out,
            execution_price: price,
            usd_value: estimated_usd,
            pool_fee_usd: settlement.pool_fee_usd,
            gas_usd: settlement.gas_usd,
            slippage_usd: settlement.slippage_usd,
            total_cost_usd: settlement.total_cost_usd,
            net_profit_usd: settlement.net_profit_usd,
            tx_hash: outcome.tx_hash,
            block_number: 0,
            status: if outcome.reverted { TradeStatus::Reverted } else { TradeStatus::Success },
            timestamp: now,
        })
    }

    fn fail_level(&mut self, level_index: usize, now: chrono::DateTime<Utc>) {
        self.state = PairEngineState::Armed;
        if let Some(ladder) = self.ladder.as_mut() {
            if let Some(level) = ladder.levels.get_mut(level_index) {
                level.record_failure(now);
            }
        }
    }

    /// **ok** transition's re-arm (§4.7): arm the opposing level one grid
    /// step away in the profit direction, overriding the planner's
    /// original arm for that index. Widens spacing by one step when the
    /// fill's net profit fell below the configured minimum.
    fn rearm_opposite(&mut self, filled_index: usize, fill_price: Decimal, widen: bool) {
        let Some(ladder) = self.ladder.as_mut() else { return };
        let Some(filled_level) = ladder.levels.get(filled_index).cloned() else { return };

        let step_multiplier = if widen { Decimal::TWO } else { Decimal::ONE };
        let margin = self.params.profit_margin * step_multiplier;

        let opposite_side = match filled_level.side {
            GridSide::Buy => GridSide::Sell,
            GridSide::Sell => GridSide::Buy,
        };
        let opposite_price = match opposite_side {
            GridSide::Sell => fill_price * (Decimal::ONE + margin / Decimal::from(100)),
            GridSide::Buy => fill_price * (Decimal::ONE - margin / Decimal::from(100)),
        };

        // `quantity` units flip with side (planner §4.4): a Buy level's quantity is a
        // quote-token/USD amount, a Sell level's is a base-token amount. Convert the
        // filled level's USD size into the opposing side's unit before re-arming.
        let usd_size = match filled_level.side {
            GridSide::Buy => filled_level.quantity,
            GridSide::Sell => filled_level.quantity * fill_price,
        };
        let opposite_quantity = match opposite_side {
            GridSide::Buy => usd_size,
            GridSide::Sell => usd_size / opposite_price,
        };

        let now = Utc::now();
        let new_level = GridLevel {
            id: self.next_level_id,
            pair_id: self.pair.id,
            level_index: filled_index,
            price: opposite_price,
            quantity: opposite_quantity,
            side: opposite_side,
            state: GridLevelState::Armed,
            failure_count: 0,
            created_at: now,
            updated_at: now,
            filled_tx_hash: None,
        };
        self.next_level_id += 1;
        ladder.levels[filled_index] = new_level;
    }

    pub fn status(&self) -> PairStatus {
        let active_levels = self.ladder.as_ref().map(|l| l.armed_levels().count()).unwrap_or(0);
        PairStatus {
            pair_id: self.pair.id,
            state: self.state,
            ladder_generation: self.ladder_generation,
            active_levels,
            last_action: self.last_action.clone(),
            budget: self.budget.clone(),
        }
    }

    /// Disable the pair entirely when the ladder's aggregate failure
    /// count crosses the configured ceiling (§4.8 global cap).
    pub fn total_failures(&self) -> u32 {
        self.ladder.as_ref().map(|l| l.levels.iter().map(|lv| lv.failure_count as u32).sum()).unwrap_or(0)
    }

    pub fn exceeds_failure_ceiling(&self) -> bool {
        self.total_failures() > self.max_level_failures_ceiling
    }
}

fn adaptive_band(current_price: Decimal, range_pct: Decimal) -> (Decimal, Decimal) {
    let delta = current_price * range_pct / Decimal::from(100);
    (current_price - delta, current_price + delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Token;
    use alloy::primitives::Address;
    use rust_decimal_macros::dec;

    fn pair() -> Pair {
        Pair {
            id: 1,
            base: Token::new("WETH", Address::ZERO, 18, false),
            quote: Token::new("USDC", Address::ZERO, 6, false),
            pool_address: Address::ZERO,
            pool_fee_bps: 3000,
            enabled: true,
        }
    }

    fn params() -> PairEngineParams {
        PairEngineParams {
            grid_mode: GridMode::Geometric,
            scaling_factor: dec!(1),
            range_percent: dec!(10),
            profit_margin: dec!(0.5),
            min_profit_usd: dec!(0),
            max_concurrent_fills: 1,
            native_usd_symbol: "WETH".to_string(),
        }
    }

    #[test]
    fn plan_arms_ladder_and_transitions_to_armed() {
        let mut engine = PairEngine::new(pair(), Address::ZERO, dec!(1000), params(), 20);
        engine.plan(dec!(1500), dec!(1000), 10);
        assert_eq!(engine.status().state, PairEngineState::Armed);
        assert!(engine.ladder.as_ref().unwrap().is_monotonic());
    }

    #[test]
    fn cross_detection_finds_exactly_one_hit() {
        let mut engine = PairEngine::new(pair(), Address::ZERO, dec!(1000), params(), 20);
        engine.plan(dec!(0.000380), dec!(1000), 10);
        // Force a known armed Buy level for a deterministic hit test.
        if let Some(ladder) = engine.ladder.as_mut() {
            ladder.levels.clear();
            ladder.mid_reference = dec!(0.000380);
            ladder.levels.push(GridLevel {
                id: 1,
                pair_id: 1,
                level_index: 0,
                price: dec!(0.000375),
                quantity: dec!(1),
                side: GridSide::Buy,
                state: GridLevelState::Armed,
                failure_count: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                filled_tx_hash: None,
            });
            ladder.levels.push(GridLevel {
                id: 2,
                pair_id: 1,
                level_index: 1,
                price: dec!(0.000385),
                quantity: dec!(1),
                side: GridSide::Sell,
                state: GridLevelState::Armed,
                failure_count: 0,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                filled_tx_hash: None,
            });
        }

        let hits = engine.find_hits(dec!(0.000380), dec!(0.000370));
        assert_eq!(hits, vec![0]);
    }

    #[test]
    fn failure_disables_level_after_three_ticks() {
        let mut engine = PairEngine::new(pair(), Address::ZERO, dec!(1000), params(), 20);
        engine.plan(dec!(1500), dec!(1000), 10);
        let now = Utc::now();
        engine.fail_level(0, now);
        engine.fail_level(0, now);
        engine.fail_level(0, now);
        let level = &engine.ladder.as_ref().unwrap().levels[0];
        assert_eq!(level.state, GridLevelState::Disabled);
    }
}
