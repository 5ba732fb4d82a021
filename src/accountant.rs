//! Profit Accountant (C6)
//!
//! FIFO lot tracking per pair. A fill on one side pushes a lot; a fill on
//! the opposite side pops lots in order and realizes profit against the
//! actual cost stack (pool fee, gas, slippage) — never a hardcoded
//! estimate.
//!
//! Grounded in the teacher's `tax::rp2_export` FIFO cost-basis matching
//! (buys form a lot queue, sells consume it in order for tax lots), here
//! adapted from a once-per-transfer tax calculation into a live,
//! in-memory per-pair ledger the Pair Engine consults every fill.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::types::{GridSide, TradeStatus};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::info;

#[derive(Debug, Clone)]
struct Lot {
    quantity: Decimal,
    entry_price: Decimal,
    entry_usd_cost: Decimal,
}

#[derive(Debug, Clone)]
pub struct CostInputs {
    pub usd_value: Decimal,
    pub pool_fee_bps: u32,
    pub gas_used: u64,
    pub effective_gas_price_wei: Decimal,
    pub native_usd: Decimal,
    pub expected_out: Decimal,
    pub actual_out: Decimal,
    pub out_token_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub realized_gross_usd: Decimal,
    pub pool_fee_usd: Decimal,
    pub gas_usd: Decimal,
    pub slippage_usd: Decimal,
    pub total_cost_usd: Decimal,
    pub net_profit_usd: Decimal,
    /// True when `net_profit_usd` fell below the configured minimum — the
    /// caller must widen the next arm's spacing by one grid step.
    pub below_min_profit: bool,
}

pub struct ProfitAccountant {
    lots: HashMap<u32, VecDeque<Lot>>,
    min_profit_usd: Decimal,
}

impl ProfitAccountant {
    pub fn new(min_profit_usd: Decimal) -> Self {
        Self { lots: HashMap::new(), min_profit_usd }
    }

    /// `costs(...)` (§4.6): always computed from the actual fill, never estimated.
    pub fn costs(inputs: &CostInputs) -> (Decimal, Decimal, Decimal) {
        let pool_fee_usd = inputs.usd_value * Decimal::from(inputs.pool_fee_bps) / Decimal::from(10_000);
        let gas_usd = Decimal::from(inputs.gas_used) * inputs.effective_gas_price_wei * inputs.native_usd;
        let slippage_usd = (inputs.expected_out - inputs.actual_out).abs() * inputs.out_token_usd;
        (pool_fee_usd, gas_usd, slippage_usd)
    }

    /// Settle a fill: a Buy pushes a new lot, a Sell consumes lots FIFO
    /// and realizes gross profit on the consumed quantity. Costs are
    /// deducted from gross to produce `net_profit_usd` regardless of side.
    pub fn settle(&mut self, pair_id: u32, side: GridSide, quantity: Decimal, price: Decimal, inputs: &CostInputs) -> SettlementResult {
        let (pool_fee_usd, gas_usd, slippage_usd) = Self::costs(inputs);
        let total_cost_usd = pool_fee_usd + gas_usd + slippage_usd;

        let realized_gross_usd = match side {
            GridSide::Buy => {
                let queue = self.lots.entry(pair_id).or_default();
                queue.push_back(Lot { quantity, entry_price: price, entry_usd_cost: quantity * price });
                Decimal::ZERO
            }
            GridSide::Sell => self.consume_lots(pair_id, quantity, price),
        };

        let net_profit_usd = realized_gross_usd - total_cost_usd;
        let below_min_profit = net_profit_usd < self.min_profit_usd;

        if below_min_profit {
            info!(pair_id, %net_profit_usd, "fill below minimum profit, next arm widens spacing");
        }

        SettlementResult {
            realized_gross_usd,
            pool_fee_usd,
            gas_usd,
            slippage_usd,
            total_cost_usd,
            net_profit_usd,
            below_min_profit,
        }
    }

    fn consume_lots(&mut self, pair_id: u32, mut quantity: Decimal, exit_price: Decimal) -> Decimal {
        let queue = self.lots.entry(pair_id).or_default();
        let mut realized = Decimal::ZERO;

        while quantity > Decimal::ZERO {
            let Some(front) = queue.front_mut() else { break };
            let consumed = quantity.min(front.quantity);
            realized += consumed * (exit_price - front.entry_price);
            front.quantity -= consumed;
            quantity -= consumed;
            if front.quantity <= Decimal::ZERO {
                queue.pop_front();
            }
        }

        realized
    }

    pub fn open_quantity(&self, pair_id: u32) -> Decimal {
        self.lots.get(&pair_id).map(|q| q.iter().map(|l| l.quantity).sum()).unwrap_or(Decimal::ZERO)
    }

    /// Replay a trade journal into a fresh ledger (§8 idempotence law).
    /// Produces the same open-lot state as live settlement would have.
    pub fn replay(&mut self, trades: &[crate::types::TradeRecord]) {
        for trade in trades {
            if trade.status != TradeStatus::Success {
                continue;
            }
            let inputs = CostInputs {
                usd_value: trade.usd_value,
                pool_fee_bps: 0,
                gas_used: 0,
                effective_gas_price_wei: Decimal::ZERO,
                native_usd: Decimal::ZERO,
                expected_out: trade.amount_out,
                actual_out: trade.amount_out,
                out_token_usd: Decimal::ZERO,
            };
            self.settle(trade.pair_id, trade.side, trade.amount_out.min(trade.amount_in), trade.execution_price, &inputs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn zero_cost_inputs(usd_value: Decimal) -> CostInputs {
        CostInputs {
            usd_value,
            pool_fee_bps: 0,
            gas_used: 0,
            effective_gas_price_wei: Decimal::ZERO,
            native_usd: Decimal::ZERO,
            expected_out: Decimal::ZERO,
            actual_out: Decimal::ZERO,
            out_token_usd: Decimal::ZERO,
        }
    }

    #[test]
    fn buy_then_sell_realizes_exact_profit() {
        let mut accountant = ProfitAccountant::new(Decimal::ZERO);
        accountant.settle(1, GridSide::Buy, dec!(1), dec!(100), &zero_cost_inputs(dec!(100)));
        let result = accountant.settle(1, GridSide::Sell, dec!(1), dec!(105), &zero_cost_inputs(dec!(105)));
        assert_eq!(result.realized_gross_usd, dec!(5));
        assert_eq!(result.net_profit_usd, dec!(5));
    }

    #[test]
    fn cost_accounting_matches_scenario() {
        let inputs = CostInputs {
            usd_value: dec!(100),
            pool_fee_bps: 30,
            gas_used: 120_000,
            effective_gas_price_wei: Decimal::new(20, 9), // 20e-9 (gwei expressed as fraction of native unit)
            native_usd: dec!(45),
            expected_out: dec!(1.0),
            actual_out: dec!(0.999),
            out_token_usd: dec!(100),
        };
        let (pool_fee_usd, gas_usd, slippage_usd) = ProfitAccountant::costs(&inputs);
        assert_eq!(pool_fee_usd, dec!(0.30));
        assert_eq!(gas_usd, dec!(0.108));
        assert_eq!(slippage_usd, dec!(0.1));
        let total = pool_fee_usd + gas_usd + slippage_usd;
        assert_eq!(total, dec!(0.508));
    }

    #[test]
    fn fifo_consumes_oldest_lot_first() {
        let mut accountant = ProfitAccountant::new(Decimal::ZERO);
        accountant.settle(1, GridSide::Buy, dec!(1), dec!(100), &zero_cost_inputs(dec!(100)));
        accountant.settle(1, GridSide::Buy, dec!(1), dec!(110), &zero_cost_inputs(dec!(110)));
        let result = accountant.settle(1, GridSide::Sell, dec!(1), dec!(120), &zero_cost_inputs(dec!(120)));
        // first lot (entry 100) consumed first, not the second (entry 110)
        assert_eq!(result.realized_gross_usd, dec!(20));
        assert_eq!(accountant.open_quantity(1), dec!(1));
    }

    #[test]
    fn below_min_profit_is_flagged() {
        let mut accountant = ProfitAccountant::new(dec!(10));
        accountant.settle(1, GridSide::Buy, dec!(1), dec!(100), &zero_cost_inputs(dec!(100)));
        let result = accountant.settle(1, GridSide::Sell, dec!(1), dec!(102), &zero_cost_inputs(dec!(102)));
        assert!(result.below_min_profit);
    }
}
