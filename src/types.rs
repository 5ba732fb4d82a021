//! Core Domain Types
//!
//! Token, pair, grid level, ladder, price sample, trade record, and budget
//! types shared by every component of the grid engine.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fee tiers a Uniswap-V3-style pool may be configured at, in basis points.
pub const VALID_FEE_TIERS: [u32; 4] = [100, 500, 3000, 10000];

/// An ERC-20 (or native-asset) token tracked by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub is_native: bool,
}

impl Token {
    pub fn new(symbol: impl Into<String>, address: Address, decimals: u8, is_native: bool) -> Self {
        Self { symbol: symbol.into(), address, decimals, is_native }
    }

    /// Scale a human-readable decimal quantity to raw on-chain units.
    pub fn to_raw_units(&self, amount: Decimal) -> u128 {
        let scale = Decimal::from(10u64.pow(self.decimals as u32));
        let raw = (amount * scale).trunc();
        raw.to_string().parse().unwrap_or(0)
    }

    /// Scale raw on-chain units back to a human-readable decimal quantity.
    pub fn from_raw_units(&self, raw: u128) -> Decimal {
        let scale = Decimal::from(10u64.pow(self.decimals as u32));
        Decimal::from(raw) / scale
    }
}

/// A tradable base/quote pair on a specific pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pair {
    pub id: u32,
    pub base: Token,
    pub quote: Token,
    pub pool_address: Address,
    pub pool_fee_bps: u32,
    pub enabled: bool,
}

impl Pair {
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base.symbol, self.quote.symbol)
    }

    /// Structural validity: base != quote and fee tier is one of the four
    /// pool tiers a concentrated-liquidity AMM actually exposes.
    pub fn is_valid(&self) -> bool {
        self.base.address != self.quote.address && VALID_FEE_TIERS.contains(&self.pool_fee_bps)
    }
}

/// Which side of the ladder a level (or trade) sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridSide {
    Buy,
    Sell,
}

impl fmt::Display for GridSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridSide::Buy => write!(f, "buy"),
            GridSide::Sell => write!(f, "sell"),
        }
    }
}

/// Lifecycle state of a single grid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridLevelState {
    Armed,
    Executing,
    Filled,
    Disabled,
}

/// A single price/side/quantity point on a pair's ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridLevel {
    pub id: u64,
    pub pair_id: u32,
    pub level_index: usize,
    pub price: Decimal,
    pub quantity: Decimal,
    pub side: GridSide,
    pub state: GridLevelState,
    pub failure_count: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_tx_hash: Option<String>,
}

/// Levels fail validation or execution at most this many times before the
/// level is permanently disabled until the next planner regeneration.
pub const MAX_LEVEL_FAILURES: u8 = 3;

impl GridLevel {
    /// Record a failed validation or execution attempt; disables the level
    /// once `MAX_LEVEL_FAILURES` is reached.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.updated_at = now;
        if self.failure_count >= MAX_LEVEL_FAILURES {
            self.state = GridLevelState::Disabled;
        }
    }

    pub fn record_fill(&mut self, tx_hash: String, now: DateTime<Utc>) {
        self.state = GridLevelState::Filled;
        self.filled_tx_hash = Some(tx_hash);
        self.updated_at = now;
    }
}

/// Ladder layout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridMode {
    Geometric,
    Arithmetic,
}

/// The full armed ladder for one pair, as produced by the Grid Planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LadderState {
    pub pair_id: u32,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub mode: GridMode,
    pub count: usize,
    pub mid_reference: Decimal,
    pub levels: Vec<GridLevel>,
    pub generated_at: DateTime<Utc>,
}

impl LadderState {
    /// Ladder monotonicity invariant (§8): prices strictly increase with index.
    pub fn is_monotonic(&self) -> bool {
        self.levels.windows(2).all(|w| w[0].price < w[1].price)
    }

    /// Side partition invariant (§8): below mid is Buy, above mid is Sell.
    pub fn side_partition_valid(&self) -> bool {
        self.levels.iter().all(|l| match l.side {
            GridSide::Buy => l.price < self.mid_reference,
            GridSide::Sell => l.price > self.mid_reference,
        })
    }

    pub fn armed_levels(&self) -> impl Iterator<Item = &GridLevel> {
        self.levels.iter().filter(|l| l.state == GridLevelState::Armed)
    }
}

/// Where a `PriceSample` was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    WebSocket,
    QuoterV2,
    Cached,
}

/// How much the oracle trusts a given sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A single price observation for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub symbol: String,
    pub price: Decimal,
    pub source: PriceSource,
    pub confidence: Confidence,
    pub observed_at: DateTime<Utc>,
}

impl PriceSample {
    pub fn is_usable(&self, now: DateTime<Utc>, cache_ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.observed_at) <= cache_ttl
    }
}

/// Outcome of a submitted swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Success,
    Reverted,
}

/// A single executed (or reverted) swap, fully costed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: u64,
    pub pair_id: u32,
    pub grid_id: u64,
    pub side: GridSide,
    pub in_token: String,
    pub out_token: String,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub execution_price: Decimal,
    pub usd_value: Decimal,
    pub pool_fee_usd: Decimal,
    pub gas_usd: Decimal,
    pub slippage_usd: Decimal,
    pub total_cost_usd: Decimal,
    pub net_profit_usd: Decimal,
    pub tx_hash: String,
    pub block_number: u64,
    pub status: TradeStatus,
    pub timestamp: DateTime<Utc>,
}

/// Per-pair USD exposure accounting. Enforces the budget-safety invariant
/// `committed - released <= allocated * (1 + epsilon)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairBudget {
    pub pair_id: u32,
    pub allocated_usd: Decimal,
    pub committed_usd: Decimal,
    pub released_usd: Decimal,
    pub net_exposure_usd: Decimal,
}

/// Tolerance applied to the budget-safety invariant (2%).
pub const BUDGET_EPSILON: &str = "0.02";

impl PairBudget {
    pub fn new(pair_id: u32, allocated_usd: Decimal) -> Self {
        Self {
            pair_id,
            allocated_usd,
            committed_usd: Decimal::ZERO,
            released_usd: Decimal::ZERO,
            net_exposure_usd: Decimal::ZERO,
        }
    }

    fn epsilon(&self) -> Decimal {
        BUDGET_EPSILON.parse().expect("valid decimal literal")
    }

    /// Would committing `usd` keep the budget-safety invariant intact?
    pub fn can_commit(&self, usd: Decimal) -> bool {
        let headroom = self.allocated_usd * (Decimal::ONE + self.epsilon());
        self.committed_usd - self.released_usd + usd <= headroom
    }

    pub fn commit(&mut self, usd: Decimal) {
        self.committed_usd += usd;
        self.net_exposure_usd += usd;
    }

    pub fn release(&mut self, usd: Decimal) {
        self.released_usd += usd;
        self.net_exposure_usd -= usd;
    }

    pub fn is_within_invariant(&self) -> bool {
        self.committed_usd - self.released_usd <= self.allocated_usd * (Decimal::ONE + self.epsilon())
    }
}

/// Health of the Price Oracle's upstream sources, for status snapshots and
/// the `PriceUnavailable` escalation rule (surface after 5 consecutive misses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub last_ws_message_at: Option<DateTime<Utc>>,
    pub ws_connected: bool,
    pub consecutive_failures: u32,
    pub symbols_tracked: usize,
    pub stalest_symbol: Option<(String, i64)>,
}

/// Lifecycle state of a per-pair engine, mirroring §4.7's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairEngineState {
    Idle,
    Armed,
    Executing,
    Settled,
}

/// A point-in-time snapshot of one pair, embedded in `BotStatus`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairStatus {
    pub pair_id: u32,
    pub state: PairEngineState,
    pub ladder_generation: u32,
    pub active_levels: usize,
    pub last_action: String,
    pub budget: PairBudget,
}

/// The status snapshot written atomically on every scheduler tick (§4.9/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub started_at: DateTime<Utc>,
    pub running: bool,
    pub pairs: Vec<PairStatus>,
    pub realized_day_pnl_usd: Decimal,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn token(symbol: &str, decimals: u8) -> Token {
        Token::new(symbol, Address::ZERO, decimals, false)
    }

    #[test]
    fn pair_rejects_equal_tokens() {
        let t = token("WETH", 18);
        let pair = Pair {
            id: 1,
            base: t.clone(),
            quote: t,
            pool_address: Address::ZERO,
            pool_fee_bps: 3000,
            enabled: true,
        };
        assert!(!pair.is_valid());
    }

    #[test]
    fn pair_rejects_unknown_fee_tier() {
        let pair = Pair {
            id: 1,
            base: token("WETH", 18),
            quote: token("USDC", 6),
            pool_address: Address::ZERO,
            pool_fee_bps: 1234,
            enabled: true,
        };
        assert!(!pair.is_valid());
    }

    #[test]
    fn pair_accepts_known_fee_tiers() {
        for fee in VALID_FEE_TIERS {
            let pair = Pair {
                id: 1,
                base: token("WETH", 18),
                quote: token("USDC", 6),
                pool_address: Address::ZERO,
                pool_fee_bps: fee,
                enabled: true,
            };
            assert!(pair.is_valid());
        }
    }

    #[test]
    fn level_disables_after_three_failures() {
        let now = Utc::now();
        let mut level = GridLevel {
            id: 1,
            pair_id: 1,
            level_index: 0,
            price: dec!(1.0),
            quantity: dec!(1.0),
            side: GridSide::Buy,
            state: GridLevelState::Armed,
            failure_count: 0,
            created_at: now,
            updated_at: now,
            filled_tx_hash: None,
        };

        level.record_failure(now);
        assert_eq!(level.state, GridLevelState::Armed);
        level.record_failure(now);
        assert_eq!(level.state, GridLevelState::Armed);
        level.record_failure(now);
        assert_eq!(level.state, GridLevelState::Disabled);
    }

    #[test]
    fn budget_commit_respects_epsilon() {
        let mut budget = PairBudget::new(1, dec!(500));
        budget.commit(dec!(480));
        assert!(budget.can_commit(dec!(30))); // 480 + 30 = 510 <= 510 (500*1.02)
        assert!(!budget.can_commit(dec!(30.01)));
    }

    #[test]
    fn budget_release_frees_headroom() {
        let mut budget = PairBudget::new(1, dec!(100));
        budget.commit(dec!(100));
        assert!(!budget.can_commit(dec!(10)));
        budget.release(dec!(50));
        assert!(budget.can_commit(dec!(10)));
        assert!(budget.is_within_invariant());
    }

    #[test]
    fn price_sample_usable_within_ttl() {
        let now = Utc::now();
        let sample = PriceSample {
            symbol: "HYPE".into(),
            price: dec!(10.0),
            source: PriceSource::WebSocket,
            confidence: Confidence::High,
            observed_at: now - chrono::Duration::seconds(10),
        };
        assert!(sample.is_usable(now, chrono::Duration::seconds(30)));
        assert!(!sample.is_usable(now, chrono::Duration::seconds(5)));
    }

    #[test]
    fn token_raw_unit_roundtrip() {
        let usdc = token("USDC", 6);
        let raw = usdc.to_raw_units(dec!(123.456789));
        assert_eq!(raw, 123_456_789);
        let back = usdc.from_raw_units(raw);
        assert_eq!(back, dec!(123.456789));
    }
}
