//! Error Taxonomy
//!
//! `ConfigError` gates startup; `EngineError` is the kind the Scheduler
//! branches on once the process is running. Both are thin `thiserror`
//! enums — anything that doesn't need kind-based dispatch stays as
//! `anyhow::Result` with `.context(...)` breadcrumbs at the call site.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use thiserror::Error;

/// Startup-time configuration failures. `main` maps these to exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required key: {0}")]
    MissingKey(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("pair allocations sum to {sum}%, expected 100% (tolerance 0.01)")]
    AllocationMismatch { sum: String },

    #[error("grid_count {0} out of range [2, 100]")]
    GridCountOutOfRange(u32),

    #[error("min_profit_pct must be non-negative, got {0}")]
    NegativeMinProfit(String),

    #[error("pair {symbol} references unknown pool tuple (base={base}, quote={quote}, fee={fee})")]
    UnknownPool { symbol: String, base: String, quote: String, fee: u32 },
}

/// Runtime fault kinds surfaced to the Multi-Pair Scheduler (§7). The
/// Scheduler — not the component that raised the fault — decides whether a
/// pair is disabled, the loop continues, or the engine drains.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("price unavailable for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("quote failed: no liquidity across configured fee tiers")]
    QuoteFailedNoLiquidity,

    #[error("quote failed: rpc error: {0}")]
    QuoteFailedRpc(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("swap reverted: {0}")]
    SwapReverted(String),

    #[error("swap transport error after retries: {0}")]
    SwapTransportError(String),

    #[error("balance insufficient: needed {needed}, available {available}")]
    BalanceInsufficient { needed: String, available: String },

    #[error("budget exceeded for pair {pair_id}")]
    BudgetExceeded { pair_id: u32 },

    #[error("emergency stop: {0}")]
    EmergencyStop(String),
}

impl EngineError {
    /// Does this fault warrant bumping a grid level's `failure_count`?
    pub fn counts_as_level_failure(&self) -> bool {
        matches!(
            self,
            EngineError::ValidationFailed(_)
                | EngineError::SwapReverted(_)
                | EngineError::SwapTransportError(_)
                | EngineError::QuoteFailedNoLiquidity
                | EngineError::QuoteFailedRpc(_)
        )
    }
}
