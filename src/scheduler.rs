//! Multi-Pair Scheduler (C8)
//!
//! Owns every `PairEngine` and drives the single-threaded cooperative
//! tick loop from §4.8/§5: wake on `check_interval`, refresh pricing,
//! tick each pair in deterministic (pair ID) order, enforce global caps,
//! and drain cooperatively on shutdown.
//!
//! Grounded in the teacher's top-level `main.rs` placeholder loop
//! structure (tracing init, `tokio::main`, periodic `sleep`), generalized
//! into a real cooperative scheduler with a checked shutdown flag instead
//! of an infinite `loop { sleep }`.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::amm::SwapExecutor;
use crate::config::{AppConfig, GridModeConfig};
use crate::oracle::PriceOracle;
use crate::pair_engine::{PairEngine, PairEngineParams};
use crate::store::StateStore;
use crate::validator::ValidatorLimits;
use alloy::primitives::Address;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A pair whose aggregate ladder failures exceed this ceiling is disabled
/// entirely by the Scheduler (§4.8's "configured ceiling").
pub const DEFAULT_PAIR_FAILURE_CEILING: u32 = 20;

fn to_grid_mode(mode: GridModeConfig) -> crate::types::GridMode {
    match mode {
        GridModeConfig::Geometric => crate::types::GridMode::Geometric,
        GridModeConfig::Arithmetic => crate::types::GridMode::Arithmetic,
    }
}

pub struct Scheduler {
    engines: Vec<PairEngine>,
    oracle: Arc<PriceOracle>,
    executor: Arc<dyn SwapExecutor>,
    store: StateStore,
    limits: ValidatorLimits,
    config: AppConfig,
    shutdown: Arc<AtomicBool>,
    started_at: chrono::DateTime<Utc>,
    realized_day_pnl_usd: Decimal,
}

impl Scheduler {
    pub fn new(
        config: AppConfig,
        owner: Address,
        oracle: Arc<PriceOracle>,
        executor: Arc<dyn SwapExecutor>,
        store: StateStore,
    ) -> anyhow::Result<Self> {
        let enabled_pairs: Vec<_> = config.pairs.iter().filter(|p| p.enabled).collect();
        let mut engines = Vec::with_capacity(enabled_pairs.len());

        for pair_config in &enabled_pairs {
            let base = crate::config::token_for(&config, &pair_config.base_token)
                .ok_or_else(|| anyhow::anyhow!("unknown base token {}", pair_config.base_token))?;
            let quote = crate::config::token_for(&config, &pair_config.quote_token)
                .ok_or_else(|| anyhow::anyhow!("unknown quote token {}", pair_config.quote_token))?;

            let pair = crate::types::Pair {
                id: pair_config.index,
                base,
                quote,
                pool_address: pair_config.pool_address,
                pool_fee_bps: pair_config.pool_fee,
                enabled: pair_config.enabled,
            };

            let allocated_usd = config.grid_total_investment * pair_config.allocation_percent / Decimal::from(100);

            let params = PairEngineParams {
                grid_mode: to_grid_mode(config.grid_mode),
                scaling_factor: config.grid_scaling_factor,
                range_percent: pair_config.range_percent,
                profit_margin: config.grid_profit_margin,
                min_profit_usd: config.grid_min_profit_percent * allocated_usd / Decimal::from(100),
                max_concurrent_fills: 1,
                native_usd_symbol: "WETH".to_string(),
            };

            engines.push(PairEngine::new(pair, owner, allocated_usd, params, DEFAULT_PAIR_FAILURE_CEILING));
        }

        let limits = ValidatorLimits {
            band_pct: Decimal::from(50),
            min_usd: Decimal::ONE,
            max_usd: config.max_position_size_usd,
            max_daily_loss_usd: config.max_daily_loss_usd,
        };

        Ok(Self {
            engines,
            oracle,
            executor,
            store,
            limits,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            started_at: Utc::now(),
            realized_day_pnl_usd: Decimal::ZERO,
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Plan every pair's initial ladder before the first tick.
    pub async fn prime(&mut self) -> anyhow::Result<()> {
        let allocation = self.config.grid_total_investment / Decimal::from(self.engines.len().max(1) as u64);
        let grid_count = self.config.grid_count as usize;

        for engine in &mut self.engines {
            let sample = self
                .oracle
                .get_pair_price(&engine.pair.base.symbol, &engine.pair.quote.symbol)
                .await?;
            engine.plan(sample.price, allocation, grid_count);
        }
        Ok(())
    }

    /// Run the cooperative tick loop until the shutdown flag is set.
    /// Checked at every suspension point (start of each cycle), per §5.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let interval = Duration::from_millis(self.config.grid_check_interval_ms);
        info!(interval_ms = self.config.grid_check_interval_ms, pairs = self.engines.len(), "scheduler starting");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("shutdown flag observed, draining");
                break;
            }

            self.tick_all().await;
            self.write_status_snapshot();

            tokio::time::sleep(interval).await;
        }

        info!("scheduler drained, exiting");
        Ok(())
    }

    async fn tick_all(&mut self) {
        // Deterministic pair-ID order (§4.8).
        self.engines.sort_by_key(|e| e.pair.id);

        for engine in &mut self.engines {
            if engine.exceeds_failure_ceiling() {
                warn!(pair_id = engine.pair.id, "pair disabled: failure ceiling exceeded");
                engine.stop();
                continue;
            }

            let trades = engine
                .tick(
                    &self.oracle,
                    &self.executor,
                    &self.store,
                    &self.limits,
                    self.realized_day_pnl_usd,
                    self.config.grid_total_investment,
                    self.config.grid_count as usize,
                    self.config.max_slippage_bps,
                )
                .await;

            for trade in &trades {
                self.realized_day_pnl_usd += trade.net_profit_usd;
            }

            if -self.realized_day_pnl_usd >= self.config.max_daily_loss_usd {
                warn!(realized_day_pnl_usd = %self.realized_day_pnl_usd, "daily loss limit breached, initiating emergency stop");
                self.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }

    fn write_status_snapshot(&self) {
        let status = crate::types::BotStatus {
            started_at: self.started_at,
            running: !self.shutdown.load(Ordering::SeqCst),
            pairs: self.engines.iter().map(|e| e.status()).collect(),
            realized_day_pnl_usd: self.realized_day_pnl_usd,
            last_updated: Utc::now(),
        };
        if let Err(e) = self.store.write_status(&status) {
            warn!(error = %e, "failed to write status snapshot");
        }
    }

    pub fn snapshot(&self) -> crate::types::BotStatus {
        crate::types::BotStatus {
            started_at: self.started_at,
            running: !self.shutdown.load(Ordering::SeqCst),
            pairs: self.engines.iter().map(|e| e.status()).collect(),
            realized_day_pnl_usd: self.realized_day_pnl_usd,
            last_updated: Utc::now(),
        }
    }
}
