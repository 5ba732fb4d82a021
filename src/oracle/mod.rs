//! Price Oracle
//!
//! Fuses a streaming exchange feed with on-chain AMM quotes behind a
//! single lock-free symbol map. No source ever substitutes a static
//! fallback price — when nothing usable exists the caller gets
//! `PriceUnavailable`, never a guessed number.
//!
//! Grounded in the teacher's `PoolStateManager` (Arc<DashMap<...>>,
//! single-writer/multi-reader) and `tax::PriceOracle` (RwLock cache with
//! a TTL), reworked to drop the teacher's hardcoded per-symbol fallback
//! table, which this spec explicitly forbids.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

pub mod feed;

use crate::error::EngineError;
use crate::types::{Confidence, HealthReport, PriceSample, PriceSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

/// Anything that can supply an AMM-derived probe price for a symbol pair.
/// Implemented by the AMM Client; kept as a trait here so the oracle
/// doesn't need to know about RPC transports or contract ABIs.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn probe_price_usd(&self, symbol: &str) -> anyhow::Result<Decimal>;
}

/// Sanity bounds a symbol's price must fall within to be admitted.
#[derive(Debug, Clone, Copy)]
pub struct SanityRange {
    pub min: Decimal,
    pub max: Decimal,
}

pub struct PriceOracle {
    samples: Arc<DashMap<String, PriceSample>>,
    sanity_ranges: HashMap<String, SanityRange>,
    cache_ttl: chrono::Duration,
    quote_source: Option<Arc<dyn QuoteSource>>,
    consecutive_failures: AtomicU32,
    ws_connected: AtomicBool,
}

impl PriceOracle {
    pub fn new(cache_ttl: StdDuration, sanity_ranges: HashMap<String, SanityRange>) -> Self {
        Self {
            samples: Arc::new(DashMap::new()),
            sanity_ranges,
            cache_ttl: chrono::Duration::from_std(cache_ttl).unwrap_or_else(|_| chrono::Duration::seconds(30)),
            quote_source: None,
            consecutive_failures: AtomicU32::new(0),
            ws_connected: AtomicBool::new(false),
        }
    }

    pub fn with_quote_source(mut self, source: Arc<dyn QuoteSource>) -> Self {
        self.quote_source = Some(source);
        self
    }

    /// Handle returning a cheap clone of the underlying symbol map, for
    /// background tasks (the streaming feed) to write into without
    /// holding a reference to the whole oracle.
    pub fn writer_handle(&self) -> OracleWriter {
        OracleWriter {
            samples: Arc::clone(&self.samples),
            sanity_ranges: self.sanity_ranges.clone(),
        }
    }

    pub fn mark_ws_connected(&self, connected: bool) {
        self.ws_connected.store(connected, Ordering::Relaxed);
    }

    /// `get_usd(symbol) -> PriceSample` (§4.2). Tries the live map first;
    /// a sample past `cache_ttl` is treated as absent, never substituted.
    pub async fn get_usd(&self, symbol: &str) -> Result<PriceSample, EngineError> {
        let now = Utc::now();

        if let Some(entry) = self.samples.get(symbol) {
            if entry.is_usable(now, self.cache_ttl) {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                return Ok(downgrade_if_stale(entry.clone(), now, self.cache_ttl));
            }
        }

        if let Some(source) = &self.quote_source {
            match source.probe_price_usd(symbol).await {
                Ok(price) if self.is_sane(symbol, price) => {
                    let sample = PriceSample {
                        symbol: symbol.to_string(),
                        price,
                        source: PriceSource::QuoterV2,
                        confidence: Confidence::High,
                        observed_at: now,
                    };
                    self.samples.insert(symbol.to_string(), sample.clone());
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return Ok(sample);
                }
                Ok(price) => {
                    warn!(symbol, %price, "price rejected by sanity range");
                }
                Err(e) => {
                    debug!(symbol, error = %e, "quoter probe failed");
                }
            }
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= 5 {
            warn!(symbol, failures, "price unavailable for 5+ consecutive attempts");
        }
        Err(EngineError::PriceUnavailable { symbol: symbol.to_string() })
    }

    /// `get_pair_price(base, quote) -> PriceSample` (§4.2): derived as the
    /// ratio of two independently-sourced USD samples. Confidence is the
    /// weaker of the two inputs.
    pub async fn get_pair_price(&self, base: &str, quote: &str) -> Result<PriceSample, EngineError> {
        let base_sample = self.get_usd(base).await?;
        let quote_sample = self.get_usd(quote).await?;
        if quote_sample.price.is_zero() {
            return Err(EngineError::PriceUnavailable { symbol: quote.to_string() });
        }

        let confidence = weaker(base_sample.confidence, quote_sample.confidence);
        Ok(PriceSample {
            symbol: format!("{base}/{quote}"),
            price: base_sample.price / quote_sample.price,
            source: base_sample.source,
            confidence,
            observed_at: base_sample.observed_at.min(quote_sample.observed_at),
        })
    }

    fn is_sane(&self, symbol: &str, price: Decimal) -> bool {
        match self.sanity_ranges.get(symbol) {
            Some(range) => price >= range.min && price <= range.max,
            None => price.is_sign_positive() && !price.is_zero(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let now = Utc::now();
        let stalest = self
            .samples
            .iter()
            .map(|e| (e.key().clone(), now.signed_duration_since(e.observed_at).num_seconds()))
            .max_by_key(|(_, age)| *age);

        HealthReport {
            last_ws_message_at: self.samples.iter().filter(|e| e.source == PriceSource::WebSocket).map(|e| e.observed_at).max(),
            ws_connected: self.ws_connected.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            symbols_tracked: self.samples.len(),
            stalest_symbol: stalest,
        }
    }

}

fn weaker(a: Confidence, b: Confidence) -> Confidence {
    fn rank(c: Confidence) -> u8 {
        match c {
            Confidence::High => 2,
            Confidence::Medium => 1,
            Confidence::Low => 0,
        }
    }
    if rank(a) <= rank(b) { a } else { b }
}

fn downgrade_if_stale(mut sample: PriceSample, now: DateTime<Utc>, ttl: chrono::Duration) -> PriceSample {
    if sample.source == PriceSource::Cached {
        let age = now.signed_duration_since(sample.observed_at);
        sample.confidence = if age < ttl / 2 { Confidence::Medium } else { Confidence::Low };
    }
    sample
}

/// A write-only view into the oracle's symbol map, handed to the
/// streaming feed task so it never needs the oracle's (non-`Send`-friendly)
/// quote source reference.
#[derive(Clone)]
pub struct OracleWriter {
    samples: Arc<DashMap<String, PriceSample>>,
    sanity_ranges: HashMap<String, SanityRange>,
}

impl OracleWriter {
    pub fn ingest_websocket(&self, symbol: &str, price: Decimal, observed_at: DateTime<Utc>) {
        let sane = match self.sanity_ranges.get(symbol) {
            Some(range) => price >= range.min && price <= range.max,
            None => price.is_sign_positive() && !price.is_zero(),
        };
        if !sane {
            warn!(symbol, %price, "websocket price rejected by sanity range");
            return;
        }

        self.samples.insert(
            symbol.to_string(),
            PriceSample {
                symbol: symbol.to_string(),
                price,
                source: PriceSource::WebSocket,
                confidence: Confidence::High,
                observed_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn oracle() -> PriceOracle {
        PriceOracle::new(StdDuration::from_secs(30), HashMap::new())
    }

    #[tokio::test]
    async fn unseen_symbol_is_unavailable() {
        let oracle = oracle();
        let err = oracle.get_usd("HYPE").await.unwrap_err();
        assert!(matches!(err, EngineError::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn websocket_sample_is_returned_fresh() {
        let oracle = oracle();
        let writer = oracle.writer_handle();
        writer.ingest_websocket("HYPE", dec!(27.5), Utc::now());

        let sample = oracle.get_usd("HYPE").await.unwrap();
        assert_eq!(sample.price, dec!(27.5));
        assert_eq!(sample.source, PriceSource::WebSocket);
    }

    #[tokio::test]
    async fn stale_sample_is_not_returned_without_fallback() {
        let oracle = oracle();
        let writer = oracle.writer_handle();
        writer.ingest_websocket("HYPE", dec!(27.5), Utc::now() - chrono::Duration::seconds(40));

        let err = oracle.get_usd("HYPE").await.unwrap_err();
        assert!(matches!(err, EngineError::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn sanity_range_rejects_impossible_price() {
        let mut ranges = HashMap::new();
        ranges.insert("HYPE".to_string(), SanityRange { min: dec!(1), max: dec!(100) });
        let oracle = PriceOracle::new(StdDuration::from_secs(30), ranges);
        let writer = oracle.writer_handle();
        writer.ingest_websocket("HYPE", dec!(999999), Utc::now());

        let err = oracle.get_usd("HYPE").await.unwrap_err();
        assert!(matches!(err, EngineError::PriceUnavailable { .. }));
    }

    #[tokio::test]
    async fn pair_price_is_ratio_of_usd_samples() {
        let oracle = oracle();
        let writer = oracle.writer_handle();
        writer.ingest_websocket("WETH", dec!(3000), Utc::now());
        writer.ingest_websocket("USDC", dec!(1), Utc::now());

        let sample = oracle.get_pair_price("WETH", "USDC").await.unwrap();
        assert_eq!(sample.price, dec!(3000));
    }
}
