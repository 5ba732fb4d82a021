//! Configuration
//!
//! Loads a frozen, validated `AppConfig` from the process environment
//! (`.env` via `dotenvy`, then real env vars — env wins). Every field is
//! parsed explicitly and validated in one pass; there is no duck-typed
//! string-indexed access once `load_config()` returns.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::error::ConfigError;
use crate::types::{Token, VALID_FEE_TIERS};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridModeConfig {
    Geometric,
    Arithmetic,
}

impl FromStr for GridModeConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "geometric" => Ok(Self::Geometric),
            "arithmetic" => Ok(Self::Arithmetic),
            other => Err(ConfigError::InvalidValue {
                key: "GRID_MODE".into(),
                reason: format!("unknown mode '{other}', expected geometric|arithmetic"),
            }),
        }
    }
}

/// Declarative setup for a single pair, assembled from `PAIR_<n>_*` keys.
#[derive(Debug, Clone)]
pub struct PairConfig {
    pub index: u32,
    pub enabled: bool,
    pub name: String,
    pub base_token: String,
    pub quote_token: String,
    pub pool_address: Address,
    pub pool_fee: u32,
    pub allocation_percent: Decimal,
    pub grid_count: u32,
    pub range_percent: Decimal,
}

/// Process-wide, immutable configuration. Constructed once in `main`;
/// every component holds a borrowed reference for its lifetime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub private_key: String,
    pub rpc_url: String,
    pub chain_id: u64,

    pub factory_address: Address,
    pub quoter_v2_address: Address,
    pub router_v3_address: Address,
    pub position_manager_address: Address,

    pub token_addresses: HashMap<String, Address>,
    pub token_decimals: HashMap<String, u8>,

    pub pairs: Vec<PairConfig>,

    pub grid_total_investment: Decimal,
    pub grid_count: u32,
    pub grid_mode: GridModeConfig,
    pub grid_scaling_factor: Decimal,
    pub grid_range_percent: Decimal,
    pub grid_profit_margin: Decimal,
    pub grid_min_profit_percent: Decimal,
    pub initial_trade_percent: Decimal,

    pub max_position_size_usd: Decimal,
    pub max_daily_loss_usd: Decimal,
    pub max_slippage_bps: u32,
    pub emergency_stop_loss_bps: u32,

    pub grid_check_interval_ms: u64,
    pub price_update_interval_ms: u64,

    pub hyperliquid_api_url: String,
    pub hyperliquid_rate_limit_ms: u64,

    pub dry_run: bool,
    pub data_dir: String,
}

fn env_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingKey(key.to_string()))
}

fn env_var_opt(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_decimal(key: &str, raw: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn parse_u32(key: &str, raw: &str) -> Result<u32, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{raw}' is not a valid integer"),
    })
}

fn parse_u64(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{raw}' is not a valid integer"),
    })
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Load `<SYMBOL>_ADDRESS` keys for every symbol referenced by the pair
/// table, plus the always-required `WETH`/native-wrapped entry.
fn load_token_addresses(pairs: &[PairConfig]) -> Result<(HashMap<String, Address>, HashMap<String, u8>), ConfigError> {
    let mut addresses = HashMap::new();
    let mut decimals = HashMap::new();

    let mut symbols: Vec<&str> = pairs
        .iter()
        .flat_map(|p| [p.base_token.as_str(), p.quote_token.as_str()])
        .collect();
    symbols.sort_unstable();
    symbols.dedup();

    for symbol in symbols {
        let addr_key = format!("{symbol}_ADDRESS");
        let addr = env_var(&addr_key)?;
        addresses.insert(symbol.to_string(), parse_address(&addr_key, &addr)?);

        let dec_key = format!("{symbol}_DECIMALS");
        let dec: u8 = env_var_opt(&dec_key, "18")
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key: dec_key, reason: "not a valid u8".into() })?;
        decimals.insert(symbol.to_string(), dec);
    }

    Ok((addresses, decimals))
}

/// Declarative pair table read from `PAIR_TABLE_TOML` (grounded in the
/// teacher's `paper_trading::toml_config::TomlConfig`). One `[[pair]]`
/// table per pair; field names mirror `PairConfig` directly.
#[derive(Debug, Clone, Deserialize)]
struct TomlPairTable {
    #[serde(rename = "pair")]
    pairs: Vec<TomlPairEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct TomlPairEntry {
    index: u32,
    #[serde(default = "default_true")]
    enabled: bool,
    name: String,
    base_token: String,
    quote_token: String,
    pool_address: String,
    pool_fee: u32,
    allocation_percent: Decimal,
    grid_count: u32,
    range_percent: Decimal,
}

fn default_true() -> bool {
    true
}

fn toml_entry_to_pair_config(entry: TomlPairEntry) -> Result<PairConfig, ConfigError> {
    let pool_address_key = format!("PAIR_{}_POOL_ADDRESS (toml)", entry.index);
    Ok(PairConfig {
        index: entry.index,
        enabled: entry.enabled,
        name: entry.name,
        base_token: entry.base_token,
        quote_token: entry.quote_token,
        pool_address: parse_address(&pool_address_key, &entry.pool_address)?,
        pool_fee: entry.pool_fee,
        allocation_percent: entry.allocation_percent,
        grid_count: entry.grid_count,
        range_percent: entry.range_percent,
    })
}

/// Load the pair table declared at `PAIR_TABLE_TOML`, keyed by `index`.
fn load_pairs_toml(path: &str) -> Result<HashMap<u32, PairConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
        key: "PAIR_TABLE_TOML".into(),
        reason: format!("failed to read {path}: {e}"),
    })?;
    let table: TomlPairTable = toml::from_str(&content).map_err(|e| ConfigError::InvalidValue {
        key: "PAIR_TABLE_TOML".into(),
        reason: format!("failed to parse {path}: {e}"),
    })?;

    table
        .pairs
        .into_iter()
        .map(|entry| toml_entry_to_pair_config(entry).map(|p| (p.index, p)))
        .collect()
}

/// Parse the `PAIR_<n>_*` family for `n` in `0..MAX_PAIRS` until a gap,
/// layered over any `PAIR_TABLE_TOML` declaration. When both declare the
/// same `index`, the env-var entry wins (§4.0's stated precedence).
fn load_pairs() -> Result<Vec<PairConfig>, ConfigError> {
    const MAX_PAIRS: u32 = 64;

    let mut toml_pairs = match std::env::var("PAIR_TABLE_TOML") {
        Ok(path) => load_pairs_toml(&path)?,
        Err(_) => HashMap::new(),
    };

    let mut pairs = Vec::new();

    for n in 0..MAX_PAIRS {
        let enabled_key = format!("PAIR_{n}_ENABLED");
        let Ok(enabled_raw) = std::env::var(&enabled_key) else {
            if let Some(pair) = toml_pairs.remove(&n) {
                pairs.push(pair);
            }
            continue;
        };

        let name = env_var(&format!("PAIR_{n}_NAME"))?;
        let base_token = env_var(&format!("PAIR_{n}_BASE_TOKEN"))?;
        let quote_token = env_var(&format!("PAIR_{n}_QUOTE_TOKEN"))?;
        let pool_address_key = format!("PAIR_{n}_POOL_ADDRESS");
        let pool_address = parse_address(&pool_address_key, &env_var(&pool_address_key)?)?;
        let pool_fee_key = format!("PAIR_{n}_POOL_FEE");
        let pool_fee = parse_u32(&pool_fee_key, &env_var(&pool_fee_key)?)?;
        let allocation_key = format!("PAIR_{n}_ALLOCATION_PERCENT");
        let allocation_percent = parse_decimal(&allocation_key, &env_var(&allocation_key)?)?;
        let grid_count_key = format!("PAIR_{n}_GRID_COUNT");
        let grid_count = parse_u32(&grid_count_key, &env_var(&grid_count_key)?)?;
        let range_key = format!("PAIR_{n}_RANGE_PERCENT");
        let range_percent = parse_decimal(&range_key, &env_var(&range_key)?)?;

        toml_pairs.remove(&n); // env entry for this index wins over any toml entry
        pairs.push(PairConfig {
            index: n,
            enabled: parse_bool(&enabled_raw),
            name,
            base_token,
            quote_token,
            pool_address,
            pool_fee,
            allocation_percent,
            grid_count,
            range_percent,
        });
    }

    // Remaining toml-only indices (not shadowed by any PAIR_<n>_* env entry).
    let mut leftover: Vec<PairConfig> = toml_pairs.into_values().collect();
    leftover.sort_by_key(|p| p.index);
    pairs.extend(leftover);

    if pairs.is_empty() {
        return Err(ConfigError::MissingKey("PAIR_0_ENABLED".into()));
    }

    Ok(pairs)
}

/// Validate the composed config per §4.1. Returns the first violation found.
fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.private_key.trim().is_empty() {
        return Err(ConfigError::MissingKey("PRIVATE_KEY".into()));
    }

    let enabled: Vec<&PairConfig> = config.pairs.iter().filter(|p| p.enabled).collect();
    let sum: Decimal = enabled.iter().map(|p| p.allocation_percent).sum();
    let tolerance = Decimal::new(1, 2); // 0.01
    if !enabled.is_empty() && (sum - Decimal::from(100)).abs() > tolerance {
        return Err(ConfigError::AllocationMismatch { sum: sum.to_string() });
    }

    for pair in &config.pairs {
        if !(2..=100).contains(&pair.grid_count) {
            return Err(ConfigError::GridCountOutOfRange(pair.grid_count));
        }
        if !VALID_FEE_TIERS.contains(&pair.pool_fee) {
            return Err(ConfigError::UnknownPool {
                symbol: pair.name.clone(),
                base: pair.base_token.clone(),
                quote: pair.quote_token.clone(),
                fee: pair.pool_fee,
            });
        }
        if !config.token_addresses.contains_key(&pair.base_token)
            || !config.token_addresses.contains_key(&pair.quote_token)
        {
            return Err(ConfigError::UnknownPool {
                symbol: pair.name.clone(),
                base: pair.base_token.clone(),
                quote: pair.quote_token.clone(),
                fee: pair.pool_fee,
            });
        }
    }

    if config.grid_min_profit_percent.is_sign_negative() && !config.grid_min_profit_percent.is_zero() {
        return Err(ConfigError::NegativeMinProfit(config.grid_min_profit_percent.to_string()));
    }

    Ok(())
}

/// Build a `Token` for a configured symbol using the loaded address/decimals maps.
pub fn token_for(config: &AppConfig, symbol: &str) -> Option<Token> {
    let address = *config.token_addresses.get(symbol)?;
    let decimals = *config.token_decimals.get(symbol).unwrap_or(&18);
    let is_native = symbol.eq_ignore_ascii_case("NATIVE");
    Some(Token::new(symbol, address, decimals, is_native))
}

/// Load, parse, and validate the full application configuration.
/// `.env` is loaded first (silently ignored if absent); real process
/// environment variables always take precedence over it.
pub fn load_config() -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let pairs = load_pairs().context("failed to load pair table")?;
    let (token_addresses, token_decimals) = load_token_addresses(&pairs).context("failed to load token addresses")?;

    let config = AppConfig {
        private_key: env_var("PRIVATE_KEY")?,
        rpc_url: env_var("RPC_URL")?,
        chain_id: parse_u64("CHAIN_ID", &env_var("CHAIN_ID")?)?,

        factory_address: parse_address("FACTORY_ADDRESS", &env_var("FACTORY_ADDRESS")?)?,
        quoter_v2_address: parse_address("QUOTER_V2_ADDRESS", &env_var("QUOTER_V2_ADDRESS")?)?,
        router_v3_address: parse_address("ROUTER_V3_ADDRESS", &env_var("ROUTER_V3_ADDRESS")?)?,
        position_manager_address: parse_address(
            "POSITION_MANAGER_ADDRESS",
            &env_var("POSITION_MANAGER_ADDRESS")?,
        )?,

        token_addresses,
        token_decimals,
        pairs,

        grid_total_investment: parse_decimal("GRID_TOTAL_INVESTMENT", &env_var("GRID_TOTAL_INVESTMENT")?)?,
        grid_count: parse_u32("GRID_COUNT", &env_var_opt("GRID_COUNT", "10"))?,
        grid_mode: env_var_opt("GRID_MODE", "geometric").parse()?,
        grid_scaling_factor: parse_decimal("GRID_SCALING_FACTOR", &env_var_opt("GRID_SCALING_FACTOR", "1"))?,
        grid_range_percent: parse_decimal("GRID_RANGE_PERCENT", &env_var_opt("GRID_RANGE_PERCENT", "10"))?,
        grid_profit_margin: parse_decimal("GRID_PROFIT_MARGIN", &env_var_opt("GRID_PROFIT_MARGIN", "0.5"))?,
        grid_min_profit_percent: parse_decimal(
            "GRID_MIN_PROFIT_PERCENT",
            &env_var_opt("GRID_MIN_PROFIT_PERCENT", "0.1"),
        )?,
        initial_trade_percent: parse_decimal(
            "INITIAL_TRADE_PERCENT",
            &env_var_opt("INITIAL_TRADE_PERCENT", "0"),
        )?,

        max_position_size_usd: parse_decimal(
            "MAX_POSITION_SIZE_USD",
            &env_var_opt("MAX_POSITION_SIZE_USD", "200"),
        )?,
        max_daily_loss_usd: parse_decimal("MAX_DAILY_LOSS_USD", &env_var_opt("MAX_DAILY_LOSS_USD", "100"))?,
        max_slippage_bps: parse_u32("MAX_SLIPPAGE_BPS", &env_var_opt("MAX_SLIPPAGE_BPS", "50"))?,
        emergency_stop_loss_bps: parse_u32(
            "EMERGENCY_STOP_LOSS_BPS",
            &env_var_opt("EMERGENCY_STOP_LOSS_BPS", "1000"),
        )?,

        grid_check_interval_ms: parse_u64("GRID_CHECK_INTERVAL_MS", &env_var_opt("GRID_CHECK_INTERVAL_MS", "5000"))?,
        price_update_interval_ms: parse_u64(
            "PRICE_UPDATE_INTERVAL_MS",
            &env_var_opt("PRICE_UPDATE_INTERVAL_MS", "1000"),
        )?,

        hyperliquid_api_url: env_var_opt("HYPERLIQUID_API_URL", "wss://api.hyperliquid.xyz/ws"),
        hyperliquid_rate_limit_ms: parse_u64(
            "HYPERLIQUID_RATE_LIMIT_MS",
            &env_var_opt("HYPERLIQUID_RATE_LIMIT_MS", "200"),
        )?,

        dry_run: parse_bool(&env_var_opt("DRY_RUN", "false")),
        data_dir: env_var_opt("DATA_DIR", "./data"),
    };

    validate(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_pair(index: u32, allocation: Decimal) -> PairConfig {
        PairConfig {
            index,
            enabled: true,
            name: "WETH/USDC".into(),
            base_token: "WETH".into(),
            quote_token: "USDC".into(),
            pool_address: Address::ZERO,
            pool_fee: 3000,
            allocation_percent: allocation,
            grid_count: 10,
            range_percent: dec!(10),
        }
    }

    fn base_config(pairs: Vec<PairConfig>) -> AppConfig {
        let mut token_addresses = HashMap::new();
        token_addresses.insert("WETH".to_string(), Address::ZERO);
        token_addresses.insert("USDC".to_string(), Address::ZERO);
        AppConfig {
            private_key: "0xabc".into(),
            rpc_url: "http://localhost:8545".into(),
            chain_id: 137,
            factory_address: Address::ZERO,
            quoter_v2_address: Address::ZERO,
            router_v3_address: Address::ZERO,
            position_manager_address: Address::ZERO,
            token_addresses,
            token_decimals: HashMap::new(),
            pairs,
            grid_total_investment: dec!(1000),
            grid_count: 10,
            grid_mode: GridModeConfig::Geometric,
            grid_scaling_factor: dec!(1),
            grid_range_percent: dec!(10),
            grid_profit_margin: dec!(0.5),
            grid_min_profit_percent: dec!(0.1),
            initial_trade_percent: dec!(0),
            max_position_size_usd: dec!(200),
            max_daily_loss_usd: dec!(100),
            max_slippage_bps: 50,
            emergency_stop_loss_bps: 1000,
            grid_check_interval_ms: 5000,
            price_update_interval_ms: 1000,
            hyperliquid_api_url: "wss://example".into(),
            hyperliquid_rate_limit_ms: 200,
            dry_run: true,
            data_dir: "./data".into(),
        }
    }

    #[test]
    fn rejects_missing_private_key() {
        let mut cfg = base_config(vec![sample_pair(0, dec!(100))]);
        cfg.private_key = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::MissingKey(_))));
    }

    #[test]
    fn rejects_allocation_not_summing_to_100() {
        let cfg = base_config(vec![sample_pair(0, dec!(60)), sample_pair(1, dec!(30))]);
        assert!(matches!(validate(&cfg), Err(ConfigError::AllocationMismatch { .. })));
    }

    #[test]
    fn accepts_allocation_within_tolerance() {
        let cfg = base_config(vec![sample_pair(0, dec!(60.005)), sample_pair(1, dec!(39.995))]);
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn rejects_grid_count_out_of_range() {
        let mut pair = sample_pair(0, dec!(100));
        pair.grid_count = 1;
        let cfg = base_config(vec![pair]);
        assert!(matches!(validate(&cfg), Err(ConfigError::GridCountOutOfRange(1))));
    }

    #[test]
    fn rejects_unknown_fee_tier() {
        let mut pair = sample_pair(0, dec!(100));
        pair.pool_fee = 777;
        let cfg = base_config(vec![pair]);
        assert!(matches!(validate(&cfg), Err(ConfigError::UnknownPool { .. })));
    }

    #[test]
    fn rejects_negative_min_profit() {
        let mut cfg = base_config(vec![sample_pair(0, dec!(100))]);
        cfg.grid_min_profit_percent = dec!(-0.5);
        assert!(matches!(validate(&cfg), Err(ConfigError::NegativeMinProfit(_))));
    }

    #[test]
    fn toml_pair_table_parses_declared_fields() {
        let toml_str = r#"
[[pair]]
index = 0
enabled = true
name = "WETH/USDC"
base_token = "WETH"
quote_token = "USDC"
pool_address = "0x0000000000000000000000000000000000000000"
pool_fee = 3000
allocation_percent = "100"
grid_count = 10
range_percent = "10"
"#;
        let table: TomlPairTable = toml::from_str(toml_str).unwrap();
        assert_eq!(table.pairs.len(), 1);
        let pair = toml_entry_to_pair_config(table.pairs[0].clone()).unwrap();
        assert_eq!(pair.name, "WETH/USDC");
        assert_eq!(pair.grid_count, 10);
    }

    #[test]
    fn env_pair_entry_shadows_toml_entry_for_same_index() {
        let toml_str = r#"
[[pair]]
index = 0
name = "toml-named"
base_token = "WETH"
quote_token = "USDC"
pool_address = "0x0000000000000000000000000000000000000000"
pool_fee = 3000
allocation_percent = "100"
grid_count = 10
range_percent = "10"
"#;
        let table: TomlPairTable = toml::from_str(toml_str).unwrap();
        let mut toml_pairs: HashMap<u32, PairConfig> =
            table.pairs.into_iter().map(|e| (e.index, toml_entry_to_pair_config(e).unwrap())).collect();

        // Simulate an env-declared PAIR_0_NAME winning over the toml entry,
        // mirroring `load_pairs`'s per-index precedence rule.
        toml_pairs.remove(&0);
        assert!(toml_pairs.is_empty());
    }
}
