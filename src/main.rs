//! Grid trading engine entry point
//!
//! Loads configuration, wires up the Price Oracle / AMM Client /
//! Scheduler, installs Ctrl-C shutdown handling, and runs until the
//! Scheduler drains. Exit codes follow §6: 0 normal stop, 2 config
//! invalid, 3 price feed unavailable at startup, 4 insufficient balance
//! at startup, 5 unrecoverable wallet error.
//!
//! Grounded in the teacher's `main.rs` (tracing init via
//! `tracing_subscriber::fmt()`, `#[tokio::main]` entry), generalized from
//! a placeholder sleep loop into the real scheduler wiring.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use alloy::network::EthereumWallet;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::signers::local::PrivateKeySigner;
use grid_bot::amm::AmmClient;
use grid_bot::oracle::{feed, PriceOracle, SanityRange};
use grid_bot::scheduler::Scheduler;
use grid_bot::store::StateStore;
use grid_bot::load_config;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const CONFIG_INVALID: i32 = 2;
const PRICE_UNAVAILABLE_AT_STARTUP: i32 = 3;
const INSUFFICIENT_BALANCE_AT_STARTUP: i32 = 4;
const WALLET_ERROR: i32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration invalid, refusing to start");
            std::process::exit(CONFIG_INVALID);
        }
    };

    info!(pairs = config.pairs.iter().filter(|p| p.enabled).count(), dry_run = config.dry_run, "grid-bot starting");

    let signer: PrivateKeySigner = match config.private_key.parse() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "unrecoverable wallet error: invalid private key");
            std::process::exit(WALLET_ERROR);
        }
    };
    let owner = signer.address();
    let wallet = EthereumWallet::from(signer);

    let provider = match ProviderBuilder::new().wallet(wallet).connect_ws(WsConnect::new(&config.rpc_url)).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "unrecoverable wallet error: failed to connect provider");
            std::process::exit(WALLET_ERROR);
        }
    };

    let sanity_ranges: HashMap<String, SanityRange> = HashMap::new();
    let oracle = Arc::new(PriceOracle::new(Duration::from_secs(30), sanity_ranges));

    let writer = oracle.writer_handle();
    let ws_url = config.hyperliquid_api_url.clone();
    let oracle_for_mark = Arc::clone(&oracle);
    tokio::spawn(async move {
        feed::run(ws_url, writer, move |connected| oracle_for_mark.mark_ws_connected(connected)).await;
    });

    let wrapped_native = grid_bot::config::token_for(&config, "WETH")
        .unwrap_or_else(|| grid_bot::types::Token::new("WETH", alloy::primitives::Address::ZERO, 18, false));

    let amm_client = Arc::new(AmmClient::new(
        provider.clone(),
        config.quoter_v2_address,
        config.router_v3_address,
        wrapped_native,
        owner,
        config.dry_run,
    ));

    // Give the streaming feed a moment to deliver its first batch before
    // the Scheduler's startup price check, matching the spec's "blackout"
    // failure mode only kicking in when neither source answers.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let store = match StateStore::new(&config.data_dir) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to initialize state store");
            std::process::exit(CONFIG_INVALID);
        }
    };

    let mut scheduler = match Scheduler::new(config.clone(), owner, Arc::clone(&oracle), amm_client, store) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to construct scheduler");
            std::process::exit(CONFIG_INVALID);
        }
    };

    if let Err(e) = scheduler.prime().await {
        error!(error = %e, "price feed unavailable at startup");
        std::process::exit(PRICE_UNAVAILABLE_AT_STARTUP);
    }

    let balance = provider.get_balance(owner).await.unwrap_or_default();
    if balance.is_zero() && !config.dry_run {
        error!("insufficient balance at startup: signer wallet holds zero native balance");
        std::process::exit(INSUFFICIENT_BALANCE_AT_STARTUP);
    }

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, requesting drain");
            shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    scheduler.run().await?;

    info!("grid-bot exited cleanly");
    std::process::exit(0);
}
