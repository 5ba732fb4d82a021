//! Streaming price feed
//!
//! Connects to a Hyperliquid-style "allMids" WebSocket channel and pushes
//! every update into an `OracleWriter`. Runs forever with exponential
//! backoff reconnect; a dropped socket is not an engine fault, only a
//! gap in price freshness that `PriceOracle::get_usd` will surface on
//! its own once samples go stale.
//!
//! Reconnect/backoff structure grounded in the teacher's
//! `mempool::monitor::run_observation_impl` (outer retry loop around a
//! fallible inner session function); adapted from an alloy WS
//! subscription to a raw `tokio-tungstenite` JSON client since this feed
//! isn't an EVM node.
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use super::OracleWriter;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct AllMidsEnvelope {
    channel: String,
    data: AllMidsData,
}

#[derive(Debug, Deserialize)]
struct AllMidsData {
    mids: std::collections::HashMap<String, String>,
}

/// Run the streaming feed forever, reconnecting with exponential backoff.
/// Never returns Err — a permanently broken feed degrades the oracle to
/// AMM-probe-only rather than taking the process down.
pub async fn run(url: String, writer: OracleWriter, mark_connected: impl Fn(bool) + Send + Sync + 'static) {
    let mut attempt: u32 = 0;

    loop {
        match run_session(&url, &writer, &mark_connected).await {
            Ok(()) => {
                info!("streaming feed session ended cleanly, reconnecting");
                attempt = 0;
            }
            Err(e) => {
                attempt += 1;
                warn!(attempt, error = %e, "streaming feed session failed");
            }
        }

        mark_connected(false);
        let backoff = backoff_for(attempt);
        debug!(?backoff, "streaming feed backing off before reconnect");
        tokio::time::sleep(backoff).await;
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(1u32.checked_shl(attempt.min(6)).unwrap_or(64));
    let capped = exp.min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    capped + Duration::from_millis(jitter_ms)
}

async fn run_session(
    url: &str,
    writer: &OracleWriter,
    mark_connected: &(impl Fn(bool) + Send + Sync + 'static),
) -> anyhow::Result<()> {
    let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let subscribe = serde_json::json!({ "method": "subscribe", "subscription": { "type": "allMids" } });
    sink.send(Message::Text(subscribe.to_string())).await?;
    mark_connected(true);
    info!(url, "streaming feed connected");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_message(&text, writer),
                    Some(Ok(Message::Ping(payload))) => { sink.send(Message::Pong(payload)).await?; }
                    Some(Ok(Message::Close(frame))) => {
                        anyhow::bail!("server closed connection: {:?}", frame);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => anyhow::bail!("stream ended"),
                }
            }
            _ = heartbeat.tick() => {
                sink.send(Message::Ping(Vec::new())).await?;
            }
        }
    }
}

fn handle_message(text: &str, writer: &OracleWriter) {
    let envelope: AllMidsEnvelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(_) => return, // non-allMids control frames are ignored
    };

    if envelope.channel != "allMids" {
        return;
    }

    let now = Utc::now();
    for (symbol, price_str) in envelope.data.mids {
        match Decimal::from_str(&price_str) {
            Ok(price) => writer.ingest_websocket(&symbol, price, now),
            Err(e) => debug!(symbol, price_str, error = %e, "unparseable mid price"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_for(0);
        let later = backoff_for(10);
        assert!(first >= BASE_BACKOFF);
        assert!(later <= MAX_BACKOFF + Duration::from_millis(250));
    }

    #[test]
    fn allmids_envelope_parses() {
        let text = r#"{"channel":"allMids","data":{"mids":{"HYPE":"27.53","BTC":"61234.1"}}}"#;
        let envelope: AllMidsEnvelope = serde_json::from_str(text).unwrap();
        assert_eq!(envelope.channel, "allMids");
        assert_eq!(envelope.data.mids.get("HYPE").unwrap(), "27.53");
    }
}
