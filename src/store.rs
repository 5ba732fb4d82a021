//! State Store & Telemetry (C9)
//!
//! Append-only daily trade journal plus a current-status snapshot
//! rewritten every tick, both under `DATA_DIR`. Snapshot and ladder
//! files use the teacher's write-temp-then-rename pattern so readers
//! (the excluded dashboard/CLI) never observe a half-written file.
//!
//! Grounded in `data_collector::shared_state::SharedPoolState::write_to_file`
//! (temp-then-rename) and its companion `read_from_file`; the journal
//! append path is new (this spec calls for one JSONL file per day, which
//! the teacher's snapshot-only shared state never needed).
//!
//! Author: AI-Generated
//! Created: 2026-02-14

use crate::types::{BotStatus, LadderState, TradeRecord};
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).with_context(|| format!("failed to create data dir {}", data_dir.display()))?;
        Ok(Self { data_dir })
    }

    fn journal_path(&self, date: chrono::NaiveDate) -> PathBuf {
        self.data_dir.join(format!("trades-{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn status_path(&self) -> PathBuf {
        self.data_dir.join("status.json")
    }

    fn ladder_path(&self, pair_id: u32) -> PathBuf {
        self.data_dir.join(format!("ladder-{pair_id}.json"))
    }

    /// Append one `TradeRecord` to the current day's journal. Monotone
    /// journal invariant (§8) relies on the caller assigning strictly
    /// increasing `id`/`timestamp` before calling this.
    pub fn append_trade(&self, trade: &TradeRecord) -> Result<()> {
        let path = self.journal_path(trade.timestamp.date_naive());
        let line = serde_json::to_string(trade).context("failed to serialize trade record")?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        writeln!(file, "{line}").context("failed to append trade record")?;
        file.sync_data().ok();
        Ok(())
    }

    /// Atomic write-temp-then-rename, shared by the status and ladder snapshots.
    fn write_atomic(path: &Path, json: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, json).with_context(|| format!("failed to write temp file {}", temp_path.display()))?;
        std::fs::rename(&temp_path, path).with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(())
    }

    pub fn write_status(&self, status: &BotStatus) -> Result<()> {
        let json = serde_json::to_string_pretty(status).context("failed to serialize status")?;
        Self::write_atomic(&self.status_path(), &json)
    }

    pub fn write_ladder(&self, ladder: &LadderState) -> Result<()> {
        let json = serde_json::to_string_pretty(ladder).context("failed to serialize ladder")?;
        Self::write_atomic(&self.ladder_path(ladder.pair_id), &json)
    }

    /// Read every trade appended to a given day's journal, in file order
    /// (which is insertion order since the journal is append-only).
    pub fn read_journal(&self, date: chrono::NaiveDate) -> Result<Vec<TradeRecord>> {
        let path = self.journal_path(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path).with_context(|| format!("failed to read journal {}", path.display()))?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("failed to parse journal line"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GridSide, TradeStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_trade(id: u64) -> TradeRecord {
        TradeRecord {
            id,
            pair_id: 1,
            grid_id: 1,
            side: GridSide::Buy,
            in_token: "USDC".into(),
            out_token: "WETH".into(),
            amount_in: dec!(100),
            amount_out: dec!(0.03),
            execution_price: dec!(3333),
            usd_value: dec!(100),
            pool_fee_usd: dec!(0.3),
            gas_usd: dec!(0.1),
            slippage_usd: dec!(0.05),
            total_cost_usd: dec!(0.45),
            net_profit_usd: dec!(0),
            tx_hash: "0xabc".into(),
            block_number: 1,
            status: TradeStatus::Success,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn append_and_read_journal_round_trips() {
        let dir = tempdir();
        let store = StateStore::new(dir.clone()).unwrap();
        let trade = sample_trade(1);
        store.append_trade(&trade).unwrap();

        let read_back = store.read_journal(trade.timestamp.date_naive()).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].id, 1);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn status_write_is_atomic_replace() {
        let dir = tempdir();
        let store = StateStore::new(dir.clone()).unwrap();
        let status = BotStatus {
            started_at: Utc::now(),
            running: true,
            pairs: Vec::new(),
            realized_day_pnl_usd: dec!(0),
            last_updated: Utc::now(),
        };
        store.write_status(&status).unwrap();
        assert!(store.status_path().exists());
        assert!(!store.status_path().with_extension("tmp").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    fn tempdir() -> PathBuf {
        let path = std::env::temp_dir().join(format!("grid-bot-test-{}", uuid_like()));
        path
    }

    fn uuid_like() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }
}
