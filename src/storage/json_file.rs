// src/storage/json_file.rs
use crate::core::position::Position;
use crate::storage::PersistenceStore;
use crate::types::TradeRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const POSITIONS_FILE: &str = "positions.json";
const TRADES_FILE: &str = "trades.jsonl";
const DAILY_PNL_FILE: &str = "daily_pnl.json";

/// Plain JSON files under one directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create storage dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let path = self.path(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => serde_json::from_str(&data).with_context(|| format!("corrupt {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    /// Writes to a sibling temp file and renames it over the target, so a
    /// crash mid-write leaves the previous snapshot intact.
    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let tmp = self.path(&format!("{}.tmp", name));
        let data = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("cannot replace {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for JsonFileStore {
    async fn save_open_positions(&self, positions: &[Position]) -> Result<()> {
        self.write_json(POSITIONS_FILE, positions).await
    }

    async fn load_open_positions(&self) -> Result<Vec<Position>> {
        self.read_json(POSITIONS_FILE).await
    }

    async fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(TRADES_FILE))
            .await
            .context("cannot open trade ledger")?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        let path = self.path(TRADES_FILE);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("cannot read trade ledger"),
        };

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        for (n, line) in data.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            // a retried append can repeat a line verbatim
            if !seen.insert(line.trim()) {
                continue;
            }
            match serde_json::from_str::<TradeRecord>(line) {
                Ok(r) => records.push(r),
                // a torn last line after a crash should not hide the rest
                Err(e) => warn!(line = n + 1, "skipping unreadable ledger entry: {}", e),
            }
        }
        Ok(records)
    }

    async fn load_daily_pnl(&self, day: NaiveDate) -> Result<Decimal> {
        let map: BTreeMap<NaiveDate, Decimal> = self.read_json(DAILY_PNL_FILE).await?;
        Ok(map.get(&day).copied().unwrap_or_default())
    }

    async fn save_daily_pnl(&self, day: NaiveDate, pnl: Decimal) -> Result<()> {
        let mut map: BTreeMap<NaiveDate, Decimal> = self.read_json(DAILY_PNL_FILE).await?;
        map.insert(day, pnl);
        self.write_json(DAILY_PNL_FILE, &map).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeKind;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn position(market: &str) -> Position {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        Position {
            market: market.into(),
            entry_price: dec!(150_000),
            entry_time: now,
            quantity: dec!(0.5),
            initial_quantity: dec!(0.5),
            invested: dec!(75_000),
            stop_loss_price: dec!(144_000),
            high_water: dec!(150_000),
            trailing_activated: false,
            trailing_percent: 2.0,
            partial_exits_taken: 0,
            break_even_moved: false,
            overbought_exit_taken: false,
            score: 72.0,
            realized_pnl: Decimal::ZERO,
        }
    }

    fn sell(pnl: Decimal) -> TradeRecord {
        TradeRecord {
            kind: TradeKind::Sell,
            market: "KRW-SOL".into(),
            entry_price: dec!(100),
            exit_price: Some(dec!(110)),
            quantity: dec!(1),
            amount: dec!(110),
            pnl,
            pnl_percent: 10.0,
            reason: "take-profit".into(),
            order_id: "abc".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_files_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.load_open_positions().await.unwrap().is_empty());
        assert!(store.load_trades().await.unwrap().is_empty());
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(store.load_daily_pnl(day).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn positions_snapshot_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store
            .save_open_positions(&[position("KRW-BTC"), position("KRW-ETH")])
            .await
            .unwrap();
        store.save_open_positions(&[position("KRW-ETH")]).await.unwrap();

        let loaded = store.load_open_positions().await.unwrap();
        assert_eq!(loaded, vec![position("KRW-ETH")]);
        assert!(!dir.path().join("positions.json.tmp").exists());
    }

    #[tokio::test]
    async fn ledger_appends_and_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        store.append_trade(&sell(dec!(10))).await.unwrap();
        store.append_trade(&sell(dec!(-4))).await.unwrap();

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("trades.jsonl"))
            .await
            .unwrap();
        file.write_all(b"{\"kind\":\"SE").await.unwrap();
        file.flush().await.unwrap();

        let trades = store.load_trades().await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].pnl, dec!(-4));
    }

    #[tokio::test]
    async fn repeated_ledger_line_counts_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let record = sell(dec!(10));
        store.append_trade(&record).await.unwrap();
        store.append_trade(&record).await.unwrap();
        let other = TradeRecord {
            order_id: "def".into(),
            ..sell(dec!(10))
        };
        store.append_trade(&other).await.unwrap();

        let trades = store.load_trades().await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].order_id, "def");
    }

    #[tokio::test]
    async fn daily_pnl_is_keyed_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let d1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        store.save_daily_pnl(d1, dec!(-12_500)).await.unwrap();
        store.save_daily_pnl(d2, dec!(3_000)).await.unwrap();
        store.save_daily_pnl(d1, dec!(-20_000)).await.unwrap();

        assert_eq!(store.load_daily_pnl(d1).await.unwrap(), dec!(-20_000));
        assert_eq!(store.load_daily_pnl(d2).await.unwrap(), dec!(3_000));
    }
}
