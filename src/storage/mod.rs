//! Durable state: open positions, the trade ledger and realised daily P&L.

pub mod json_file;
pub mod stats;

use crate::core::position::Position;
use crate::types::TradeRecord;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

pub use json_file::JsonFileStore;
pub use stats::{StatsPeriod, TradeStats};

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Replaces the stored snapshot of open positions.
    async fn save_open_positions(&self, positions: &[Position]) -> Result<()>;

    async fn load_open_positions(&self) -> Result<Vec<Position>>;

    async fn append_trade(&self, record: &TradeRecord) -> Result<()>;

    async fn load_trades(&self) -> Result<Vec<TradeRecord>>;

    /// Realised P&L booked on `day`; zero when nothing was recorded.
    async fn load_daily_pnl(&self, day: NaiveDate) -> Result<Decimal>;

    async fn save_daily_pnl(&self, day: NaiveDate, pnl: Decimal) -> Result<()>;
}
