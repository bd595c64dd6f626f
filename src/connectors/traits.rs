use crate::types::{Candle, OrderBook, OrderResponse, Ticker, VolumeSpikeEvent};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;

/// The exchange does not list the market. Retrying will not help.
#[derive(Debug, Error)]
#[error("market {0} is not listed")]
pub struct MarketNotFound(pub String);

#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Minute candles, oldest first.
    async fn get_candles(&self, market: &str, unit_minutes: u32, count: usize) -> Result<Vec<Candle>>;

    /// Daily candles, oldest first. Feeds the higher-timeframe filter.
    async fn get_daily_candles(&self, market: &str, count: usize) -> Result<Vec<Candle>>;
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Fails with `MarketNotFound` when the market is not listed.
    async fn get_ticker(&self, market: &str) -> Result<Ticker>;

    async fn get_book(&self, market: &str, depth: usize) -> Result<OrderBook>;
}

/// Order placement. Callers must not retry blindly: a failed call may still
/// have filled, so the next decision re-checks state instead.
#[async_trait]
pub trait ExecutionClient: Send + Sync {
    /// Free balance in the quote currency.
    async fn quote_balance(&self) -> Result<Decimal>;

    /// Spends `notional` quote units at market.
    async fn buy_market(&self, market: &str, notional: Decimal) -> Result<OrderResponse>;

    async fn sell_market(&self, market: &str, quantity: Decimal) -> Result<OrderResponse>;
}

#[async_trait]
pub trait StreamClient: Send + Sync {
    /// Starts a background feed that pushes spike events into `sender`.
    async fn subscribe_spikes(
        &mut self,
        markets: &[String],
        sender: mpsc::Sender<VolumeSpikeEvent>,
    ) -> Result<()>;
}
