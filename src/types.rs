// src/types.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// One OHLCV bar. Windows are always ordered oldest -> newest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub market: String,
    pub price: Decimal,
    pub change_percent: f64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Order book, best level first on both sides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub market: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub market: String,
    pub side: Side,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
}

// --- Scoring output ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    StrongBuy,
    Buy,
    Hold,
    Avoid,
    StrongAvoid,
}

impl Tier {
    pub fn from_score(score: f64) -> Self {
        if score >= 75.0 {
            Tier::StrongBuy
        } else if score >= 60.0 {
            Tier::Buy
        } else if score >= 45.0 {
            Tier::Hold
        } else if score >= 30.0 {
            Tier::Avoid
        } else {
            Tier::StrongAvoid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Buy,
    Neutral,
    Sell,
}

/// A single indicator's contribution to the total score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Factor {
    pub indicator: &'static str,
    pub note: &'static str,
    pub score: f64,
    pub bias: Bias,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub market: String,
    pub score: f64,
    pub total_score: f64,
    pub tier: Tier,
    pub factors: Vec<Factor>,
}

// --- Ledger ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeKind {
    Buy,
    Sell,
    PartialSell,
}

/// Append-only ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub kind: TradeKind,
    pub market: String,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub quantity: Decimal,
    pub amount: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: f64,
    pub reason: String,
    pub order_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Emitted by the trade stream when a single trade dwarfs the recent average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpikeEvent {
    pub market: String,
    pub price: Decimal,
    pub trade_value: f64,
    pub avg_value: f64,
    pub ratio: f64,
    pub at: DateTime<Utc>,
}

// --- Notification events ---

#[derive(Debug, Clone)]
pub struct PositionView {
    pub market: String,
    pub entry_price: Decimal,
    pub last_price: Decimal,
    pub pnl_percent: f64,
    pub stop_loss_price: Decimal,
    pub phase: &'static str,
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Signal(Signal),
    Entered(TradeRecord),
    Exited(TradeRecord),
    Denied { market: String, reason: String },
    Portfolio { positions: Vec<PositionView>, daily_pnl: Decimal },
    Log(String),
}
