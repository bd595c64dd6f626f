// src/connectors/messages.rs
use serde::Deserialize;

/// Minute/day candle from `GET /v1/candles/...`. Upbit returns newest first.
#[derive(Debug, Deserialize)]
pub struct UpbitCandle {
    pub market: String,

    /// `YYYY-MM-DDTHH:MM:SS` without offset, in UTC.
    pub candle_date_time_utc: String,

    #[serde(rename = "opening_price")]
    pub open: f64,

    #[serde(rename = "high_price")]
    pub high: f64,

    #[serde(rename = "low_price")]
    pub low: f64,

    #[serde(rename = "trade_price")]
    pub close: f64,

    #[serde(rename = "candle_acc_trade_volume")]
    pub volume: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpbitTicker {
    pub market: String,
    pub trade_price: f64,
    /// Signed change vs. the previous close, as a fraction.
    pub signed_change_rate: f64,
    pub timestamp: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpbitOrderbookUnit {
    pub ask_price: f64,
    pub bid_price: f64,
    pub ask_size: f64,
    pub bid_size: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpbitOrderbook {
    pub market: String,
    pub orderbook_units: Vec<UpbitOrderbookUnit>,
}

/// Trade event from `wss://api.upbit.com/websocket/v1` (DEFAULT format).
#[derive(Debug, Deserialize)]
pub struct UpbitTradeEvent {
    #[serde(rename = "type")]
    pub event_type: String, // "trade"

    /// Market code, e.g. `KRW-BTC`.
    pub code: String,

    pub trade_price: f64,

    pub trade_volume: f64,

    /// `ASK` or `BID`.
    pub ask_bid: String,

    pub trade_timestamp: u64,
}
