// src/connectors/upbit.rs
use crate::connectors::messages::{UpbitCandle, UpbitOrderbook, UpbitTicker};
use crate::connectors::traits::{CandleSource, MarketData, MarketNotFound};
use crate::types::{BookLevel, Candle, OrderBook, Ticker};
use crate::utils::precision::decimal_from_f64;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const MINUTE_UNITS: [u32; 8] = [1, 3, 5, 10, 15, 30, 60, 240];
/// Per-request page limit of the candle endpoints.
const MAX_CANDLES: usize = 200;

/// Public (unauthenticated) Upbit quotation API.
pub struct UpbitClient {
    http_client: Client,
    base_rest_url: String,
}

impl UpbitClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http_client,
            base_rest_url: "https://api.upbit.com/v1".to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, String)]) -> Result<T> {
        let query = serde_urlencoded::to_string(params)?;
        let url = format!("{}{}?{}", self.base_rest_url, endpoint, query);
        debug!(%url, "GET");

        let response = self
            .http_client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("request to {} failed", endpoint))?
            .error_for_status()?;

        Ok(response.json::<T>().await?)
    }

    async fn candles(&self, endpoint: &str, market: &str, count: usize) -> Result<Vec<Candle>> {
        let params = [
            ("market", market.to_string()),
            ("count", count.min(MAX_CANDLES).to_string()),
        ];
        let raw: Vec<UpbitCandle> = self.get_json(endpoint, &params).await?;
        to_candles(raw)
    }
}

fn parse_candle(c: UpbitCandle) -> Result<Candle> {
    let open_time = NaiveDateTime::parse_from_str(&c.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
        .with_context(|| format!("bad candle time for {}: {}", c.market, c.candle_date_time_utc))?
        .and_utc();
    Ok(Candle {
        open_time,
        open: c.open,
        high: c.high,
        low: c.low,
        close: c.close,
        volume: c.volume,
    })
}

/// Converts a newest-first page into an oldest-first window.
pub fn to_candles(raw: Vec<UpbitCandle>) -> Result<Vec<Candle>> {
    let mut candles = raw.into_iter().map(parse_candle).collect::<Result<Vec<_>>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

/// Upbit answers an unlisted market code with 404.
fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .and_then(|e| e.status())
        .map_or(false, |status| status == StatusCode::NOT_FOUND)
}

pub fn to_ticker(t: UpbitTicker) -> Ticker {
    Ticker {
        market: t.market,
        price: decimal_from_f64(t.trade_price),
        change_percent: t.signed_change_rate * 100.0,
        timestamp: t.timestamp,
    }
}

pub fn to_book(raw: UpbitOrderbook, depth: usize) -> OrderBook {
    let units = raw.orderbook_units.iter().take(depth);
    OrderBook {
        market: raw.market.clone(),
        bids: units
            .clone()
            .map(|u| BookLevel {
                price: decimal_from_f64(u.bid_price),
                size: decimal_from_f64(u.bid_size),
            })
            .collect(),
        asks: units
            .map(|u| BookLevel {
                price: decimal_from_f64(u.ask_price),
                size: decimal_from_f64(u.ask_size),
            })
            .collect(),
    }
}

#[async_trait]
impl CandleSource for UpbitClient {
    async fn get_candles(&self, market: &str, unit_minutes: u32, count: usize) -> Result<Vec<Candle>> {
        if !MINUTE_UNITS.contains(&unit_minutes) {
            return Err(anyhow!("unsupported candle unit {}m", unit_minutes));
        }
        self.candles(&format!("/candles/minutes/{}", unit_minutes), market, count)
            .await
    }

    async fn get_daily_candles(&self, market: &str, count: usize) -> Result<Vec<Candle>> {
        self.candles("/candles/days", market, count).await
    }
}

#[async_trait]
impl MarketData for UpbitClient {
    async fn get_ticker(&self, market: &str) -> Result<Ticker> {
        let raw: Vec<UpbitTicker> = match self
            .get_json("/ticker", &[("markets", market.to_string())])
            .await
        {
            Ok(raw) => raw,
            Err(e) if is_not_found(&e) => return Err(MarketNotFound(market.to_string()).into()),
            Err(e) => return Err(e),
        };
        raw.into_iter()
            .next()
            .map(to_ticker)
            .ok_or_else(|| MarketNotFound(market.to_string()).into())
    }

    async fn get_book(&self, market: &str, depth: usize) -> Result<OrderBook> {
        let raw: Vec<UpbitOrderbook> = self
            .get_json("/orderbook", &[("markets", market.to_string())])
            .await?;
        raw.into_iter()
            .next()
            .map(|b| to_book(b, depth))
            .ok_or_else(|| anyhow!("no order book returned for {}", market))
    }
}
