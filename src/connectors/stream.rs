// src/connectors/stream.rs
use crate::connectors::messages::UpbitTradeEvent;
use crate::connectors::traits::StreamClient;
use crate::types::VolumeSpikeEvent;
use crate::utils::precision::decimal_from_f64;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

const WS_URL: &str = "wss://api.upbit.com/websocket/v1";
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECTS: u32 = 10;

#[derive(Debug, Clone)]
pub struct SpikeRules {
    pub window: ChronoDuration,
    pub min_trades: usize,
    pub threshold: f64,
    pub cooldown: ChronoDuration,
}

impl Default for SpikeRules {
    fn default() -> Self {
        Self {
            window: ChronoDuration::minutes(5),
            min_trades: 10,
            threshold: 3.0,
            cooldown: ChronoDuration::minutes(3),
        }
    }
}

/// Flags trades whose value is a multiple of the recent per-trade average.
#[derive(Debug, Default)]
pub struct VolumeSpikeDetector {
    rules: SpikeRules,
    history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
    last_alert: HashMap<String, DateTime<Utc>>,
}

impl VolumeSpikeDetector {
    pub fn new(rules: SpikeRules) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn on_trade(&mut self, market: &str, price: f64, volume: f64, at: DateTime<Utc>) -> Option<VolumeSpikeEvent> {
        let value = price * volume;
        let window_start = at - self.rules.window;

        let trades = self.history.entry(market.to_string()).or_default();
        trades.push_back((at, value));
        while trades.front().is_some_and(|(t, _)| *t < window_start) {
            trades.pop_front();
        }
        if trades.len() < self.rules.min_trades {
            return None;
        }

        let avg = trades.iter().map(|(_, v)| v).sum::<f64>() / trades.len() as f64;
        if avg <= 0.0 {
            return None;
        }
        let ratio = value / avg;
        if ratio < self.rules.threshold {
            return None;
        }
        if let Some(last) = self.last_alert.get(market) {
            if at - *last < self.rules.cooldown {
                return None;
            }
        }
        self.last_alert.insert(market.to_string(), at);

        Some(VolumeSpikeEvent {
            market: market.to_string(),
            price: decimal_from_f64(price),
            trade_value: value,
            avg_value: avg,
            ratio,
            at,
        })
    }
}

fn subscribe_frame(markets: &[String]) -> String {
    json!([
        { "ticket": format!("volume-monitor-{}", Utc::now().timestamp_millis()) },
        { "type": "trade", "codes": markets, "isOnlyRealtime": true }
    ])
    .to_string()
}

fn event_time(millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

/// Trade feed over the public websocket. Reconnects after drops.
pub struct UpbitTradeStream {
    rules: SpikeRules,
}

impl UpbitTradeStream {
    pub fn new(rules: SpikeRules) -> Self {
        Self { rules }
    }
}

/// Reads one connection until it closes. Returns false once the receiver is gone.
async fn pump(
    url: &Url,
    markets: &[String],
    detector: &mut VolumeSpikeDetector,
    sender: &mpsc::Sender<VolumeSpikeEvent>,
) -> Result<bool> {
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();
    write.send(Message::Text(subscribe_frame(markets))).await?;
    info!(markets = markets.len(), "trade stream connected");

    while let Some(message) = read.next().await {
        let payload = match message? {
            Message::Binary(bytes) => bytes,
            Message::Text(text) => text.into_bytes(),
            Message::Close(_) => break,
            _ => continue,
        };
        let trade: UpbitTradeEvent = match serde_json::from_slice(&payload) {
            Ok(t) => t,
            Err(e) => {
                debug!("skipping stream frame: {}", e);
                continue;
            }
        };
        if trade.event_type != "trade" {
            continue;
        }

        let at = event_time(trade.trade_timestamp);
        if let Some(spike) = detector.on_trade(&trade.code, trade.trade_price, trade.trade_volume, at) {
            info!(market = %spike.market, ratio = spike.ratio, side = %trade.ask_bid, "volume spike");
            match sender.try_send(spike) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    warn!(market = %dropped.market, "spike channel full, event dropped");
                }
                Err(TrySendError::Closed(_)) => return Ok(false),
            }
        }
    }
    Ok(true)
}

#[async_trait]
impl StreamClient for UpbitTradeStream {
    async fn subscribe_spikes(&mut self, markets: &[String], sender: mpsc::Sender<VolumeSpikeEvent>) -> Result<()> {
        let url = Url::parse(WS_URL)?;
        let markets = markets.to_vec();
        let mut detector = VolumeSpikeDetector::new(self.rules.clone());

        info!("Starting trade stream task for {} markets", markets.len());
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                match pump(&url, &markets, &mut detector, &sender).await {
                    Ok(false) => break,
                    Ok(true) => {
                        failures = 0;
                        warn!("trade stream closed by server");
                    }
                    Err(e) => {
                        failures += 1;
                        error!("trade stream error ({}/{}): {}", failures, MAX_RECONNECTS, e);
                    }
                }
                if failures >= MAX_RECONNECTS {
                    error!("trade stream gave up after {} attempts", MAX_RECONNECTS);
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            info!("trade stream task finished");
        });
        Ok(())
    }
}
