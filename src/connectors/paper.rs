// src/connectors/paper.rs
use crate::connectors::traits::{ExecutionClient, MarketData};
use crate::types::{OrderResponse, Side};
use crate::utils::precision::floor_volume;
use anyhow::{bail, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Ledger {
    quote: Decimal,
    holdings: HashMap<String, Decimal>,
}

/// Simulated execution against live public prices. Market orders fill at
/// the current ticker price in full.
pub struct PaperExecution {
    market_data: Arc<dyn MarketData>,
    ledger: Mutex<Ledger>,
}

impl PaperExecution {
    pub fn new(market_data: Arc<dyn MarketData>, starting_balance: Decimal) -> Self {
        Self {
            market_data,
            ledger: Mutex::new(Ledger {
                quote: starting_balance,
                holdings: HashMap::new(),
            }),
        }
    }

    /// Seeds holdings for positions restored from disk.
    pub async fn credit(&self, market: &str, quantity: Decimal) {
        let mut ledger = self.ledger.lock().await;
        *ledger.holdings.entry(market.to_string()).or_default() += quantity;
    }

    pub async fn holding(&self, market: &str) -> Decimal {
        let ledger = self.ledger.lock().await;
        ledger.holdings.get(market).copied().unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionClient for PaperExecution {
    async fn quote_balance(&self) -> Result<Decimal> {
        Ok(self.ledger.lock().await.quote)
    }

    async fn buy_market(&self, market: &str, notional: Decimal) -> Result<OrderResponse> {
        let price = self.market_data.get_ticker(market).await?.price;
        if price <= Decimal::ZERO {
            bail!("no valid price for {}", market);
        }
        let qty = floor_volume(notional / price);
        if qty.is_zero() {
            bail!("order of {} is too small for {} at {}", notional, market, price);
        }
        let cost = qty * price;

        let mut ledger = self.ledger.lock().await;
        if ledger.quote < cost {
            bail!("insufficient balance: {} < {}", ledger.quote, cost);
        }
        ledger.quote -= cost;
        *ledger.holdings.entry(market.to_string()).or_default() += qty;

        let id = Uuid::new_v4().to_string();
        info!(%market, %qty, %price, order_id = %id, "[paper] buy filled");
        Ok(OrderResponse {
            id,
            market: market.to_string(),
            side: Side::Buy,
            filled_qty: qty,
            avg_price: Some(price),
        })
    }

    async fn sell_market(&self, market: &str, quantity: Decimal) -> Result<OrderResponse> {
        let price = self.market_data.get_ticker(market).await?.price;

        let mut ledger = self.ledger.lock().await;
        let held = ledger.holdings.get(market).copied().unwrap_or_default();
        if held < quantity {
            bail!("cannot sell {} {}: only {} held", quantity, market, held);
        }
        let remaining = held - quantity;
        if remaining.is_zero() {
            ledger.holdings.remove(market);
        } else {
            ledger.holdings.insert(market.to_string(), remaining);
        }
        ledger.quote += quantity * price;

        let id = Uuid::new_v4().to_string();
        info!(%market, %quantity, %price, order_id = %id, "[paper] sell filled");
        Ok(OrderResponse {
            id,
            market: market.to_string(),
            side: Side::Sell,
            filled_qty: quantity,
            avg_price: Some(price),
        })
    }
}
