// src/core/position.rs
use crate::error::EngineError;
use crate::types::PositionView;
use crate::utils::precision::decimal_to_f64;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One open position. Mutated only by the lifecycle manager; the persisted
/// copy is a mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market: String,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Quantity still held.
    pub quantity: Decimal,
    /// Quantity bought at entry.
    pub initial_quantity: Decimal,
    /// Cost basis of the quantity still held.
    pub invested: Decimal,
    pub stop_loss_price: Decimal,
    pub high_water: Decimal,
    pub trailing_activated: bool,
    pub trailing_percent: f64,
    /// Ladder stages already sold.
    pub partial_exits_taken: u32,
    pub break_even_moved: bool,
    #[serde(default)]
    pub overbought_exit_taken: bool,
    pub score: f64,
    #[serde(default)]
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    Partial1,
    Partial2,
    Closed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Open => "OPEN",
            Phase::Partial1 => "PARTIAL_1",
            Phase::Partial2 => "PARTIAL_2",
            Phase::Closed => "CLOSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    PartialTakeProfit,
    Overbought,
    TimeExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::TrailingStop => "trailing-stop",
            ExitReason::TakeProfit => "take-profit",
            ExitReason::PartialTakeProfit => "partial-take-profit",
            ExitReason::Overbought => "overbought",
            ExitReason::TimeExit => "time-exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Position {
    pub fn phase(&self) -> Phase {
        if self.quantity <= Decimal::ZERO {
            return Phase::Closed;
        }
        match self.partial_exits_taken {
            0 => Phase::Open,
            1 => Phase::Partial1,
            _ => Phase::Partial2,
        }
    }

    pub fn profit_percent(&self, price: Decimal) -> f64 {
        if self.entry_price.is_zero() {
            return 0.0;
        }
        decimal_to_f64((price / self.entry_price - Decimal::ONE) * Decimal::ONE_HUNDRED)
    }

    /// Profit at the high-water mark.
    pub fn peak_profit_percent(&self) -> f64 {
        self.profit_percent(self.high_water)
    }

    /// Rejects snapshots that cannot be monitored.
    pub fn validate(&self) -> Result<(), EngineError> {
        let corrupt = |reason: &str| EngineError::StateCorruption {
            market: self.market.clone(),
            reason: reason.to_string(),
        };
        if self.entry_price <= Decimal::ZERO {
            return Err(corrupt("non-positive entry price"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(corrupt("non-positive quantity"));
        }
        if self.quantity > self.initial_quantity {
            return Err(corrupt("quantity exceeds the bought quantity"));
        }
        Ok(())
    }

    pub fn view(&self, last_price: Decimal) -> PositionView {
        PositionView {
            market: self.market.clone(),
            entry_price: self.entry_price,
            last_price,
            pnl_percent: self.profit_percent(last_price),
            stop_loss_price: self.stop_loss_price,
            phase: self.phase().as_str(),
        }
    }
}
