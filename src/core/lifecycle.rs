//! Per-position exit state machine.
//!
//! Evaluation order on every tick:
//! 1. Stop-loss (a hit while trailing reports `trailing-stop`), then the
//!    optional full take-profit
//! 2. Break-even migration (once)
//! 3. Next partial take-profit stage (one order per tick)
//! 4. Trailing activation (once), high-water tracking, stop ratchet
//! 5. Trailing trigger
//! 6. Extreme-overbought partial (once)
//! 7. Time exit when not under water
//!
//! Stop migrations (2 and 4) are applied before any order is proposed so the
//! stop never lags a tick behind the high-water mark. `stop_loss_price` only
//! ever moves up.

use super::position::{ExitReason, Position};
use crate::config::{ExitConfig, StopMode};
use crate::types::{TradeKind, TradeRecord};
use crate::utils::precision::{decimal_from_f64, floor_volume};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// ATR fallback for stop placement, as a fraction of the entry price.
const ATR_FALLBACK_RATIO: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialTrigger {
    /// Ladder stage index (0-based).
    Stage(u32),
    Overbought,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    Hold,
    Partial {
        quantity: Decimal,
        reason: ExitReason,
        trigger: PartialTrigger,
    },
    Close {
        reason: ExitReason,
    },
}

enum GuardOutcome {
    Sell(Decimal),
    Upgrade,
    Skip,
}

fn pct(value: f64) -> Decimal {
    decimal_from_f64(value) / Decimal::ONE_HUNDRED
}

pub struct PositionLifecycleManager {
    exits: ExitConfig,
    min_order_value: Decimal,
}

impl PositionLifecycleManager {
    pub fn new(exits: ExitConfig, min_order_value: Decimal) -> Self {
        Self {
            exits,
            min_order_value,
        }
    }

    /// Initial stop under the entry, by ATR multiple or fixed percent.
    pub fn initial_stop(&self, entry: Decimal, atr: Option<f64>) -> Decimal {
        let stop = match self.exits.stop_mode {
            StopMode::Atr => {
                let atr = atr
                    .filter(|a| *a > 0.0)
                    .map(decimal_from_f64)
                    .unwrap_or(entry * decimal_from_f64(ATR_FALLBACK_RATIO));
                entry - atr * decimal_from_f64(self.exits.atr_stop_multiplier)
            }
            StopMode::Percent => entry * (Decimal::ONE - pct(self.exits.stop_loss_percent)),
        };
        if stop <= Decimal::ZERO {
            // keep the stop strictly positive
            entry * pct(1.0)
        } else {
            stop
        }
    }

    pub fn open(
        &self,
        market: &str,
        entry_price: Decimal,
        quantity: Decimal,
        invested: Decimal,
        score: f64,
        atr: Option<f64>,
        now: DateTime<Utc>,
    ) -> Position {
        Position {
            market: market.to_string(),
            entry_price,
            entry_time: now,
            quantity,
            initial_quantity: quantity,
            invested,
            stop_loss_price: self.initial_stop(entry_price, atr),
            high_water: entry_price,
            trailing_activated: false,
            trailing_percent: self.exits.trailing_percent,
            partial_exits_taken: 0,
            break_even_moved: false,
            overbought_exit_taken: false,
            score,
            realized_pnl: Decimal::ZERO,
        }
    }

    /// Reapplies the ratchet to a reloaded position so a restart can never
    /// loosen a trailing stop.
    pub fn restore(&self, pos: &mut Position) {
        if pos.trailing_activated {
            pos.trailing_percent = self.trail_percent(pos);
            let candidate = pos.high_water * (Decimal::ONE - pct(pos.trailing_percent));
            if candidate > pos.stop_loss_price {
                pos.stop_loss_price = candidate;
            }
        }
    }

    /// Whether step 6 could fire at this price. The caller only fetches the
    /// fast oscillator when it does.
    pub fn wants_oscillator(&self, pos: &Position, price: Decimal) -> bool {
        self.exits.overbought_exit
            && !pos.overbought_exit_taken
            && pos.profit_percent(price) >= self.exits.overbought_min_profit
    }

    pub fn on_tick(
        &self,
        pos: &mut Position,
        price: Decimal,
        fast_rsi: Option<f64>,
        now: DateTime<Utc>,
    ) -> ExitAction {
        let exits = &self.exits;

        if price <= pos.stop_loss_price {
            let reason = if pos.trailing_activated {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            return ExitAction::Close { reason };
        }

        let profit = pos.profit_percent(price);
        if exits.take_profit_percent.map_or(false, |tp| profit >= tp) {
            return ExitAction::Close {
                reason: ExitReason::TakeProfit,
            };
        }

        self.migrate_stops(pos, price, profit);

        if let Some(stage) = exits.partial_stages.get(pos.partial_exits_taken as usize) {
            if profit >= stage.trigger_percent {
                let reason = ExitReason::PartialTakeProfit;
                let trigger = PartialTrigger::Stage(pos.partial_exits_taken);
                match self.guard_partial(pos, price, stage.sell_ratio) {
                    GuardOutcome::Sell(quantity) => {
                        return ExitAction::Partial {
                            quantity,
                            reason,
                            trigger,
                        }
                    }
                    GuardOutcome::Upgrade => return ExitAction::Close { reason },
                    GuardOutcome::Skip => {
                        debug!(market = %pos.market, "partial below minimum order, skipped this tick")
                    }
                }
            }
        }

        if pos.trailing_activated && pos.high_water > Decimal::ZERO {
            let drawdown = decimal_from_f64(pos.trailing_percent);
            if (pos.high_water - price) / pos.high_water * Decimal::ONE_HUNDRED >= drawdown {
                return ExitAction::Close {
                    reason: ExitReason::TrailingStop,
                };
            }
        }

        if self.wants_oscillator(pos, price)
            && fast_rsi.map_or(false, |r| r >= exits.overbought_rsi)
        {
            let reason = ExitReason::Overbought;
            match self.guard_partial(pos, price, exits.overbought_sell_ratio) {
                GuardOutcome::Sell(quantity) => {
                    return ExitAction::Partial {
                        quantity,
                        reason,
                        trigger: PartialTrigger::Overbought,
                    }
                }
                GuardOutcome::Upgrade => return ExitAction::Close { reason },
                GuardOutcome::Skip => {}
            }
        }

        let held_hours = (now - pos.entry_time).num_seconds() as f64 / 3600.0;
        if held_hours > exits.max_hold_hours && profit >= 0.0 {
            return ExitAction::Close {
                reason: ExitReason::TimeExit,
            };
        }

        ExitAction::Hold
    }

    fn trail_percent(&self, pos: &Position) -> f64 {
        if pos.peak_profit_percent() >= self.exits.big_profit_threshold {
            self.exits.big_profit_trailing_percent
        } else {
            self.exits.trailing_percent
        }
    }

    fn raise_stop(pos: &mut Position, candidate: Decimal) {
        if candidate > pos.stop_loss_price {
            pos.stop_loss_price = candidate;
        }
    }

    fn migrate_stops(&self, pos: &mut Position, price: Decimal, profit: f64) {
        let exits = &self.exits;

        if !pos.break_even_moved && profit >= exits.break_even_trigger {
            pos.break_even_moved = true;
            Self::raise_stop(pos, pos.entry_price * (Decimal::ONE + pct(exits.break_even_offset)));
            info!(market = %pos.market, stop = %pos.stop_loss_price, "stop moved to break-even");
        }

        if !pos.trailing_activated && profit >= exits.trailing_trigger {
            pos.trailing_activated = true;
            Self::raise_stop(
                pos,
                pos.entry_price * (Decimal::ONE + pct(exits.trailing_floor_offset)),
            );
            info!(market = %pos.market, profit, "trailing stop activated");
        }

        if pos.trailing_activated {
            if price > pos.high_water {
                pos.high_water = price;
            }
            pos.trailing_percent = self.trail_percent(pos);
            let trail = pos.high_water * (Decimal::ONE - pct(pos.trailing_percent));
            Self::raise_stop(pos, trail);
        }
    }

    /// Minimum-order guard: a partial that would leave dust closes the whole
    /// position; a partial that is itself dust waits for the next tick.
    fn guard_partial(&self, pos: &Position, price: Decimal, ratio: f64) -> GuardOutcome {
        let quantity = floor_volume(pos.quantity * decimal_from_f64(ratio));
        let remaining = pos.quantity - quantity;
        if remaining * price < self.min_order_value {
            GuardOutcome::Upgrade
        } else if quantity * price < self.min_order_value || quantity.is_zero() {
            GuardOutcome::Skip
        } else {
            GuardOutcome::Sell(quantity)
        }
    }

    /// Books a fill against the position and returns the ledger entry.
    /// `sold` is capped at the quantity held; a close sells exactly the rest.
    pub fn settle(
        &self,
        pos: &mut Position,
        action: &ExitAction,
        sold: Decimal,
        fill_price: Decimal,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Option<TradeRecord> {
        let (kind, reason, sold) = match action {
            ExitAction::Hold => return None,
            ExitAction::Close { reason } => (TradeKind::Sell, *reason, sold.min(pos.quantity)),
            ExitAction::Partial {
                reason, trigger, ..
            } => {
                match trigger {
                    PartialTrigger::Stage(_) => pos.partial_exits_taken += 1,
                    PartialTrigger::Overbought => pos.overbought_exit_taken = true,
                }
                (TradeKind::PartialSell, *reason, sold.min(pos.quantity))
            }
        };
        let kind = if kind == TradeKind::PartialSell && sold == pos.quantity {
            TradeKind::Sell
        } else if kind == TradeKind::Sell && sold < pos.quantity {
            // chunked close that stopped early
            TradeKind::PartialSell
        } else {
            kind
        };

        let pnl = (fill_price - pos.entry_price) * sold;
        pos.quantity -= sold;
        pos.invested = pos.entry_price * pos.quantity;
        pos.realized_pnl += pnl;

        Some(TradeRecord {
            kind,
            market: pos.market.clone(),
            entry_price: pos.entry_price,
            exit_price: Some(fill_price),
            quantity: sold,
            amount: fill_price * sold,
            pnl,
            pnl_percent: pos.profit_percent(fill_price),
            reason: reason.as_str().to_string(),
            order_id: order_id.to_string(),
            timestamp: now,
        })
    }
}
