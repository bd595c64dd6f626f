//! Portfolio state and entry admission control.

use crate::config::RiskConfig;
use crate::core::position::Position;
use crate::types::{TradeKind, TradeRecord};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitMark {
    pub at: DateTime<Utc>,
    pub profitable: bool,
}

/// Process-wide risk state. Owned by the engine task; nothing else mutates it.
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub positions: BTreeMap<String, Position>,
    pub daily_pnl: Decimal,
    pub trading_day: NaiveDate,
    utc_offset_hours: i32,
    last_entry: HashMap<String, DateTime<Utc>>,
    last_exit: HashMap<String, ExitMark>,
    spikes: HashMap<String, DateTime<Utc>>,
}

pub fn trading_day_of(now: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDate {
    match FixedOffset::east_opt(utc_offset_hours * 3600) {
        Some(tz) => now.with_timezone(&tz).date_naive(),
        None => now.date_naive(),
    }
}

impl PortfolioState {
    pub fn new(now: DateTime<Utc>, utc_offset_hours: i32) -> Self {
        Self {
            positions: BTreeMap::new(),
            daily_pnl: Decimal::ZERO,
            trading_day: trading_day_of(now, utc_offset_hours),
            utc_offset_hours,
            last_entry: HashMap::new(),
            last_exit: HashMap::new(),
            spikes: HashMap::new(),
        }
    }

    /// Resets the daily P&L when the local date changed. Returns true on rollover.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = trading_day_of(now, self.utc_offset_hours);
        if today == self.trading_day {
            return false;
        }
        info!(from = %self.trading_day, to = %today, pnl = %self.daily_pnl, "daily rollover");
        self.trading_day = today;
        self.daily_pnl = Decimal::ZERO;
        true
    }

    pub fn invested_total(&self) -> Decimal {
        self.positions.values().map(|p| p.invested).sum()
    }

    pub fn record_entry(&mut self, position: Position) {
        self.last_entry
            .insert(position.market.clone(), position.entry_time);
        self.positions.insert(position.market.clone(), position);
    }

    pub fn record_realized(&mut self, pnl: Decimal) {
        self.daily_pnl += pnl;
    }

    /// Removes a fully closed position and starts its cooldown.
    pub fn record_close(&mut self, market: &str, at: DateTime<Utc>) -> Option<Position> {
        let closed = self.positions.remove(market)?;
        self.last_exit.insert(
            market.to_string(),
            ExitMark {
                at,
                profitable: closed.realized_pnl > Decimal::ZERO,
            },
        );
        Some(closed)
    }

    /// Rebuilds cooldown marks from the trade ledger after a restart. A full
    /// sell counts as profitable when the round trip since its buy netted a
    /// gain, partial sells included.
    pub fn restore_marks(&mut self, ledger: &[TradeRecord]) {
        let mut ordered: Vec<&TradeRecord> = ledger.iter().collect();
        ordered.sort_by_key(|r| r.timestamp);
        let mut round_trip: HashMap<&str, Decimal> = HashMap::new();
        for record in ordered {
            let market = record.market.as_str();
            match record.kind {
                TradeKind::Buy => {
                    round_trip.insert(market, Decimal::ZERO);
                    let entry = self.last_entry.entry(market.to_string()).or_insert(record.timestamp);
                    *entry = (*entry).max(record.timestamp);
                }
                TradeKind::PartialSell => {
                    *round_trip.entry(market).or_default() += record.pnl;
                }
                TradeKind::Sell => {
                    let pnl = round_trip.remove(market).unwrap_or_default() + record.pnl;
                    self.last_exit.insert(
                        market.to_string(),
                        ExitMark {
                            at: record.timestamp,
                            profitable: pnl > Decimal::ZERO,
                        },
                    );
                }
            }
        }
    }

    pub fn record_spike(&mut self, market: &str, at: DateTime<Utc>) {
        self.spikes.insert(market.to_string(), at);
    }

    pub fn fresh_spike(&self, market: &str, now: DateTime<Utc>, within_minutes: i64) -> bool {
        self.spikes
            .get(market)
            .map_or(false, |at| now - *at <= Duration::minutes(within_minutes))
    }

    pub fn last_exit(&self, market: &str) -> Option<ExitMark> {
        self.last_exit.get(market).copied()
    }

    /// Latest of entry and exit; the cooldown runs from here.
    fn cooldown_anchor(&self, market: &str) -> Option<DateTime<Utc>> {
        let entry = self.last_entry.get(market).copied();
        let exit = self.last_exit.get(market).map(|e| e.at);
        entry.max(exit)
    }
}

#[derive(Debug, Clone)]
pub struct EntryRequest<'a> {
    pub market: &'a str,
    pub score: f64,
    /// Score-sized amount the engine intends to spend.
    pub proposed: Decimal,
    /// Free quote balance on the account.
    pub available_capital: Decimal,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Upper bound for the order amount.
    pub available: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Denial {
    TradingDisabled,
    ScoreBelowMinimum { score: f64, min: f64 },
    MaxPositions { open: usize, max: usize },
    AlreadyHolding,
    Cooldown { remaining_minutes: i64 },
    DailyLossLimit { pnl: Decimal, limit: Decimal },
    InsufficientCapital { available: Decimal, min: Decimal },
    CapitalCap { invested: Decimal, proposed: Decimal, max: Decimal },
}

impl Denial {
    pub fn reason(&self) -> &'static str {
        match self {
            Denial::TradingDisabled => "trading disabled",
            Denial::ScoreBelowMinimum { .. } => "score below minimum",
            Denial::MaxPositions { .. } => "max positions",
            Denial::AlreadyHolding => "already holding",
            Denial::Cooldown { .. } => "cooldown",
            Denial::DailyLossLimit { .. } => "daily loss limit",
            Denial::InsufficientCapital { .. } => "insufficient capital",
            Denial::CapitalCap { .. } => "max total investment",
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::ScoreBelowMinimum { score, min } => {
                write!(f, "{} ({} < {})", self.reason(), score, min)
            }
            Denial::MaxPositions { open, max } => write!(f, "{} ({}/{})", self.reason(), open, max),
            Denial::Cooldown { remaining_minutes } => {
                write!(f, "{} ({}m left)", self.reason(), remaining_minutes)
            }
            Denial::DailyLossLimit { pnl, limit } => {
                write!(f, "{} ({} <= -{})", self.reason(), pnl, limit)
            }
            Denial::InsufficientCapital { available, min } => {
                write!(f, "{} ({} < {})", self.reason(), available, min)
            }
            Denial::CapitalCap {
                invested,
                proposed,
                max,
            } => write!(f, "{} ({} + {} > {})", self.reason(), invested, proposed, max),
            _ => f.write_str(self.reason()),
        }
    }
}

pub struct RiskGuard {
    cfg: RiskConfig,
    min_score: f64,
}

impl RiskGuard {
    pub fn new(cfg: RiskConfig, min_score: f64) -> Self {
        Self { cfg, min_score }
    }

    /// Runs the ordered admission checks; the first failure wins.
    /// Pure: identical state, request and config give an identical answer.
    pub fn admit(&self, state: &PortfolioState, req: &EntryRequest<'_>) -> Result<Admission, Denial> {
        let cfg = &self.cfg;

        if !cfg.trading_enabled {
            return Err(Denial::TradingDisabled);
        }
        if req.score < self.min_score {
            return Err(Denial::ScoreBelowMinimum {
                score: req.score,
                min: self.min_score,
            });
        }
        if state.positions.len() >= cfg.max_positions {
            return Err(Denial::MaxPositions {
                open: state.positions.len(),
                max: cfg.max_positions,
            });
        }
        if state.positions.contains_key(req.market) {
            return Err(Denial::AlreadyHolding);
        }
        if let Some(remaining) = self.cooldown_remaining(state, req.market, req.now) {
            return Err(Denial::Cooldown {
                remaining_minutes: remaining.num_minutes().max(1),
            });
        }
        if state.daily_pnl <= -cfg.daily_loss_limit {
            return Err(Denial::DailyLossLimit {
                pnl: state.daily_pnl,
                limit: cfg.daily_loss_limit,
            });
        }
        if req.available_capital < cfg.min_order_value {
            return Err(Denial::InsufficientCapital {
                available: req.available_capital,
                min: cfg.min_order_value,
            });
        }
        let invested = state.invested_total();
        if invested + req.proposed > cfg.max_total_invest {
            return Err(Denial::CapitalCap {
                invested,
                proposed: req.proposed,
                max: cfg.max_total_invest,
            });
        }

        Ok(Admission {
            available: req.available_capital.min(cfg.max_total_invest - invested),
        })
    }

    /// The narrower re-entry window applies only after a profitable close
    /// with a fresh volume spike on the market.
    fn cooldown_remaining(
        &self,
        state: &PortfolioState,
        market: &str,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let anchor = state.cooldown_anchor(market)?;
        let fast_path = state.last_exit(market).map_or(false, |e| e.profitable)
            && state.fresh_spike(market, now, self.cfg.spike_fresh_minutes);
        let window = if fast_path {
            Duration::minutes(self.cfg.reentry_cooldown_minutes)
        } else {
            Duration::minutes(self.cfg.cooldown_minutes)
        };
        let elapsed = now - anchor;
        (elapsed < window).then(|| window - elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap()
    }

    fn guard() -> RiskGuard {
        RiskGuard::new(RiskConfig::default(), 70.0)
    }

    fn request(market: &str, now: DateTime<Utc>) -> EntryRequest<'_> {
        EntryRequest {
            market,
            score: 80.0,
            proposed: dec!(100_000),
            available_capital: dec!(1_000_000),
            now,
        }
    }

    fn position(market: &str, invested: Decimal, at: DateTime<Utc>) -> Position {
        Position {
            market: market.into(),
            entry_price: invested,
            entry_time: at,
            quantity: dec!(1),
            initial_quantity: dec!(1),
            invested,
            stop_loss_price: invested * dec!(0.97),
            high_water: invested,
            trailing_activated: false,
            trailing_percent: 3.0,
            partial_exits_taken: 0,
            break_even_moved: false,
            overbought_exit_taken: false,
            score: 80.0,
            realized_pnl: Decimal::ZERO,
        }
    }

    #[test]
    fn admits_and_caps_available_capital() {
        let state = PortfolioState::new(t0(), 9);
        let adm = guard().admit(&state, &request("KRW-BTC", t0())).unwrap();
        assert_eq!(adm.available, dec!(300_000));
    }

    #[test]
    fn daily_loss_limit_denies_every_market() {
        let cfg = RiskConfig {
            daily_loss_limit: dec!(300_000),
            ..RiskConfig::default()
        };
        let guard = RiskGuard::new(cfg, 70.0);
        let mut state = PortfolioState::new(t0(), 9);
        state.record_realized(dec!(-300_000));
        for market in ["KRW-BTC", "KRW-ETH", "KRW-XRP"] {
            let denial = guard.admit(&state, &request(market, t0())).unwrap_err();
            assert_eq!(denial.reason(), "daily loss limit");
        }
    }

    #[test]
    fn checks_run_in_order() {
        let mut state = PortfolioState::new(t0(), 9);
        state.record_realized(dec!(-50_000));
        // score and loss limit both fail; the score check comes first
        let mut req = request("KRW-BTC", t0());
        req.score = 50.0;
        assert_eq!(
            guard().admit(&state, &req).unwrap_err().reason(),
            "score below minimum"
        );

        let disabled = RiskGuard::new(
            RiskConfig {
                trading_enabled: false,
                ..RiskConfig::default()
            },
            70.0,
        );
        assert_eq!(disabled.admit(&state, &req), Err(Denial::TradingDisabled));
    }

    #[test]
    fn open_market_and_position_count() {
        let mut state = PortfolioState::new(t0(), 9);
        state.record_entry(position("KRW-BTC", dec!(50_000), t0()));
        let denial = guard().admit(&state, &request("KRW-BTC", t0())).unwrap_err();
        assert_eq!(denial, Denial::AlreadyHolding);

        state.record_entry(position("KRW-ETH", dec!(50_000), t0()));
        state.record_entry(position("KRW-XRP", dec!(50_000), t0()));
        let denial = guard().admit(&state, &request("KRW-SOL", t0())).unwrap_err();
        assert_eq!(denial.reason(), "max positions");
    }

    #[test]
    fn capital_checks() {
        let state = PortfolioState::new(t0(), 9);
        let mut req = request("KRW-BTC", t0());
        req.available_capital = dec!(4_000);
        assert_eq!(
            guard().admit(&state, &req).unwrap_err().reason(),
            "insufficient capital"
        );

        let mut state = PortfolioState::new(t0(), 9);
        state.record_entry(position("KRW-ETH", dec!(250_000), t0()));
        let denial = guard().admit(&state, &request("KRW-BTC", t0())).unwrap_err();
        assert!(matches!(denial, Denial::CapitalCap { .. }));
    }

    #[test]
    fn cooldown_after_close_and_fast_reentry() {
        let g = guard();
        let mut state = PortfolioState::new(t0(), 9);
        let mut pos = position("KRW-BTC", dec!(50_000), t0());
        pos.realized_pnl = dec!(1_000);
        state.record_entry(pos);
        let closed_at = t0() + Duration::minutes(30);
        state.record_close("KRW-BTC", closed_at);

        let later = closed_at + Duration::minutes(20);
        let denial = g.admit(&state, &request("KRW-BTC", later)).unwrap_err();
        assert_eq!(denial, Denial::Cooldown { remaining_minutes: 40 });

        // profitable close plus a fresh spike shortens the window
        state.record_spike("KRW-BTC", later - Duration::minutes(2));
        assert!(g.admit(&state, &request("KRW-BTC", later)).is_ok());

        // a stale spike does not
        state.record_spike("KRW-BTC", later - Duration::minutes(10));
        assert!(g.admit(&state, &request("KRW-BTC", later)).is_err());
    }

    fn trade(market: &str, kind: TradeKind, pnl: Decimal, at: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            kind,
            market: market.into(),
            entry_price: dec!(50_000),
            exit_price: None,
            quantity: dec!(1),
            amount: dec!(50_000),
            pnl,
            pnl_percent: 0.0,
            reason: "test".into(),
            order_id: "o".into(),
            timestamp: at,
        }
    }

    #[test]
    fn ledger_rebuilds_cooldown_marks() {
        let g = guard();
        let ledger = vec![
            trade("KRW-BTC", TradeKind::Sell, dec!(-1_000), t0() + Duration::minutes(20)),
            trade("KRW-BTC", TradeKind::Buy, Decimal::ZERO, t0()),
            trade("KRW-BTC", TradeKind::PartialSell, dec!(3_000), t0() + Duration::minutes(10)),
            trade("KRW-ETH", TradeKind::Buy, Decimal::ZERO, t0()),
            trade("KRW-ETH", TradeKind::Sell, dec!(-500), t0() + Duration::minutes(20)),
        ];
        let mut state = PortfolioState::new(t0(), 9);
        state.restore_marks(&ledger);

        let now = t0() + Duration::minutes(50);
        assert_eq!(
            g.admit(&state, &request("KRW-BTC", now)),
            Err(Denial::Cooldown { remaining_minutes: 30 })
        );
        assert_eq!(
            state.last_exit("KRW-BTC"),
            Some(ExitMark {
                at: t0() + Duration::minutes(20),
                profitable: true,
            })
        );

        // the partial gain outweighs the final loss, so a spike opens the fast path
        state.record_spike("KRW-BTC", now - Duration::minutes(1));
        state.record_spike("KRW-ETH", now - Duration::minutes(1));
        assert!(g.admit(&state, &request("KRW-BTC", now)).is_ok());
        assert!(matches!(
            g.admit(&state, &request("KRW-ETH", now)),
            Err(Denial::Cooldown { .. })
        ));
    }

    #[test]
    fn identical_inputs_identical_decision() {
        let mut state = PortfolioState::new(t0(), 9);
        state.record_realized(dec!(-10_000));
        let req = request("KRW-ADA", t0());
        let g = guard();
        assert_eq!(g.admit(&state, &req), g.admit(&state, &req));
    }

    #[test]
    fn rollover_follows_local_midnight() {
        // 14:30 UTC is 23:30 in UTC+9
        let evening = Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap();
        let mut state = PortfolioState::new(evening, 9);
        state.record_realized(dec!(-20_000));
        assert!(!state.roll_day(evening + Duration::minutes(20)));
        assert_eq!(state.daily_pnl, dec!(-20_000));
        assert!(state.roll_day(evening + Duration::minutes(40)));
        assert_eq!(state.daily_pnl, Decimal::ZERO);
    }
}
