// src/storage/stats.rs
use crate::risk::guard::trading_day_of;
use crate::types::{TradeKind, TradeRecord};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Today,
    Week,
    Month,
    All,
}

impl StatsPeriod {
    /// Lower bound of the period. `Today` starts at local midnight.
    pub fn since(self, now: DateTime<Utc>, utc_offset_hours: i32) -> Option<DateTime<Utc>> {
        match self {
            StatsPeriod::Today => {
                let tz = FixedOffset::east_opt(utc_offset_hours * 3600)?;
                let midnight = trading_day_of(now, utc_offset_hours).and_hms_opt(0, 0, 0)?;
                tz.from_local_datetime(&midnight)
                    .single()
                    .map(|t| t.with_timezone(&Utc))
            }
            StatsPeriod::Week => Some(now - Duration::days(7)),
            StatsPeriod::Month => Some(now - Duration::days(30)),
            StatsPeriod::All => None,
        }
    }
}

/// Summary of closed trades (full and partial sells).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradeStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub avg_pnl_percent: f64,
    pub best_pnl_percent: f64,
    pub worst_pnl_percent: f64,
}

impl TradeStats {
    pub fn from_records(records: &[TradeRecord], since: Option<DateTime<Utc>>) -> Self {
        let sells: Vec<&TradeRecord> = records
            .iter()
            .filter(|r| matches!(r.kind, TradeKind::Sell | TradeKind::PartialSell))
            .filter(|r| since.map_or(true, |s| r.timestamp >= s))
            .collect();
        if sells.is_empty() {
            return Self::default();
        }

        let n = sells.len();
        let wins = sells.iter().filter(|r| r.pnl > Decimal::ZERO).count();
        let pcts = sells.iter().map(|r| r.pnl_percent);
        Self {
            trades: n,
            wins,
            losses: n - wins,
            win_rate: wins as f64 / n as f64 * 100.0,
            total_pnl: sells.iter().map(|r| r.pnl).sum(),
            avg_pnl_percent: pcts.clone().sum::<f64>() / n as f64,
            best_pnl_percent: pcts.clone().fold(f64::MIN, f64::max),
            worst_pnl_percent: pcts.fold(f64::MAX, f64::min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record(kind: TradeKind, pnl: Decimal, pct: f64, at: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            kind,
            market: "KRW-ADA".into(),
            entry_price: dec!(600),
            exit_price: Some(dec!(600)),
            quantity: dec!(100),
            amount: dec!(60_000),
            pnl,
            pnl_percent: pct,
            reason: "test".into(),
            order_id: "x".into(),
            timestamp: at,
        }
    }

    #[test]
    fn buys_are_ignored_and_breakeven_is_a_loss() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        let records = vec![
            record(TradeKind::Buy, Decimal::ZERO, 0.0, at),
            record(TradeKind::Sell, dec!(3_000), 5.0, at),
            record(TradeKind::PartialSell, dec!(1_000), 2.0, at),
            record(TradeKind::Sell, Decimal::ZERO, 0.0, at),
            record(TradeKind::Sell, dec!(-2_000), -3.0, at),
        ];
        let stats = TradeStats::from_records(&records, None);
        assert_eq!(stats.trades, 4);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 2);
        assert_eq!(stats.win_rate, 50.0);
        assert_eq!(stats.total_pnl, dec!(2_000));
        assert_eq!(stats.avg_pnl_percent, 1.0);
        assert_eq!(stats.best_pnl_percent, 5.0);
        assert_eq!(stats.worst_pnl_percent, -3.0);
    }

    #[test]
    fn period_filter() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 3, 0, 0).unwrap();
        let records = vec![
            record(TradeKind::Sell, dec!(100), 1.0, now - Duration::days(20)),
            record(TradeKind::Sell, dec!(200), 2.0, now - Duration::days(3)),
            record(TradeKind::Sell, dec!(300), 3.0, now - Duration::hours(1)),
        ];
        let count = |p: StatsPeriod| TradeStats::from_records(&records, p.since(now, 9)).trades;
        assert_eq!(count(StatsPeriod::All), 3);
        assert_eq!(count(StatsPeriod::Month), 3);
        assert_eq!(count(StatsPeriod::Week), 2);
        assert_eq!(count(StatsPeriod::Today), 1);
    }

    #[test]
    fn today_starts_at_local_midnight() {
        // 2024-05-10 03:00 UTC is 12:00 KST; local midnight is 2024-05-09 15:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 3, 0, 0).unwrap();
        assert_eq!(
            StatsPeriod::Today.since(now, 9),
            Some(Utc.with_ymd_and_hms(2024, 5, 9, 15, 0, 0).unwrap())
        );
    }

    #[test]
    fn empty_is_zeroed() {
        assert_eq!(TradeStats::from_records(&[], None), TradeStats::default());
    }
}
