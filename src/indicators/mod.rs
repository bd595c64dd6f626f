//! Pure indicator functions over oldest-first candle windows.
//!
//! Every indicator returns `None` when its own lookback is not met. Only
//! [`compute_snapshot`] treats a short window as an error, and only below the
//! configured evaluation minimum.

pub mod momentum;
pub mod trend;
pub mod volatility;
pub mod volume;

use crate::config::IndicatorParams;
use crate::error::EngineError;
use crate::types::Candle;

pub use momentum::{fast_rsi, StochasticReading};
pub use trend::{AdxReading, MacdReading};
pub use volatility::{AtrReading, BollingerReading, VolatilityTier};
pub use volume::{Divergence, ObvReading, ObvTrend};

/// Column view of a candle window.
#[derive(Debug, Default, Clone)]
pub struct Series {
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl Series {
    pub fn from_candles(candles: &[Candle]) -> Self {
        let mut s = Series {
            highs: Vec::with_capacity(candles.len()),
            lows: Vec::with_capacity(candles.len()),
            closes: Vec::with_capacity(candles.len()),
            volumes: Vec::with_capacity(candles.len()),
        };
        for c in candles {
            s.highs.push(c.high);
            s.lows.push(c.low);
            s.closes.push(c.close);
            s.volumes.push(c.volume);
        }
        s
    }
}

/// All indicator outputs for one market and one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSnapshot {
    pub market: String,
    pub close: f64,
    pub rsi: Option<f64>,
    pub mfi: Option<f64>,
    pub adx: Option<AdxReading>,
    pub macd: Option<MacdReading>,
    pub bollinger: Option<BollingerReading>,
    pub stochastic: Option<StochasticReading>,
    pub atr: Option<AtrReading>,
    pub obv: Option<ObvReading>,
    pub volume_ratio: Option<f64>,
    pub ma_short: Option<f64>,
    pub ma_long: Option<f64>,
    pub ma_trend: Option<f64>,
}

impl IndicatorSnapshot {
    /// Close above the short MA, short MA above the long MA.
    pub fn is_up_trend(&self) -> bool {
        match (self.ma_short, self.ma_long) {
            (Some(short), Some(long)) => self.close > short && short > long,
            _ => false,
        }
    }

    /// Position of the close inside the bands, in percent (%B).
    pub fn percent_b(&self) -> Option<f64> {
        let bb = self.bollinger?;
        let width = bb.upper - bb.lower;
        if width <= 0.0 {
            return None;
        }
        Some((self.close - bb.lower) / width * 100.0)
    }
}

pub fn compute_snapshot(
    market: &str,
    candles: &[Candle],
    params: &IndicatorParams,
) -> Result<IndicatorSnapshot, EngineError> {
    if candles.len() < params.min_candles.max(1) {
        return Err(EngineError::DataInsufficient {
            market: market.to_string(),
            have: candles.len(),
            need: params.min_candles.max(1),
        });
    }
    let s = Series::from_candles(candles);
    let close = s.closes[s.closes.len() - 1];

    Ok(IndicatorSnapshot {
        market: market.to_string(),
        close,
        rsi: momentum::rsi(&s.closes, params.rsi_period),
        mfi: momentum::mfi(&s.highs, &s.lows, &s.closes, &s.volumes, params.mfi_period),
        adx: trend::adx(&s.highs, &s.lows, &s.closes, params.adx_period),
        macd: trend::macd(&s.closes, params.macd_fast, params.macd_slow, params.macd_signal),
        bollinger: volatility::bollinger(&s.closes, params.bb_period, params.bb_std_dev),
        stochastic: momentum::stochastic(&s.highs, &s.lows, &s.closes, params.stoch_period),
        atr: volatility::atr(&s.highs, &s.lows, &s.closes, params.atr_period),
        obv: volume::obv(&s.closes, &s.volumes),
        volume_ratio: volume::volume_ratio(&s.volumes, params.volume_avg_period),
        ma_short: trend::sma(&s.closes, params.ma_short),
        ma_long: trend::sma(&s.closes, params.ma_long),
        ma_trend: trend::sma(&s.closes, params.ma_trend),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtfTrend {
    Bullish,
    Bearish,
}

impl HtfTrend {
    pub fn is_bullish(self) -> bool {
        self == HtfTrend::Bullish
    }
}

/// Daily-chart filter: bullish when the last daily close sits above its
/// `period` SMA. Missing or short daily data counts as bullish.
pub fn higher_timeframe_trend(daily_closes: &[f64], period: usize) -> HtfTrend {
    match (daily_closes.last(), trend::sma(daily_closes, period)) {
        (Some(&last), Some(ma)) if last <= ma => HtfTrend::Bearish,
        _ => HtfTrend::Bullish,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    pub(crate) fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: t0 + Duration::hours(i as i64),
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 1_000.0 + (i % 7) as f64 * 100.0,
            })
            .collect()
    }

    #[test]
    fn short_window_is_data_insufficient() {
        let candles = candles_from_closes(&[100.0; 49]);
        let err = compute_snapshot("KRW-BTC", &candles, &IndicatorParams::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::DataInsufficient { have: 49, need: 50, .. }
        ));
    }

    #[test]
    fn long_lookbacks_absent_on_minimum_window() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let snap = compute_snapshot("KRW-ETH", &candles_from_closes(&closes), &IndicatorParams::default())
            .unwrap();
        assert!(snap.rsi.is_some());
        assert!(snap.macd.is_some());
        assert!(snap.ma_long.is_some());
        // 100-bar trend MA cannot exist on 60 candles
        assert!(snap.ma_trend.is_none());
        assert!(snap.is_up_trend());
    }

    #[test]
    fn htf_trend_defaults_to_bullish() {
        assert_eq!(higher_timeframe_trend(&[], 20), HtfTrend::Bullish);
        assert_eq!(higher_timeframe_trend(&[1.0; 5], 20), HtfTrend::Bullish);

        let falling: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        assert_eq!(higher_timeframe_trend(&falling, 20), HtfTrend::Bearish);
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert!(higher_timeframe_trend(&rising, 20).is_bullish());
    }

    proptest! {
        #[test]
        fn snapshot_readings_in_valid_ranges(
            closes in prop::collection::vec(10.0f64..10_000.0, 50..120)
        ) {
            let snap = compute_snapshot("KRW-XRP", &candles_from_closes(&closes), &IndicatorParams::default())
                .unwrap();
            for v in [snap.rsi, snap.mfi, snap.stochastic.map(|s| s.k)].into_iter().flatten() {
                prop_assert!((0.0..=100.0).contains(&v));
            }
            if let Some(adx) = snap.adx {
                prop_assert!(adx.adx >= 0.0);
                prop_assert!(adx.plus_di >= 0.0 && adx.minus_di >= 0.0);
            }
            if let Some(atr) = snap.atr {
                prop_assert!(atr.atr >= 0.0);
            }
        }
    }
}
