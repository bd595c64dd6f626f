//! Volatility: ATR with a coarse tier, Bollinger Bands with squeeze detection.

use super::trend::sma;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTier {
    Low,
    Normal,
    High,
    VeryHigh,
}

impl VolatilityTier {
    fn from_atr_percent(pct: f64) -> Self {
        if pct > 5.0 {
            VolatilityTier::VeryHigh
        } else if pct > 3.0 {
            VolatilityTier::High
        } else if pct < 1.0 {
            VolatilityTier::Low
        } else {
            VolatilityTier::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtrReading {
    pub atr: f64,
    /// ATR relative to the last close, in percent.
    pub atr_percent: f64,
    pub volatility: VolatilityTier,
}

/// Simple average of the trailing `period` true ranges.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<AtrReading> {
    let len = closes.len();
    if period == 0 || len < period + 1 || highs.len() != len || lows.len() != len {
        return None;
    }
    let sum: f64 = (len - period..len)
        .map(|i| {
            (highs[i] - lows[i])
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs())
        })
        .sum();
    let atr = sum / period as f64;

    let last = closes[len - 1];
    let atr_percent = if last > 0.0 { atr / last * 100.0 } else { 0.0 };
    Some(AtrReading {
        atr,
        atr_percent,
        volatility: VolatilityTier::from_atr_percent(atr_percent),
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerReading {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper - lower) / middle * 100
    pub bandwidth: f64,
    pub squeeze: bool,
    pub squeeze_release: bool,
}

fn bands(window: &[f64], k: f64) -> Option<(f64, f64, f64, f64)> {
    let period = window.len();
    let middle = sma(window, period)?;
    let variance = window.iter().map(|c| (c - middle).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    let upper = middle + std * k;
    let lower = middle - std * k;
    let bandwidth = if middle != 0.0 {
        (upper - lower) / middle * 100.0
    } else {
        0.0
    };
    Some((upper, middle, lower, bandwidth))
}

/// Bollinger Bands on the population standard deviation.
///
/// With at least `2 * period` closes the bandwidth is recomputed for every
/// window ending at `period..=len` and the last 20 of those form the baseline:
/// - squeeze: current bandwidth < 0.5 x baseline average
/// - squeeze release: previous bandwidth < 0.6 x average and the current one
///   expanded by more than 1.2 x over it
pub fn bollinger(closes: &[f64], period: usize, std_dev: f64) -> Option<BollingerReading> {
    let len = closes.len();
    if period == 0 || len < period {
        return None;
    }
    let (upper, middle, lower, bandwidth) = bands(&closes[len - period..], std_dev)?;

    let mut squeeze = false;
    let mut squeeze_release = false;
    if len >= period * 2 {
        let history: Vec<f64> = (period..=len)
            .filter_map(|end| bands(&closes[end - period..end], std_dev).map(|b| b.3))
            .collect();
        let recent = &history[history.len().saturating_sub(20)..];
        let avg = recent.iter().sum::<f64>() / recent.len() as f64;

        squeeze = bandwidth < avg * 0.5;
        let prev = if history.len() >= 2 {
            history[history.len() - 2]
        } else {
            bandwidth
        };
        squeeze_release = prev < avg * 0.6 && bandwidth > prev * 1.2;
    }

    Some(BollingerReading {
        upper,
        middle,
        lower,
        bandwidth,
        squeeze,
        squeeze_release,
    })
}
