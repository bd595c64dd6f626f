//! Volume-based readings: On-Balance Volume and the volume ratio.

use super::trend::sma;
use serde::Serialize;

/// Bars compared when looking for price/OBV divergence.
const DIVERGENCE_WINDOW: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObvTrend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// Price falling while OBV rises (accumulation).
    Bullish,
    /// Price rising while OBV falls (distribution).
    Bearish,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObvReading {
    pub obv: f64,
    pub trend: ObvTrend,
    pub divergence: Divergence,
}

pub fn obv(closes: &[f64], volumes: &[f64]) -> Option<ObvReading> {
    let len = closes.len();
    if len < DIVERGENCE_WINDOW || volumes.len() != len {
        return None;
    }

    let mut running = 0.0;
    let mut history = Vec::with_capacity(len);
    history.push(0.0);
    for i in 1..len {
        if closes[i] > closes[i - 1] {
            running += volumes[i];
        } else if closes[i] < closes[i - 1] {
            running -= volumes[i];
        }
        history.push(running);
    }

    let obv_delta = history[len - 1] - history[len - DIVERGENCE_WINDOW];
    let price_delta = closes[len - 1] - closes[len - DIVERGENCE_WINDOW];

    let trend = if obv_delta > 0.0 {
        ObvTrend::Up
    } else if obv_delta < 0.0 {
        ObvTrend::Down
    } else {
        ObvTrend::Flat
    };
    let divergence = match (obv_delta > 0.0, obv_delta < 0.0) {
        (true, _) if price_delta < 0.0 => Divergence::Bullish,
        (_, true) if price_delta > 0.0 => Divergence::Bearish,
        _ => Divergence::None,
    };

    Some(ObvReading {
        obv: running,
        trend,
        divergence,
    })
}

/// Last bar's volume over the average of the trailing `period` bars.
/// Absent when the average is zero.
pub fn volume_ratio(volumes: &[f64], period: usize) -> Option<f64> {
    let avg = sma(volumes, period)?;
    let last = *volumes.last()?;
    if avg <= 0.0 {
        return None;
    }
    Some(last / avg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obv_accumulates_signed_volume() {
        let closes = [10.0, 11.0, 10.5, 10.5, 12.0, 12.5, 12.0, 13.0, 13.5, 14.0];
        let vols = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let r = obv(&closes, &vols).unwrap();
        // +2 -3 +5 +6 -7 +8 +9 +10
        assert_eq!(r.obv, 30.0);
        assert_eq!(r.trend, ObvTrend::Up);
        assert_eq!(r.divergence, Divergence::None);
    }

    #[test]
    fn bullish_divergence_on_falling_price_rising_obv() {
        // small down-closes on thin volume, up-closes on heavy volume
        let closes = [20.0, 19.0, 19.5, 18.0, 18.4, 17.0, 17.3, 16.0, 16.2, 15.0];
        let vols = [1.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0];
        let r = obv(&closes, &vols).unwrap();
        assert_eq!(r.divergence, Divergence::Bullish);
    }

    #[test]
    fn bearish_divergence_on_rising_price_falling_obv() {
        let closes = [10.0, 11.0, 10.8, 12.0, 11.8, 13.0, 12.8, 14.0, 13.8, 15.0];
        let vols = [1.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0, 9.0, 1.0];
        let r = obv(&closes, &vols).unwrap();
        assert_eq!(r.divergence, Divergence::Bearish);
    }

    #[test]
    fn obv_needs_divergence_window() {
        assert!(obv(&[1.0; 9], &[1.0; 9]).is_none());
    }

    #[test]
    fn volume_ratio_against_average() {
        let mut vols = vec![100.0; 19];
        vols.push(300.0);
        let r = volume_ratio(&vols, 20).unwrap();
        assert!((r - 300.0 / 110.0).abs() < 1e-12);
        assert!(volume_ratio(&[0.0; 20], 20).is_none());
    }
}
