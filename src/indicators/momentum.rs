//! Oscillators: RSI, MFI, Stochastic, and the smoothed RSI used on open positions.

use ta::indicators::RelativeStrengthIndex;
use ta::Next;

/// RSI over the trailing `period` deltas (plain averages, no smoothing across
/// the whole series). A window with no losses reads 100.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }
    let (mut gains, mut losses) = (0.0, 0.0);
    for i in closes.len() - period..closes.len() {
        let diff = closes[i] - closes[i - 1];
        if diff > 0.0 {
            gains += diff;
        } else {
            losses -= diff;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

fn typical_price(highs: &[f64], lows: &[f64], closes: &[f64], i: usize) -> f64 {
    (highs[i] + lows[i] + closes[i]) / 3.0
}

/// Money Flow Index. Flow is assigned by comparing consecutive typical prices;
/// unchanged typical prices count toward neither side.
pub fn mfi(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    volumes: &[f64],
    period: usize,
) -> Option<f64> {
    let len = closes.len();
    if period == 0 || len < period + 1 {
        return None;
    }
    if highs.len() != len || lows.len() != len || volumes.len() != len {
        return None;
    }

    let (mut positive, mut negative) = (0.0, 0.0);
    for i in len - period..len {
        let tp = typical_price(highs, lows, closes, i);
        let prev_tp = typical_price(highs, lows, closes, i - 1);
        let flow = tp * volumes[i];
        if tp > prev_tp {
            positive += flow;
        } else if tp < prev_tp {
            negative += flow;
        }
    }

    if negative == 0.0 {
        return Some(100.0);
    }
    Some(100.0 - 100.0 / (1.0 + positive / negative))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticReading {
    pub k: f64,
    /// Same as `k` in the real-time path.
    pub d: f64,
}

/// Stochastic %K over the trailing window. A range-less window reads 50.
pub fn stochastic(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    period: usize,
) -> Option<StochasticReading> {
    let len = closes.len();
    if period == 0 || len < period || highs.len() < period || lows.len() < period {
        return None;
    }
    let highest = highs[highs.len() - period..]
        .iter()
        .copied()
        .fold(f64::MIN, f64::max);
    let lowest = lows[lows.len() - period..]
        .iter()
        .copied()
        .fold(f64::MAX, f64::min);

    if highest == lowest {
        return Some(StochasticReading { k: 50.0, d: 50.0 });
    }
    let k = ((closes[len - 1] - lowest) / (highest - lowest) * 100.0).clamp(0.0, 100.0);
    Some(StochasticReading { k, d: k })
}

/// Exponentially smoothed RSI from the `ta` crate. Used as the fast
/// overbought gauge on open positions, not for entry scoring.
pub fn fast_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let mut indicator = RelativeStrengthIndex::new(period).ok()?;
    closes.iter().map(|&c| indicator.next(c)).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), Some(100.0));
    }

    #[test]
    fn rsi_balanced_moves_is_50() {
        let closes: Vec<f64> = (0..15)
            .map(|i| if i % 2 == 0 { 100.0 } else { 101.0 })
            .collect();
        let v = rsi(&closes, 14).unwrap();
        assert!((v - 50.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_short_window_is_absent() {
        assert_eq!(rsi(&[1.0; 14], 14), None);
    }

    #[test]
    fn mfi_without_outflow_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let vols = vec![10.0; 20];
        assert_eq!(mfi(&closes, &closes, &closes, &vols, 14), Some(100.0));
    }

    #[test]
    fn stochastic_flat_range_reads_50() {
        let flat = vec![10.0; 14];
        let r = stochastic(&flat, &flat, &flat, 14).unwrap();
        assert_eq!(r.k, 50.0);
        assert_eq!(r.d, r.k);
    }

    #[test]
    fn stochastic_close_at_high_reads_100() {
        let highs: Vec<f64> = (0..14).map(|i| 10.0 + i as f64).collect();
        let lows: Vec<f64> = highs.iter().map(|h| h - 2.0).collect();
        let closes = highs.clone();
        let r = stochastic(&highs, &lows, &closes, 14).unwrap();
        assert_eq!(r.k, 100.0);
    }

    #[test]
    fn fast_rsi_high_after_rally() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 2.0).collect();
        assert!(fast_rsi(&closes, 14).unwrap() > 80.0);
    }

    fn bars() -> impl Strategy<Value = Vec<(f64, f64, f64, f64)>> {
        prop::collection::vec(
            (1.0f64..1000.0, 0.0f64..50.0, 0.0f64..1.0, 0.0f64..1e6),
            16..80,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .map(|(base, spread, pos, vol)| {
                    let low = base;
                    let high = base + spread;
                    let close = low + (high - low) * pos;
                    (high, low, close, vol)
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn oscillators_stay_in_range(window in bars()) {
            let highs: Vec<f64> = window.iter().map(|b| b.0).collect();
            let lows: Vec<f64> = window.iter().map(|b| b.1).collect();
            let closes: Vec<f64> = window.iter().map(|b| b.2).collect();
            let vols: Vec<f64> = window.iter().map(|b| b.3).collect();

            let r = rsi(&closes, 14).unwrap();
            prop_assert!((0.0..=100.0).contains(&r));
            let m = mfi(&highs, &lows, &closes, &vols, 14).unwrap();
            prop_assert!((0.0..=100.0).contains(&m));
            let s = stochastic(&highs, &lows, &closes, 14).unwrap();
            prop_assert!((0.0..=100.0).contains(&s.k));
        }
    }
}
