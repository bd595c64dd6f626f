//! Trend indicators: moving averages, MACD and ADX/DI.

/// Simple moving average of the trailing `period` values.
pub fn sma(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    let window = &data[data.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// EMA seeded with the SMA of the first `period` values, `k = 2 / (period + 1)`.
pub fn ema(data: &[f64], period: usize) -> Option<f64> {
    if period == 0 || data.len() < period {
        return None;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = data[..period].iter().sum::<f64>() / period as f64;
    Some(
        data[period..]
            .iter()
            .fold(seed, |ema, &value| value * k + ema * (1.0 - k)),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD with a signal line rebuilt from scratch on every call.
///
/// The MACD line is recomputed at every historical point `slow..len` from the
/// prefix of the window ending there, and the signal is the EMA of that
/// series. This keeps results identical for identical windows regardless of
/// what was evaluated before.
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<MacdReading> {
    if closes.len() < slow + signal {
        return None;
    }
    let line = ema(closes, fast)? - ema(closes, slow)?;

    let history: Vec<f64> = (slow..closes.len())
        .filter_map(|i| {
            let prefix = &closes[..=i];
            Some(ema(prefix, fast)? - ema(prefix, slow)?)
        })
        .collect();

    let signal_line = ema(&history, signal).unwrap_or(line * 0.9);
    Some(MacdReading {
        macd: line,
        signal: signal_line,
        histogram: line - signal_line,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdxReading {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

fn directional_movement(highs: &[f64], lows: &[f64], i: usize) -> (f64, f64) {
    let up_move = highs[i] - highs[i - 1];
    let down_move = lows[i - 1] - lows[i];
    let plus_dm = if up_move > down_move && up_move > 0.0 {
        up_move
    } else {
        0.0
    };
    let minus_dm = if down_move > up_move && down_move > 0.0 {
        down_move
    } else {
        0.0
    };
    (plus_dm, minus_dm)
}

/// ADX with Wilder smoothing.
///
/// Algorithm:
/// 1. Seed over bars `1..=period`: TR is averaged, +DM/-DM are kept as raw sums
/// 2. For every later bar: `x = (x * (period - 1) + current) / period`
/// 3. +DI/-DI = smoothed DM / smoothed TR * 100
/// 4. DX = |+DI - -DI| / (+DI + -DI) * 100 (bars with a zero DI sum are skipped)
/// 5. ADX = simple mean of the last `period` DX values
///
/// Needs at least `2 * period` bars and `period` DX values.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<AdxReading> {
    let len = closes.len();
    if period == 0 || len < period * 2 || highs.len() != len || lows.len() != len {
        return None;
    }

    let mut tr_sum = 0.0;
    let mut plus_dm_s = 0.0;
    let mut minus_dm_s = 0.0;
    for i in 1..=period {
        tr_sum += true_range(highs[i], lows[i], closes[i - 1]);
        let (p, m) = directional_movement(highs, lows, i);
        plus_dm_s += p;
        minus_dm_s += m;
    }

    let p = period as f64;
    let di = |dm: f64, atr: f64| if atr > 0.0 { dm / atr * 100.0 } else { 0.0 };

    let mut atr = tr_sum / p;
    let mut plus_di = di(plus_dm_s, atr);
    let mut minus_di = di(minus_dm_s, atr);
    let mut dx_values = Vec::with_capacity(len);

    for i in (period + 1)..len {
        let tr = true_range(highs[i], lows[i], closes[i - 1]);
        let (plus_dm, minus_dm) = directional_movement(highs, lows, i);

        atr = (atr * (p - 1.0) + tr) / p;
        plus_dm_s = (plus_dm_s * (p - 1.0) + plus_dm) / p;
        minus_dm_s = (minus_dm_s * (p - 1.0) + minus_dm) / p;

        plus_di = di(plus_dm_s, atr);
        minus_di = di(minus_dm_s, atr);

        let di_sum = plus_di + minus_di;
        if di_sum != 0.0 {
            dx_values.push((plus_di - minus_di).abs() / di_sum * 100.0);
        }
    }

    if dx_values.len() < period {
        return None;
    }
    let recent = &dx_values[dx_values.len() - period..];
    Some(AdxReading {
        adx: recent.iter().sum::<f64>() / p,
        plus_di,
        minus_di,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, start: f64, step: f64) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn sma_uses_trailing_window() {
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
        assert_eq!(sma(&[1.0], 2), None);
    }

    #[test]
    fn ema_of_constant_series_is_constant() {
        let data = vec![5.0; 30];
        let v = ema(&data, 10).unwrap();
        assert!((v - 5.0).abs() < 1e-12);
    }

    #[test]
    fn macd_needs_slow_plus_signal() {
        let closes = ramp(34, 100.0, 1.0);
        assert!(macd(&closes, 12, 26, 9).is_none());
        let closes = ramp(35, 100.0, 1.0);
        assert!(macd(&closes, 12, 26, 9).is_some());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes = ramp(80, 100.0, 1.0);
        let r = macd(&closes, 12, 26, 9).unwrap();
        assert!(r.macd > 0.0);
        assert!((r.histogram - (r.macd - r.signal)).abs() < 1e-12);
    }

    #[test]
    fn adx_needs_two_periods() {
        let closes = ramp(27, 100.0, 1.0);
        let highs: Vec<f64> = closes.iter().map(|c| c + 1.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        assert!(adx(&highs, &lows, &closes, 14).is_none());
    }

    #[test]
    fn adx_strong_in_steady_uptrend() {
        let closes = ramp(60, 100.0, 2.0);
        let highs: Vec<f64> = closes.iter().map(|c| c + 1.0).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 1.0).collect();
        let r = adx(&highs, &lows, &closes, 14).unwrap();
        assert!(r.plus_di > r.minus_di);
        assert!(r.adx > 25.0);
        assert!(r.adx <= 100.0);
    }

    #[test]
    fn adx_flat_market_has_no_dx() {
        let closes = vec![100.0; 40];
        let r = adx(&closes, &closes, &closes, 14);
        assert!(r.is_none());
    }
}
