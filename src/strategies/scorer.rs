//! Weighted multi-indicator buy-confidence score.

use super::regime::working_weights;
use super::traits::Strategy;
use crate::config::{EffectiveConfig, IndicatorParams, ScoringConfig, WeightTable};
use crate::indicators::{Divergence, HtfTrend, IndicatorSnapshot, ObvTrend};
use crate::types::{Bias, Factor, Signal, Tier};

/// Lowest attainable total as a fraction of the highest one. Sell pressure is
/// capped lower than buy pressure.
const MIN_POSSIBLE_RATIO: f64 = -0.5;

pub struct SignalScorer {
    name: String,
    params: IndicatorParams,
    scoring: ScoringConfig,
    weights: WeightTable,
}

impl SignalScorer {
    pub fn new(
        name: impl Into<String>,
        params: IndicatorParams,
        scoring: ScoringConfig,
        weights: WeightTable,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            scoring,
            weights,
        }
    }

    pub fn from_config(cfg: &EffectiveConfig) -> Self {
        Self::new(
            cfg.style.clone(),
            cfg.indicators.clone(),
            cfg.scoring.clone(),
            cfg.weights,
        )
    }

    fn factors(&self, snap: &IndicatorSnapshot, htf: HtfTrend, w: &WeightTable) -> Vec<Factor> {
        let p = &self.params;
        let mut out = Vec::with_capacity(10);
        let mut push = |indicator: &'static str, note: &'static str, weight: f64, mult: f64, bias: Bias| {
            // each sub-score stays within [-weight, +weight]
            let score = (weight * mult).clamp(-weight.abs(), weight.abs());
            out.push(Factor {
                indicator,
                note,
                score,
                bias,
            });
        };

        let bonus = self.scoring.htf_trend_bonus;
        match htf {
            HtfTrend::Bullish => push("htf", "daily close above MA", bonus, 1.0, Bias::Buy),
            HtfTrend::Bearish => push("htf", "daily close below MA", bonus, -1.0, Bias::Sell),
        }

        let adx = snap.adx.map(|a| a.adx);
        let strong_up = adx.map_or(false, |v| v > p.adx_strong_trend) && snap.is_up_trend();

        if let Some(obv) = snap.obv.filter(|_| w.obv > 0.0) {
            match (obv.divergence, obv.trend) {
                (Divergence::Bullish, _) => push("obv", "bullish divergence", w.obv, 1.0, Bias::Buy),
                (Divergence::Bearish, _) => push("obv", "bearish divergence", w.obv, -0.5, Bias::Sell),
                (_, ObvTrend::Up) => push("obv", "volume flowing in", w.obv, 0.5, Bias::Neutral),
                _ => push("obv", "flat", w.obv, 0.0, Bias::Neutral),
            }
        }

        if let Some(v) = adx.filter(|_| w.adx > 0.0) {
            if v > 40.0 {
                push("adx", "very strong trend", w.adx, 1.0, Bias::Buy);
            } else if v > 25.0 {
                push("adx", "strong trend", w.adx, 0.7, Bias::Buy);
            } else if v > 20.0 {
                push("adx", "weak trend", w.adx, 0.3, Bias::Neutral);
            } else {
                push("adx", "ranging", w.adx, 0.0, Bias::Neutral);
            }
        }

        if let Some(rsi) = snap.rsi {
            if rsi < p.rsi_oversold {
                let mult = if htf.is_bullish() { 1.0 } else { 0.5 };
                push("rsi", "oversold", w.rsi, mult, Bias::Buy);
            } else if rsi < 40.0 {
                push("rsi", "approaching oversold", w.rsi, 0.5, Bias::Neutral);
            } else if rsi > p.rsi_overbought {
                if strong_up {
                    push("rsi", "overbought in strong uptrend", w.rsi, 0.3, Bias::Neutral);
                } else {
                    push("rsi", "overbought", w.rsi, -0.5, Bias::Sell);
                }
            } else {
                push("rsi", "neutral", w.rsi, 0.25, Bias::Neutral);
            }
        }

        if let Some(mfi) = snap.mfi.filter(|_| w.mfi > 0.0) {
            if mfi < p.mfi_oversold {
                push("mfi", "money flow oversold", w.mfi, 1.0, Bias::Buy);
            } else if mfi < 30.0 {
                push("mfi", "money flowing in", w.mfi, 0.6, Bias::Neutral);
            } else if mfi > p.mfi_overbought {
                if strong_up {
                    push("mfi", "strong inflow in uptrend", w.mfi, 0.4, Bias::Neutral);
                } else {
                    push("mfi", "money flowing out", w.mfi, -0.5, Bias::Sell);
                }
            } else {
                push("mfi", "neutral", w.mfi, 0.3, Bias::Neutral);
            }
        }

        if let Some(m) = snap.macd {
            if m.histogram > 0.0 && m.macd > m.signal {
                push("macd", "bullish cross", w.macd, 1.0, Bias::Buy);
            } else if m.histogram > 0.0 {
                push("macd", "turning up", w.macd, 0.6, Bias::Neutral);
            } else if m.histogram < 0.0 && m.macd < m.signal {
                push("macd", "bearish cross", w.macd, -0.3, Bias::Sell);
            } else {
                push("macd", "turning down", w.macd, 0.2, Bias::Neutral);
            }
        }

        if let Some(bb) = snap.bollinger {
            let close = snap.close;
            let pct_b = snap.percent_b();
            if bb.squeeze_release && close > bb.middle {
                push("bollinger", "squeeze release", w.bollinger, 1.5, Bias::Buy);
            } else if bb.squeeze {
                push("bollinger", "squeeze", w.bollinger, 0.8, Bias::Neutral);
            } else if close <= bb.lower {
                push("bollinger", "below lower band", w.bollinger, 1.0, Bias::Buy);
            } else if pct_b.map_or(false, |b| b < 30.0) {
                push("bollinger", "near lower band", w.bollinger, 0.7, Bias::Neutral);
            } else if close >= bb.upper {
                if strong_up {
                    push("bollinger", "upper band breakout", w.bollinger, 0.5, Bias::Buy);
                } else {
                    push("bollinger", "above upper band", w.bollinger, -0.3, Bias::Sell);
                }
            } else {
                push("bollinger", "neutral", w.bollinger, 0.3, Bias::Neutral);
            }
        }

        if let (Some(short), Some(long)) = (snap.ma_short, snap.ma_long) {
            let close = snap.close;
            if close > short && short > long {
                let mult = if snap.ma_trend.map_or(false, |t| close > t) { 1.2 } else { 1.0 };
                push("ma", "aligned bullish", w.ma, mult, Bias::Buy);
            } else if close > short {
                push("ma", "short-term up", w.ma, 0.5, Bias::Neutral);
            } else if close < short && short < long {
                push("ma", "aligned bearish", w.ma, -0.3, Bias::Sell);
            } else {
                push("ma", "mixed", w.ma, 0.2, Bias::Neutral);
            }
        }

        if let Some(k) = snap.stochastic.map(|s| s.k) {
            if k < p.stoch_oversold {
                push("stochastic", "oversold", w.stochastic, 1.0, Bias::Buy);
            } else if k < 30.0 {
                push("stochastic", "approaching oversold", w.stochastic, 0.6, Bias::Neutral);
            } else if k > p.stoch_overbought {
                if strong_up {
                    push("stochastic", "overbought in trend", w.stochastic, 0.3, Bias::Neutral);
                } else {
                    push("stochastic", "overbought", w.stochastic, -0.3, Bias::Sell);
                }
            } else {
                push("stochastic", "neutral", w.stochastic, 0.3, Bias::Neutral);
            }
        }

        if let Some(ratio) = snap.volume_ratio {
            if ratio > p.volume_surge_ratio {
                push("volume", "surge", w.volume, 1.0, Bias::Buy);
            } else if ratio > 1.5 {
                push("volume", "rising", w.volume, 0.6, Bias::Neutral);
            } else {
                push("volume", "normal", w.volume, 0.3, Bias::Neutral);
            }
        }

        out
    }
}

/// `clamp01((total - min) / (max - min)) * 100`, rounded, with
/// `min = -0.5 * max`. A table with no positive weight scores 0.
pub fn normalize(total: f64, max_possible: f64) -> f64 {
    if max_possible <= 0.0 {
        return 0.0;
    }
    let min_possible = MIN_POSSIBLE_RATIO * max_possible;
    let ratio = (total - min_possible) / (max_possible - min_possible);
    if ratio.is_nan() {
        return 0.0;
    }
    (ratio.clamp(0.0, 1.0) * 100.0).round()
}

impl Strategy for SignalScorer {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, snapshot: &IndicatorSnapshot, htf: HtfTrend) -> Signal {
        let weights = working_weights(&self.weights, snapshot.adx.map(|a| a.adx), &self.scoring);
        let factors = self.factors(snapshot, htf, &weights);
        let total_score: f64 = factors.iter().map(|f| f.score).sum();
        let score = normalize(total_score, weights.total());

        Signal {
            market: snapshot.market.clone(),
            score,
            total_score,
            tier: Tier::from_score(score),
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{AdxReading, BollingerReading, MacdReading, StochasticReading};
    use crate::strategies::traits::Strategy;
    use proptest::prelude::*;

    fn empty_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            market: "KRW-BTC".into(),
            close: 100.0,
            rsi: None,
            mfi: None,
            adx: None,
            macd: None,
            bollinger: None,
            stochastic: None,
            atr: None,
            obv: None,
            volume_ratio: None,
            ma_short: None,
            ma_long: None,
            ma_trend: None,
        }
    }

    fn scorer(weights: WeightTable) -> SignalScorer {
        SignalScorer::new(
            "base",
            IndicatorParams::default(),
            ScoringConfig::default(),
            weights,
        )
    }

    #[test]
    fn oversold_rsi_contributes_full_weight_in_bullish_trend() {
        let weights = WeightTable {
            rsi: 15.0,
            ..WeightTable::default()
        };
        let snap = IndicatorSnapshot {
            rsi: Some(25.0),
            ..empty_snapshot()
        };
        let signal = scorer(weights).evaluate(&snap, HtfTrend::Bullish);
        let rsi = signal.factors.iter().find(|f| f.indicator == "rsi").unwrap();
        assert_eq!(rsi.score, 15.0);
        assert_eq!(rsi.bias, Bias::Buy);
        // only the trend bonus and RSI are present
        assert_eq!(signal.total_score, 20.0);
    }

    #[test]
    fn oversold_rsi_halved_in_bearish_trend() {
        let snap = IndicatorSnapshot {
            rsi: Some(25.0),
            ..empty_snapshot()
        };
        let signal = scorer(WeightTable::default()).evaluate(&snap, HtfTrend::Bearish);
        let rsi = signal.factors.iter().find(|f| f.indicator == "rsi").unwrap();
        assert_eq!(rsi.score, 6.0);
    }

    #[test]
    fn absent_indicators_add_no_factor() {
        let signal = scorer(WeightTable::default()).evaluate(&empty_snapshot(), HtfTrend::Bullish);
        assert_eq!(signal.factors.len(), 1);
        // (5 + 50) / 150 * 100
        assert_eq!(signal.score, 37.0);
        assert_eq!(signal.tier, Tier::Avoid);
    }

    #[test]
    fn squeeze_release_is_capped_at_weight() {
        let snap = IndicatorSnapshot {
            close: 105.0,
            bollinger: Some(BollingerReading {
                upper: 110.0,
                middle: 100.0,
                lower: 90.0,
                bandwidth: 20.0,
                squeeze: false,
                squeeze_release: true,
            }),
            ..empty_snapshot()
        };
        let signal = scorer(WeightTable::default()).evaluate(&snap, HtfTrend::Bullish);
        let bb = signal.factors.iter().find(|f| f.indicator == "bollinger").unwrap();
        assert_eq!(bb.score, 17.0);
    }

    #[test]
    fn overbought_penalty_softened_in_strong_uptrend() {
        let base = IndicatorSnapshot {
            rsi: Some(78.0),
            close: 120.0,
            ma_short: Some(110.0),
            ma_long: Some(100.0),
            ..empty_snapshot()
        };
        let weights = WeightTable::default();

        let weak = scorer(weights).evaluate(&base, HtfTrend::Bullish);
        let rsi = weak.factors.iter().find(|f| f.indicator == "rsi").unwrap();
        assert_eq!(rsi.score, -6.0);

        let strong = IndicatorSnapshot {
            adx: Some(AdxReading {
                adx: 30.0,
                plus_di: 30.0,
                minus_di: 10.0,
            }),
            ..base
        };
        let signal = scorer(weights).evaluate(&strong, HtfTrend::Bullish);
        let rsi = signal.factors.iter().find(|f| f.indicator == "rsi").unwrap();
        // trending regime scales RSI by 0.7 before the 0.3 multiplier
        assert!((rsi.score - 12.0 * 0.7 * 0.3).abs() < 1e-9);
    }

    #[test]
    fn identical_inputs_score_identically() {
        let snap = IndicatorSnapshot {
            rsi: Some(35.0),
            macd: Some(MacdReading {
                macd: 1.0,
                signal: 0.5,
                histogram: 0.5,
            }),
            stochastic: Some(StochasticReading { k: 15.0, d: 15.0 }),
            volume_ratio: Some(2.5),
            ..empty_snapshot()
        };
        let s = scorer(WeightTable::default());
        assert_eq!(s.evaluate(&snap, HtfTrend::Bullish), s.evaluate(&snap, HtfTrend::Bullish));
    }

    #[test]
    fn zero_weight_table_scores_zero() {
        let weights = WeightTable {
            rsi: 0.0,
            mfi: 0.0,
            adx: 0.0,
            macd: 0.0,
            bollinger: 0.0,
            ma: 0.0,
            stochastic: 0.0,
            volume: 0.0,
            obv: 0.0,
        };
        let snap = IndicatorSnapshot {
            rsi: Some(20.0),
            ..empty_snapshot()
        };
        assert_eq!(scorer(weights).evaluate(&snap, HtfTrend::Bullish).score, 0.0);
    }

    fn opt(range: std::ops::Range<f64>) -> impl proptest::strategy::Strategy<Value = Option<f64>> {
        proptest::option::of(range)
    }

    proptest! {
        #[test]
        fn score_always_within_bounds(
            rsi in opt(0.0..100.0),
            mfi in opt(0.0..100.0),
            adx in opt(0.0..100.0),
            k in opt(0.0..100.0),
            hist in opt(-5.0..5.0),
            vol in opt(0.0..6.0),
            close in 50.0f64..150.0,
            w in prop::array::uniform9(0.0f64..40.0),
            bullish in any::<bool>(),
        ) {
            let weights = WeightTable {
                rsi: w[0], mfi: w[1], adx: w[2], macd: w[3], bollinger: w[4],
                ma: w[5], stochastic: w[6], volume: w[7], obv: w[8],
            };
            let snap = IndicatorSnapshot {
                close,
                rsi,
                mfi,
                adx: adx.map(|a| AdxReading { adx: a, plus_di: 20.0, minus_di: 20.0 }),
                macd: hist.map(|h| MacdReading { macd: h, signal: 0.0, histogram: h }),
                stochastic: k.map(|k| StochasticReading { k, d: k }),
                volume_ratio: vol,
                ma_short: Some(100.0),
                ma_long: Some(95.0),
                ..empty_snapshot()
            };
            let htf = if bullish { HtfTrend::Bullish } else { HtfTrend::Bearish };
            let signal = scorer(weights).evaluate(&snap, htf);
            prop_assert!((0.0..=100.0).contains(&signal.score));
        }
    }
}
