//! ADX-driven reweighting of the base indicator table.

use crate::config::{ScoringConfig, WeightTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Trending,
    Ranging,
    Neutral,
}

impl Regime {
    /// Absent ADX leaves the regime neutral so the base table is used as-is.
    pub fn classify(adx: Option<f64>, scoring: &ScoringConfig) -> Self {
        match adx {
            Some(v) if v > scoring.trending_adx => Regime::Trending,
            Some(v) if v < scoring.ranging_adx => Regime::Ranging,
            _ => Regime::Neutral,
        }
    }
}

/// Working weights for one evaluation. Returns a new table; `base` is only read.
///
/// Trending: trend followers up (MACD x1.5, MA x1.3), oscillators down (x0.7).
/// Ranging: the inverse, with MFI also raised (x1.3).
pub fn working_weights(base: &WeightTable, adx: Option<f64>, scoring: &ScoringConfig) -> WeightTable {
    if !scoring.dynamic_weights {
        return *base;
    }
    let mut w = *base;
    match Regime::classify(adx, scoring) {
        Regime::Trending => {
            w.macd *= 1.5;
            w.ma *= 1.3;
            w.rsi *= 0.7;
            w.stochastic *= 0.7;
        }
        Regime::Ranging => {
            w.rsi *= 1.5;
            w.stochastic *= 1.5;
            w.mfi *= 1.3;
            w.macd *= 0.7;
            w.ma *= 0.7;
        }
        Regime::Neutral => {}
    }
    w
}
