// src/strategies/traits.rs
use crate::indicators::{HtfTrend, IndicatorSnapshot};
use crate::types::Signal;

/// Entry scoring policy. Implementations are pure: the same snapshot and
/// trend flag always yield the same signal.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, snapshot: &IndicatorSnapshot, htf: HtfTrend) -> Signal;
}
