// src/utils/precision.rs
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// Decimal places the exchange accepts for order volume.
pub const VOLUME_SCALE: u32 = 8;

/// Truncates a volume to the exchange's 8 decimal places.
pub fn floor_volume(qty: Decimal) -> Decimal {
    qty.round_dp_with_strategy(VOLUME_SCALE, RoundingStrategy::ToZero)
}

/// Lossy bridge from indicator space. Non-finite input maps to zero.
pub fn decimal_from_f64(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or(Decimal::ZERO)
}

pub fn decimal_to_f64(v: Decimal) -> f64 {
    v.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn volume_truncates_to_eight_places() {
        assert_eq!(floor_volume(dec!(0.123456789)), dec!(0.12345678));
        assert_eq!(floor_volume(dec!(1)), dec!(1));
    }
}
