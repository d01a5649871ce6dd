//! Fixed-point codec for prices and quantities.
//!
//! Silver stores decimals as scaled integers: `encode(x, inc) = round(x/inc)`.
//! The increment for a row must come from the symbol version active at that
//! row's own timestamp. Using the currently-active increment instead would
//! silently re-scale history after a tick-size change.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("increment must be positive and finite, got {0}")]
    InvalidIncrement(f64),

    #[error("value {0} is not finite")]
    NonFiniteValue(f64),

    #[error("value {value} overflows i64 at increment {increment}")]
    Overflow { value: f64, increment: f64 },
}

/// Encode a decimal value as a signed fixed-point integer.
pub fn encode(value: f64, increment: f64) -> Result<i64, CodecError> {
    if !(increment.is_finite() && increment > 0.0) {
        return Err(CodecError::InvalidIncrement(increment));
    }
    if !value.is_finite() {
        return Err(CodecError::NonFiniteValue(value));
    }
    let scaled = (value / increment).round();
    // i64::MAX is not exactly representable as f64; compare against the next
    // representable bound below it.
    if scaled >= 9_223_372_036_854_775_808.0 || scaled < -9_223_372_036_854_775_808.0 {
        return Err(CodecError::Overflow { value, increment });
    }
    Ok(scaled as i64)
}

/// Decode a fixed-point integer back to a decimal value.
pub fn decode(encoded: i64, increment: f64) -> f64 {
    encoded as f64 * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encodes_at_increment_resolution() {
        assert_eq!(encode(50_000.1, 0.1).unwrap(), 500_001);
        assert_eq!(encode(50_000.1, 0.01).unwrap(), 5_000_010);
        assert_eq!(encode(0.0, 0.01).unwrap(), 0);
        assert_eq!(encode(-2.5, 0.5).unwrap(), -5);
    }

    #[test]
    fn rounds_to_nearest_increment() {
        assert_eq!(encode(100.126, 0.01).unwrap(), 10_013);
        assert_eq!(encode(100.124, 0.01).unwrap(), 10_012);
    }

    #[test]
    fn rejects_bad_inputs() {
        assert_eq!(encode(1.0, 0.0).unwrap_err(), CodecError::InvalidIncrement(0.0));
        assert_eq!(encode(1.0, -0.1).unwrap_err(), CodecError::InvalidIncrement(-0.1));
        assert!(matches!(
            encode(f64::NAN, 0.1).unwrap_err(),
            CodecError::NonFiniteValue(_)
        ));
        assert!(matches!(
            encode(1e300, 1e-10).unwrap_err(),
            CodecError::Overflow { .. }
        ));
    }

    #[test]
    fn decode_reverses_encode() {
        let inc = 0.01;
        let encoded = encode(123.45, inc).unwrap();
        assert!((decode(encoded, inc) - 123.45).abs() < inc / 2.0);
    }

    proptest! {
        /// Round-trip property: decode(encode(x, inc), inc) lands within half
        /// an increment of x, across representative price/qty magnitudes
        /// including zero and negatives.
        #[test]
        fn round_trip_within_half_increment(
            value in -1e9f64..1e9f64,
            inc_exp in -8i32..2i32,
        ) {
            let increment = 10f64.powi(inc_exp);
            let encoded = encode(value, increment).unwrap();
            let decoded = decode(encoded, increment);
            // f64 division noise allows a hair over inc/2 at large magnitudes.
            prop_assert!((decoded - value).abs() <= increment * 0.5 + value.abs() * 1e-12);
        }

        #[test]
        fn encoding_is_deterministic(value in -1e9f64..1e9f64) {
            let a = encode(value, 0.01).unwrap();
            let b = encode(value, 0.01).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
