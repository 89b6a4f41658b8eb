//! Gain arithmetic shared by the tag writers and the Opus header patcher.
//!
//! All functions are pure. Loudness values are in LUFS, peaks either in dBTP or
//! as a linear amplitude ratio, gains in dB.

use crate::error::{Error, Result};

/// Reference loudness for ReplayGain 2.0 style tags.
pub const RG2_REFERENCE_LUFS: f64 = -18.0;

/// Reference loudness for R128 (Opus) tags, the EBU R128 target.
pub const R128_REFERENCE_LUFS: f64 = -23.0;

/// Scale of the Q7.8 fixed point format.
const Q7DOT8_SCALE: f64 = 256.0;

/// Convert a linear peak amplitude to dB.
///
/// A peak of zero or below has no logarithm and is rejected.
pub fn peak_linear_to_db(peak: f64) -> Result<f64> {
    if peak <= 0.0 || peak.is_nan() {
        return Err(Error::invalid_input(format!(
            "peak must be positive, got {}",
            peak
        )));
    }
    Ok(20.0 * peak.log10())
}

/// Convert a peak in dB to a linear amplitude ratio.
pub fn peak_db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Gain needed to bring `measured_lufs` to `reference_lufs`.
pub fn gain_db(reference_lufs: f64, measured_lufs: f64) -> f64 {
    reference_lufs - measured_lufs
}

/// Encode a value as Q7.8 fixed point.
///
/// Ties at `.5` round to the even integer. Values outside the representable
/// range saturate to `i16::MIN`/`i16::MAX`.
pub fn float_to_q7dot8(value: f64) -> i16 {
    // float -> int `as` casts saturate
    (value * Q7DOT8_SCALE).round_ties_even() as i16
}

/// Decode a Q7.8 fixed point value.
pub fn q7dot8_to_float(value: i16) -> f64 {
    f64::from(value) / Q7DOT8_SCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_conversions() {
        assert_eq!(peak_linear_to_db(1.0).unwrap(), 0.0);
        assert!((peak_linear_to_db(0.5).unwrap() - (-6.0206)).abs() < 1e-4);
        assert!((peak_db_to_linear(-6.0206) - 0.5).abs() < 1e-5);
        assert_eq!(format!("{:.8}", peak_db_to_linear(0.1)), "1.01157945");
    }

    #[test]
    fn test_non_positive_peak_is_rejected() {
        assert!(matches!(peak_linear_to_db(0.0), Err(Error::InvalidInput(_))));
        assert!(matches!(peak_linear_to_db(-0.3), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_gain_against_references() {
        assert_eq!(format!("{:.2}", gain_db(RG2_REFERENCE_LUFS, -20.6)), "2.60");
        assert_eq!(gain_db(R128_REFERENCE_LUFS, -23.0), 0.0);
        assert!((gain_db(R128_REFERENCE_LUFS, -14.7) - (-8.3)).abs() < 1e-9);
    }

    #[test]
    fn test_q7dot8_known_values() {
        assert_eq!(float_to_q7dot8(0.0), 0);
        assert_eq!(float_to_q7dot8(1.0), 256);
        assert_eq!(float_to_q7dot8(-8.3), -2125);
        assert_eq!(q7dot8_to_float(-2125), -8.30078125);
    }

    #[test]
    fn test_q7dot8_ties_round_to_even() {
        // 0.5 / 256 and 1.5 / 256 sit exactly on a tie
        assert_eq!(float_to_q7dot8(0.5 / 256.0), 0);
        assert_eq!(float_to_q7dot8(1.5 / 256.0), 2);
        assert_eq!(float_to_q7dot8(2.5 / 256.0), 2);
        assert_eq!(float_to_q7dot8(-0.5 / 256.0), 0);
        assert_eq!(float_to_q7dot8(-2.5 / 256.0), -2);
        assert_eq!(float_to_q7dot8(-3.5 / 256.0), -4);
    }

    #[test]
    fn test_q7dot8_saturates() {
        assert_eq!(float_to_q7dot8(500.0), i16::MAX);
        assert_eq!(float_to_q7dot8(-500.0), i16::MIN);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Decoding then re-encoding any Q7.8 value is lossless
        #[test]
        fn q7dot8_round_trip(q in any::<i16>()) {
            prop_assert_eq!(float_to_q7dot8(q7dot8_to_float(q)), q);
        }

        /// Encoding error never exceeds half a step
        #[test]
        fn q7dot8_encode_error_is_bounded(x in -127.0f64..127.0) {
            let q = float_to_q7dot8(x);
            prop_assert!((q7dot8_to_float(q) - x).abs() <= 0.5 / 256.0 + 1e-12);
        }

        /// Peak conversions invert each other
        #[test]
        fn peak_db_linear_round_trip(db in -60.0f64..12.0) {
            let back = peak_linear_to_db(peak_db_to_linear(db)).unwrap();
            prop_assert!((back - db).abs() < 1e-9);
        }
    }
}
