//! Utility functions for validating configuration parameters.
//!
//! All range checks live here so that the configuration registry and the
//! file loader share a single definition of what is acceptable.

use std::ops::RangeInclusive;

/// Analog sample rates the sampler will schedule, in Hz.
pub const SAMPLE_RATE_RANGE_HZ: RangeInclusive<u32> = 1..=10_000;

/// Baud rates the serial layer accepts.
pub const BAUD_RATE_RANGE: RangeInclusive<u32> = 300..=921_600;

/// Validates an analog sample rate in Hz.
pub fn is_valid_sample_rate(rate_hz: u32) -> Result<(), &'static str> {
    if SAMPLE_RATE_RANGE_HZ.contains(&rate_hz) {
        Ok(())
    } else {
        Err("Sample rate must be between 1 and 10000 Hz")
    }
}

/// Validates a serial baud rate.
pub fn is_valid_baud_rate(baud: u32) -> Result<(), &'static str> {
    if BAUD_RATE_RANGE.contains(&baud) {
        Ok(())
    } else {
        Err("Baud rate must be between 300 and 921600")
    }
}

/// Validates an exponential filter coefficient. The filter is a single-pole
/// low-pass; alpha must be in (0, 1], where 1.0 disables smoothing.
pub fn is_valid_filter_alpha(alpha: f32) -> Result<(), &'static str> {
    if alpha > 0.0 && alpha <= 1.0 {
        Ok(())
    } else {
        Err("Filter alpha must be in (0, 1]")
    }
}

/// Validates a voltage scale (full-scale range of the converter).
pub fn is_valid_voltage_scale(scale: f32) -> Result<(), &'static str> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err("Voltage scale must be a positive finite value")
    }
}

/// Validates a maximum log file size in megabytes.
pub fn is_valid_max_file_size_mb(size_mb: u64) -> Result<(), &'static str> {
    if (1..=4096).contains(&size_mb) {
        Ok(())
    } else {
        Err("Max file size must be between 1 and 4096 MB")
    }
}

/// Validates if a given value is within a specified numeric range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_bounds() {
        assert!(is_valid_sample_rate(1).is_ok());
        assert!(is_valid_sample_rate(100).is_ok());
        assert!(is_valid_sample_rate(10_000).is_ok());
        assert!(is_valid_sample_rate(0).is_err());
        assert!(is_valid_sample_rate(10_001).is_err());
    }

    #[test]
    fn baud_rate_bounds() {
        assert!(is_valid_baud_rate(9_600).is_ok());
        assert!(is_valid_baud_rate(115_200).is_ok());
        assert!(is_valid_baud_rate(299).is_err());
        assert!(is_valid_baud_rate(1_000_000).is_err());
    }

    #[test]
    fn filter_alpha_open_at_zero_closed_at_one() {
        assert!(is_valid_filter_alpha(0.0).is_err());
        assert!(is_valid_filter_alpha(f32::EPSILON).is_ok());
        assert!(is_valid_filter_alpha(1.0).is_ok());
        assert!(is_valid_filter_alpha(1.01).is_err());
        assert!(is_valid_filter_alpha(f32::NAN).is_err());
    }

    #[test]
    fn voltage_scale_positive_finite() {
        assert!(is_valid_voltage_scale(4.0).is_ok());
        assert!(is_valid_voltage_scale(0.0).is_err());
        assert!(is_valid_voltage_scale(-1.0).is_err());
        assert!(is_valid_voltage_scale(f32::INFINITY).is_err());
    }

    #[test]
    fn generic_range_check() {
        assert!(is_in_range(5u8, 1..=10).is_ok());
        assert!(is_in_range(11u8, 1..=10).is_err());
    }
}
