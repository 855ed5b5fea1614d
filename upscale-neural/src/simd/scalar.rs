//! Scalar reference implementations.
//!
//! The vectorized kernels must produce exactly these results, element for
//! element, so every fast path finishes its remainder by calling into here.

/// Normalize one byte to `[0, 1]`.
#[inline(always)]
pub fn unit_from_u8(value: u8) -> f32 {
    value as f32 / 255.0
}

/// Clamp to `[0, 1]`, scale to 255 and truncate.
///
/// NaN maps to 0. Comparisons are written so a NaN fails the first test and
/// collapses to the lower bound, matching `maxps`/`fmaxnm` lane behavior.
#[inline(always)]
pub fn u8_from_unit(value: f32) -> u8 {
    let v = if value > 0.0 { value } else { 0.0 };
    let v = if v < 1.0 { v } else { 1.0 };
    (v * 255.0) as u8
}

/// Convert bytes to normalized floats.
pub fn u8_to_unit_scalar(src: &[u8], dst: &mut [f32]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = unit_from_u8(s);
    }
}

/// Convert normalized floats to bytes.
pub fn unit_to_u8_scalar(src: &[f32], dst: &mut [u8]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = u8_from_unit(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_extremes() {
        assert_eq!(u8_from_unit(-1000.0), 0);
        assert_eq!(u8_from_unit(1000.0), 255);
        assert_eq!(u8_from_unit(f32::NEG_INFINITY), 0);
        assert_eq!(u8_from_unit(f32::INFINITY), 255);
        assert_eq!(u8_from_unit(f32::NAN), 0);
        assert_eq!(u8_from_unit(-0.0), 0);
    }

    #[test]
    fn test_truncates() {
        // 0.999 * 255 = 254.745
        assert_eq!(u8_from_unit(0.999), 254);
        assert_eq!(u8_from_unit(0.5), 127);
        assert_eq!(u8_from_unit(1.0), 255);
    }

    #[test]
    fn test_unit_from_u8() {
        assert_eq!(unit_from_u8(0), 0.0);
        assert_eq!(unit_from_u8(255), 1.0);
    }

    #[test]
    fn test_slices() {
        let src = [0u8, 51, 102, 255];
        let mut floats = [0.0f32; 4];
        u8_to_unit_scalar(&src, &mut floats);
        assert!((floats[1] - 0.2).abs() < 1e-6);

        let mut bytes = [0u8; 4];
        unit_to_u8_scalar(&floats, &mut bytes);
        assert_eq!(bytes[0], 0);
        assert_eq!(bytes[3], 255);
        assert!(bytes[1].abs_diff(51) <= 1);
    }
}
