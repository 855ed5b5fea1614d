//! AArch64 pixel conversion kernels using NEON.
//!
//! All functions in this module are unsafe because they use intrinsics that
//! bypass Rust's safety guarantees. NEON itself is always present on AArch64.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

use super::scalar;

/// Lane width of both NEON kernels.
pub const LANES: usize = 8;

/// NEON byte-to-float normalization, 8 pixels per iteration.
///
/// # Safety
///
/// * The CPU must support NEON instructions (standard on aarch64).
/// * Only `min(src.len(), dst.len())` elements are converted.
#[cfg(target_arch = "aarch64")]
pub unsafe fn u8_to_unit_neon(src: &[u8], dst: &mut [f32]) {
    let len = src.len().min(dst.len());
    let scale = vdupq_n_f32(255.0);
    let mut i = 0;

    while i + LANES <= len {
        let bytes = vld1_u8(src.as_ptr().add(i));
        let words = vmovl_u8(bytes);
        let lo = vcvtq_f32_u32(vmovl_u16(vget_low_u16(words)));
        let hi = vcvtq_f32_u32(vmovl_u16(vget_high_u16(words)));
        vst1q_f32(dst.as_mut_ptr().add(i), vdivq_f32(lo, scale));
        vst1q_f32(dst.as_mut_ptr().add(i + 4), vdivq_f32(hi, scale));
        i += LANES;
    }

    // Handle remainder
    scalar::u8_to_unit_scalar(&src[i..len], &mut dst[i..len]);
}

/// NEON float-to-byte conversion with clamp and truncation, 8 pixels per iteration.
///
/// # Safety
///
/// * The CPU must support NEON instructions (standard on aarch64).
/// * Only `min(src.len(), dst.len())` elements are converted.
#[cfg(target_arch = "aarch64")]
pub unsafe fn unit_to_u8_neon(src: &[f32], dst: &mut [u8]) {
    let len = src.len().min(dst.len());
    let zero = vdupq_n_f32(0.0);
    let one = vdupq_n_f32(1.0);
    let mut i = 0;

    while i + LANES <= len {
        let a = vld1q_f32(src.as_ptr().add(i));
        let b = vld1q_f32(src.as_ptr().add(i + 4));

        // fmaxnm prefers the number over NaN, so NaN lanes become 0
        let a = vminnmq_f32(vmaxnmq_f32(a, zero), one);
        let b = vminnmq_f32(vmaxnmq_f32(b, zero), one);

        // fcvtzu truncates toward zero
        let a = vcvtq_u32_f32(vmulq_n_f32(a, 255.0));
        let b = vcvtq_u32_f32(vmulq_n_f32(b, 255.0));

        let words = vcombine_u16(vmovn_u32(a), vmovn_u32(b));
        vst1_u8(dst.as_mut_ptr().add(i), vmovn_u16(words));
        i += LANES;
    }

    // Handle remaining samples
    scalar::unit_to_u8_scalar(&src[i..len], &mut dst[i..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_arch = "aarch64")]
    fn test_unit_to_u8_neon() {
        let mut src: Vec<f32> = (0..21).map(|i| i as f32 / 20.0 * 1.4 - 0.2).collect();
        src[3] = f32::NAN;
        let mut fast = vec![0u8; src.len()];
        let mut slow = vec![0u8; src.len()];
        unsafe {
            unit_to_u8_neon(&src, &mut fast);
        }
        scalar::unit_to_u8_scalar(&src, &mut slow);
        assert_eq!(fast, slow);
        assert_eq!(fast[3], 0);
    }

    #[test]
    #[cfg(target_arch = "aarch64")]
    fn test_u8_to_unit_neon() {
        let src: Vec<u8> = (0..=255).chain(0..5).collect();
        let mut fast = vec![0.0f32; src.len()];
        let mut slow = vec![0.0f32; src.len()];
        unsafe {
            u8_to_unit_neon(&src, &mut fast);
        }
        scalar::u8_to_unit_scalar(&src, &mut slow);
        assert!(fast.iter().zip(&slow).all(|(a, b)| a.to_bits() == b.to_bits()));
    }
}
