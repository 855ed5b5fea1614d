//! x86_64 pixel conversion kernels using AVX2.
//!
//! All functions in this module are unsafe because they require the CPU to support
//! AVX2 instructions. Calling them on a CPU without AVX2 support results in an
//! illegal instruction fault.
//!
//! Use `detect_simd()` to check for AVX2 support before calling these functions.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::scalar;

/// Lane width of [`u8_to_unit_avx2`].
pub const U8_TO_UNIT_LANES: usize = 8;

/// Lane width of [`unit_to_u8_avx2`].
pub const UNIT_TO_U8_LANES: usize = 16;

/// AVX2 byte-to-float normalization, 8 pixels per iteration.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * Only `min(src.len(), dst.len())` elements are converted.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn u8_to_unit_avx2(src: &[u8], dst: &mut [f32]) {
    let len = src.len().min(dst.len());
    let scale = _mm256_set1_ps(255.0);
    let mut i = 0;

    while i + U8_TO_UNIT_LANES <= len {
        let bytes = _mm_loadl_epi64(src.as_ptr().add(i) as *const __m128i);
        let ints = _mm256_cvtepu8_epi32(bytes);
        // Divide rather than multiply by the reciprocal so results match the scalar path bit for bit
        let floats = _mm256_div_ps(_mm256_cvtepi32_ps(ints), scale);
        _mm256_storeu_ps(dst.as_mut_ptr().add(i), floats);
        i += U8_TO_UNIT_LANES;
    }

    // Handle remainder
    scalar::u8_to_unit_scalar(&src[i..len], &mut dst[i..len]);
}

/// AVX2 float-to-byte conversion with clamp and truncation, 16 pixels per iteration.
///
/// # Safety
///
/// * The CPU must support AVX2 instructions. Use `detect_simd().avx2` to check.
/// * Only `min(src.len(), dst.len())` elements are converted.
#[target_feature(enable = "avx2")]
#[cfg(target_arch = "x86_64")]
pub unsafe fn unit_to_u8_avx2(src: &[f32], dst: &mut [u8]) {
    let len = src.len().min(dst.len());
    let zero = _mm256_setzero_ps();
    let one = _mm256_set1_ps(1.0);
    let scale = _mm256_set1_ps(255.0);
    let mut i = 0;

    while i + UNIT_TO_U8_LANES <= len {
        let a = _mm256_loadu_ps(src.as_ptr().add(i));
        let b = _mm256_loadu_ps(src.as_ptr().add(i + 8));

        // maxps returns the second operand for NaN, so NaN lanes become 0
        let a = _mm256_min_ps(_mm256_max_ps(a, zero), one);
        let b = _mm256_min_ps(_mm256_max_ps(b, zero), one);

        let a = _mm256_cvttps_epi32(_mm256_mul_ps(a, scale));
        let b = _mm256_cvttps_epi32(_mm256_mul_ps(b, scale));

        // packus works per 128-bit lane: [a0..3 b0..3 | a4..7 b4..7]
        let words = _mm256_packus_epi32(a, b);
        let words = _mm256_permute4x64_epi64(words, 0b11_01_10_00);

        let lo = _mm256_castsi256_si128(words);
        let hi = _mm256_extracti128_si256(words, 1);
        let bytes = _mm_packus_epi16(lo, hi);
        _mm_storeu_si128(dst.as_mut_ptr().add(i) as *mut __m128i, bytes);
        i += UNIT_TO_U8_LANES;
    }

    // Handle remainder
    scalar::unit_to_u8_scalar(&src[i..len], &mut dst[i..len]);
}
