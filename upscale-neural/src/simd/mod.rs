//! SIMD kernels for pixel/tensor conversion.
//!
//! Two hot loops dominate per-frame cost outside the network itself: byte to
//! normalized float on the way in, and clamp/scale/truncate on the way out.
//! Both have an AVX2 (x86_64) and a NEON (aarch64) implementation selected at
//! runtime, plus the scalar reference they must match byte for byte.
//!
//! | Operation | AVX2 (x86_64) | NEON (aarch64) | Lane width |
//! |-----------|---------------|----------------|------------|
//! | `u8_to_unit` | ✅ Full | ✅ Full | 8 / 8 |
//! | `unit_to_u8` | ✅ Full | ✅ Full | 16 / 8 |
//!
//! Remainders (`len % lanes`) are finished by the scalar code.

mod detect;
pub mod scalar;

#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
mod aarch64;

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

pub use detect::{detect_simd, SimdCapabilities};

/// Capabilities of the running CPU, probed once per process.
pub fn capabilities() -> SimdCapabilities {
    static CAPS: OnceLock<SimdCapabilities> = OnceLock::new();
    *CAPS.get_or_init(detect_simd)
}

/// Conversion implementation in use.
///
/// Asking for a path the CPU lacks falls through to the scalar loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionPath {
    /// Portable scalar loops.
    Scalar,
    /// AVX2 kernels (x86_64).
    Avx2,
    /// NEON kernels (aarch64).
    Neon,
}

impl ConversionPath {
    /// Best path for the running CPU.
    pub fn detect() -> Self {
        let caps = capabilities();
        let path = Self::from_capabilities(&caps);
        tracing::trace!(level = caps.best_level(), path = %path, "Pixel conversion path");
        path
    }

    /// Path for a given capability set.
    pub fn from_capabilities(caps: &SimdCapabilities) -> Self {
        if caps.avx2 {
            Self::Avx2
        } else if caps.neon {
            Self::Neon
        } else {
            Self::Scalar
        }
    }

    /// Whether this path can run on the current CPU.
    pub fn is_supported(&self) -> bool {
        match self {
            Self::Scalar => true,
            Self::Avx2 => capabilities().avx2,
            Self::Neon => capabilities().neon,
        }
    }

    /// Elements consumed per vector iteration of `unit_to_u8`.
    pub fn decode_lanes(&self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Avx2 => 16,
            Self::Neon => 8,
        }
    }

    /// Convert bytes to floats in `[0, 1]`.
    ///
    /// Converts `min(src.len(), dst.len())` elements.
    #[inline]
    pub fn u8_to_unit(&self, src: &[u8], dst: &mut [f32]) {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Avx2 if capabilities().avx2 => unsafe { x86_64::u8_to_unit_avx2(src, dst) },
            #[cfg(target_arch = "aarch64")]
            Self::Neon => unsafe { aarch64::u8_to_unit_neon(src, dst) },
            _ => scalar::u8_to_unit_scalar(src, dst),
        }
    }

    /// Clamp floats to `[0, 1]`, scale by 255 and truncate to bytes.
    ///
    /// Converts `min(src.len(), dst.len())` elements.
    #[inline]
    pub fn unit_to_u8(&self, src: &[f32], dst: &mut [u8]) {
        match self {
            #[cfg(target_arch = "x86_64")]
            Self::Avx2 if capabilities().avx2 => unsafe { x86_64::unit_to_u8_avx2(src, dst) },
            #[cfg(target_arch = "aarch64")]
            Self::Neon => unsafe { aarch64::unit_to_u8_neon(src, dst) },
            _ => scalar::unit_to_u8_scalar(src, dst),
        }
    }
}

impl fmt::Display for ConversionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::Avx2 => "avx2",
            Self::Neon => "neon",
        };
        f.write_str(name)
    }
}
