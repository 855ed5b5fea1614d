//! Runtime SIMD feature detection.

/// Detected SIMD capabilities for the current CPU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimdCapabilities {
    // x86_64 features
    /// SSE4.1 support.
    pub sse41: bool,
    /// AVX2 support (256-bit integer SIMD).
    pub avx2: bool,

    // ARM features
    /// NEON support (baseline for AArch64).
    pub neon: bool,
}

impl SimdCapabilities {
    /// Check if any SIMD acceleration usable by the pixel kernels is available.
    pub fn has_simd(&self) -> bool {
        self.avx2 || self.neon
    }

    /// Get the best available SIMD level as a string.
    pub fn best_level(&self) -> &'static str {
        if self.avx2 {
            "AVX2"
        } else if self.sse41 {
            "SSE4.1"
        } else if self.neon {
            "NEON"
        } else {
            "Scalar"
        }
    }
}

/// Detect SIMD capabilities at runtime.
#[cfg(target_arch = "x86_64")]
pub fn detect_simd() -> SimdCapabilities {
    SimdCapabilities {
        sse41: is_x86_feature_detected!("sse4.1"),
        avx2: is_x86_feature_detected!("avx2"),
        ..Default::default()
    }
}

/// Detect SIMD capabilities at runtime (ARM).
#[cfg(target_arch = "aarch64")]
pub fn detect_simd() -> SimdCapabilities {
    // NEON is mandatory on AArch64
    SimdCapabilities {
        neon: true,
        ..Default::default()
    }
}

/// Fallback for unsupported architectures.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn detect_simd() -> SimdCapabilities {
    SimdCapabilities::default()
}
