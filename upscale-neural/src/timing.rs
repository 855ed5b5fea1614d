//! Phase timing for upscale calls.

use std::time::{Duration, Instant};

/// Timer for measuring one phase.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    name: &'static str,
}

impl Timer {
    /// Start a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Get elapsed time without stopping.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop and log the result at debug level.
    pub fn stop_and_log(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!(phase = self.name, elapsed_ms = elapsed.as_secs_f64() * 1000.0, "Phase complete");
        elapsed
    }
}

/// Durations of the two measured upscale phases.
///
/// Observability only; nothing makes decisions from these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpscaleTimings {
    /// Encode plus forward pass.
    pub inference: Duration,
    /// Tensor-to-image decode and channel merge.
    pub decode: Duration,
}

impl UpscaleTimings {
    /// Sum of both phases.
    pub fn total(&self) -> Duration {
        self.inference + self.decode
    }

    /// Accumulate another call's timings.
    pub fn accumulate(&mut self, other: &UpscaleTimings) {
        self.inference += other.inference;
        self.decode += other.decode;
    }
}
