//! SIMD capability report.

use clap::Args;
use console::style;
use serde::Serialize;
use upscale_neural::simd::{self, ConversionPath};

/// Conversion path report.
#[derive(Debug, Clone, Serialize)]
pub struct SimdReport {
    /// Target architecture.
    pub arch: String,
    /// Best available instruction set.
    pub level: String,
    /// Detected instruction sets.
    pub features: Vec<String>,
    /// Path the tensor codec will use.
    pub path: ConversionPath,
    /// Elements per vector iteration when decoding.
    pub decode_lanes: usize,
}

/// Show the SIMD conversion path in use.
#[derive(Args, Debug)]
pub struct CmdSimd {
    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdSimd {
    /// Build the report for this host.
    pub fn report() -> SimdReport {
        let caps = simd::capabilities();
        let mut features = Vec::new();
        if caps.sse41 {
            features.push("sse4.1".to_string());
        }
        if caps.avx2 {
            features.push("avx2".to_string());
        }
        if caps.neon {
            features.push("neon".to_string());
        }

        let path = ConversionPath::detect();
        SimdReport {
            arch: std::env::consts::ARCH.to_string(),
            level: caps.best_level().to_string(),
            features,
            path,
            decode_lanes: path.decode_lanes(),
        }
    }

    /// Execute the simd command.
    pub fn run(&self) -> anyhow::Result<()> {
        let report = Self::report();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("{}", style("Tensor conversion").cyan().bold());
        println!("  Architecture: {}", report.arch);
        println!("  SIMD level:   {}", report.level);
        if report.features.is_empty() {
            println!("  Features:     {}", style("none").dim());
        } else {
            println!("  Features:     {}", report.features.join(", "));
        }
        println!(
            "  Path:         {} ({} lanes)",
            style(report.path).yellow(),
            report.decode_lanes
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_path_is_supported() {
        let report = CmdSimd::report();
        assert!(report.path.is_supported());
        assert!(report.decode_lanes >= 1);
        assert_eq!(report.arch, std::env::consts::ARCH);
    }
}
