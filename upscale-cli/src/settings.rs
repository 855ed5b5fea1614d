//! Worker settings file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use upscale_jobs::{CoordinatorConfig, FfmpegFrameTool, DEFAULT_MAX_RETRIES};
use upscale_neural::{ExecutionProvider, InferenceConfig, PrecisionClass};

/// Execution provider selectable from the command line and settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Cpu,
    Cuda,
}

impl From<Provider> for ExecutionProvider {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Cpu => ExecutionProvider::Cpu,
            Provider::Cuda => ExecutionProvider::Cuda,
        }
    }
}

/// Precision class override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrecisionArg {
    Half,
    Single,
    Mixed,
}

impl From<PrecisionArg> for PrecisionClass {
    fn from(arg: PrecisionArg) -> Self {
        match arg {
            PrecisionArg::Half => PrecisionClass::Half,
            PrecisionArg::Single => PrecisionClass::Single,
            PrecisionArg::Mixed => PrecisionClass::Mixed,
        }
    }
}

/// Settings for `upscale worker`, read from JSON. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Root of the blob store holding sources and outputs.
    pub media_root: PathBuf,
    /// Scratch directory for frames.
    pub work_dir: Option<PathBuf>,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Retry budget for new jobs.
    pub max_retries: u32,
    /// Blob key prefix for outputs.
    pub output_prefix: String,
    /// Frames upscaled concurrently within one job.
    pub frame_parallelism: usize,
    /// Seconds after which another worker's claim counts as abandoned.
    pub stale_claim_after_secs: Option<u64>,
    /// Loaded models kept in memory.
    pub model_cache_size: usize,
    /// Identity recorded on claimed jobs.
    pub worker_id: Option<String>,
    /// ffmpeg executable.
    pub ffmpeg: PathBuf,
    /// ffprobe executable.
    pub ffprobe: PathBuf,
    /// Output video codec.
    pub codec: String,
    /// Output quality.
    pub crf: u8,
    /// Inference execution provider.
    pub provider: Provider,
    /// GPU device for CUDA.
    pub device_id: u32,
    /// Intra-op threads, 0 for the runtime default.
    pub intra_op_threads: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            media_root: PathBuf::from("media"),
            work_dir: None,
            poll_interval_ms: 5000,
            max_retries: DEFAULT_MAX_RETRIES,
            output_prefix: "upscaled".to_string(),
            frame_parallelism: 1,
            stale_claim_after_secs: Some(3600),
            model_cache_size: 4,
            worker_id: None,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            codec: "libx264".to_string(),
            crf: 18,
            provider: Provider::Cpu,
            device_id: 0,
            intra_op_threads: 0,
        }
    }
}

impl WorkerSettings {
    /// Read settings from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid settings file: {}", path.display()))
    }

    /// Coordinator configuration.
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let defaults = CoordinatorConfig::default();
        CoordinatorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_retries: self.max_retries,
            work_dir: self.work_dir.clone().unwrap_or(defaults.work_dir),
            output_prefix: self.output_prefix.clone(),
            frame_parallelism: self.frame_parallelism.max(1),
            stale_claim_after: self.stale_claim_after_secs.map(Duration::from_secs),
            worker_id: self.worker_id.clone().unwrap_or(defaults.worker_id),
            model_cache_size: self.model_cache_size,
        }
    }

    /// ONNX session configuration.
    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            execution_provider: self.provider.into(),
            device_id: self.device_id,
            intra_op_threads: self.intra_op_threads,
            ..Default::default()
        }
    }

    /// Frame tool driving the configured executables.
    pub fn frame_tool(&self) -> FfmpegFrameTool {
        FfmpegFrameTool::new()
            .with_executables(&self.ffmpeg, &self.ffprobe)
            .with_codec(&self.codec, self.crf)
    }
}
