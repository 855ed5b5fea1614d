//! External frame extraction and re-muxing.
//!
//! Decoding a container into frames and encoding frames back into a video is
//! delegated to an external tool. [`FrameTool`] is the seam; [`FfmpegFrameTool`]
//! drives `ffmpeg`/`ffprobe` as child processes.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{JobError, Result};

/// printf-style name pattern of extracted frames.
pub const FRAME_PATTERN: &str = "frame_%06d.png";

/// File name of the frame at zero-based `index`, matching [`FRAME_PATTERN`].
pub fn frame_file_name(index: usize) -> String {
    format!("frame_{:06}.png", index + 1)
}

/// One-based frame number of a file named by [`FRAME_PATTERN`].
fn frame_number(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("frame_")?
        .parse()
        .ok()
}

/// Stream properties of a source video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoProbe {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frames per second, when the stream declares a usable rate.
    pub frame_rate: Option<f64>,
    /// Frame count, when the container reports it.
    pub frame_count: Option<u64>,
}

/// Video decode/encode collaborator.
#[async_trait]
pub trait FrameTool: Send + Sync {
    /// Read stream properties of `video`.
    async fn probe(&self, video: &Path) -> Result<VideoProbe>;

    /// Decode every frame of `video` into `out_dir` as PNG files.
    ///
    /// Returns the frame files in temporal order.
    async fn extract(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>>;

    /// Encode the frames in `frames_dir` named by `pattern` into `output`,
    /// carrying over the audio of `source` if it has any.
    async fn assemble(
        &self,
        frames_dir: &Path,
        pattern: &str,
        frame_rate: f64,
        source: &Path,
        output: &Path,
    ) -> Result<()>;
}

/// List the PNG frames in `dir` in temporal order.
///
/// Frames are ordered by their number, not their name: past 999999 the
/// padding no longer keeps the two in step. Other PNG files come first.
pub async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut frames = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            frames.push(path);
        }
    }
    frames.sort_by(|a, b| (frame_number(a), a).cmp(&(frame_number(b), b)));
    Ok(frames)
}

/// [`FrameTool`] backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegFrameTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    codec: String,
    crf: u8,
}

impl Default for FfmpegFrameTool {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            codec: "libx264".to_string(),
            crf: 18,
        }
    }
}

impl FfmpegFrameTool {
    /// Use executables found on `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit executable paths.
    pub fn with_executables(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Set the output video codec and quality.
    pub fn with_codec(mut self, codec: impl Into<String>, crf: u8) -> Self {
        self.codec = codec.into();
        self.crf = crf;
        self
    }

    async fn exec(&self, program: &Path, args: &[&str]) -> Result<Output> {
        tracing::debug!(program = %program.display(), ?args, "Running frame tool");
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| JobError::FrameTool(format!("{} failed to start: {}", program.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::FrameTool(format!(
                "{} exited with {}: {}",
                program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| JobError::FrameTool(format!("non UTF-8 path: {}", path.display())))
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
}

/// Parse an ffprobe rational such as `30000/1001` or a plain number.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn parse_probe(json: &[u8]) -> Result<VideoProbe> {
    let parsed: ProbeOutput = serde_json::from_slice(json)
        .map_err(|e| JobError::FrameTool(format!("unreadable ffprobe output: {}", e)))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| JobError::FrameTool("no video stream".to_string()))?;

    Ok(VideoProbe {
        width: stream.width,
        height: stream.height,
        frame_rate: stream.r_frame_rate.as_deref().and_then(parse_frame_rate),
        frame_count: stream.nb_frames.and_then(|n| n.parse().ok()),
    })
}

#[async_trait]
impl FrameTool for FfmpegFrameTool {
    async fn probe(&self, video: &Path) -> Result<VideoProbe> {
        let output = self
            .exec(
                &self.ffprobe,
                &[
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=width,height,r_frame_rate,nb_frames",
                    "-of",
                    "json",
                    path_arg(video)?,
                ],
            )
            .await?;
        parse_probe(&output.stdout)
    }

    async fn extract(&self, video: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let pattern = out_dir.join(FRAME_PATTERN);
        self.exec(
            &self.ffmpeg,
            &[
                "-hide_banner",
                "-nostdin",
                "-y",
                "-i",
                path_arg(video)?,
                "-map",
                "0:v:0",
                "-fps_mode",
                "passthrough",
                path_arg(&pattern)?,
            ],
        )
        .await?;
        list_frames(out_dir).await
    }

    async fn assemble(
        &self,
        frames_dir: &Path,
        pattern: &str,
        frame_rate: f64,
        source: &Path,
        output: &Path,
    ) -> Result<()> {
        let args = self.assemble_args(&frames_dir.join(pattern), frame_rate, source, output)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.exec(&self.ffmpeg, &args).await?;
        Ok(())
    }
}

impl FfmpegFrameTool {
    fn assemble_args(
        &self,
        frames: &Path,
        frame_rate: f64,
        source: &Path,
        output: &Path,
    ) -> Result<Vec<String>> {
        let rate = frame_rate.to_string();
        let crf = self.crf.to_string();
        let args = [
            "-hide_banner",
            "-nostdin",
            "-y",
            "-framerate",
            rate.as_str(),
            "-i",
            path_arg(frames)?,
            "-i",
            path_arg(source)?,
            "-map",
            "0:v:0",
            // Source audio, if any, is copied untouched
            "-map",
            "1:a?",
            "-c:a",
            "copy",
            "-c:v",
            self.codec.as_str(),
            "-crf",
            crf.as_str(),
            "-pix_fmt",
            "yuv420p",
            // Single-threaded bitexact encode keeps re-runs byte-identical
            "-threads",
            "1",
            "-map_metadata",
            "-1",
            "-fflags",
            "+bitexact",
            "-flags:v",
            "+bitexact",
            path_arg(output)?,
        ];
        Ok(args.iter().map(|arg| arg.to_string()).collect())
    }
}
