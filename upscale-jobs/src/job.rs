//! Upscale job, video and model records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upscale_neural::ModelSpec;
use uuid::Uuid;

use crate::error::{JobError, Result};

/// Default retry budget for retryable failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Queued,
    /// Claimed by a worker.
    Processing,
    /// Output written and published.
    Ready,
    /// Gave up; will not be claimed again without manual requeue.
    Failed {
        /// Last error.
        reason: String,
    },
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Processing => write!(f, "processing"),
            Self::Ready => write!(f, "ready"),
            Self::Failed { .. } => write!(f, "failed"),
        }
    }
}

impl JobStatus {
    /// Check if this status can transition to another status.
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        matches!(
            (self, next),
            // Claim
            (Self::Queued, Self::Processing)
                // Success
                | (Self::Processing, Self::Ready)
                // Retryable failure or stale claim recovery
                | (Self::Processing, Self::Queued)
                // Terminal failure or retries exhausted
                | (Self::Processing, Self::Failed { .. })
                // Manual requeue
                | (Self::Failed { .. }, Self::Queued)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed { .. })
    }
}

/// One requested upscale of one video with one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscaleJob {
    /// Unique job identifier.
    pub id: Uuid,
    /// Source video.
    pub video_id: Uuid,
    /// Model to apply.
    pub model_id: String,
    /// Output blob key, set on success.
    #[serde(default)]
    pub output_path: Option<String>,
    /// Resolution label of the output, set on success.
    #[serde(default)]
    pub resolution: Option<String>,
    /// Current status.
    pub status: JobStatus,
    /// Requesting user.
    pub owner: String,
    /// Retryable failures so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Retryable failures allowed before the job fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Most recent error.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Worker holding the claim.
    #[serde(default)]
    pub claimed_by: Option<String>,
    /// When the current claim was taken or last renewed.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    /// Token of the current claim. Each claim gets a fresh one, so a run
    /// whose claim was released can tell it no longer owns the job.
    #[serde(default)]
    pub claim_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub modified_at: DateTime<Utc>,
    /// Soft-delete timestamp.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl UpscaleJob {
    /// Create a queued job.
    pub fn new(video_id: Uuid, model_id: impl Into<String>, owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            video_id,
            model_id: model_id.into(),
            output_path: None,
            resolution: None,
            status: JobStatus::Queued,
            owner: owner.into(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            claimed_by: None,
            claimed_at: None,
            claim_id: None,
            created_at: now,
            modified_at: now,
            deleted_at: None,
        }
    }

    /// Set maximum retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.modified_at = created_at;
        self
    }

    /// Transition to a new status.
    pub fn transition_to(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(&next) {
            return Err(JobError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        if next != JobStatus::Processing {
            self.claimed_by = None;
            self.claimed_at = None;
            self.claim_id = None;
        }
        self.status = next;
        self.modified_at = Utc::now();
        Ok(())
    }

    /// Take the claim for `worker`.
    pub fn claim(&mut self, worker: &str) -> Result<()> {
        self.transition_to(JobStatus::Processing)?;
        self.claimed_by = Some(worker.to_string());
        self.claimed_at = Some(self.modified_at);
        self.claim_id = Some(Uuid::new_v4());
        Ok(())
    }

    /// Whether `claim_id` is the live claim on this job.
    pub fn holds_claim(&self, claim_id: Uuid) -> bool {
        self.status == JobStatus::Processing && self.claim_id == Some(claim_id)
    }

    /// Record a successful run.
    pub fn complete(&mut self, output_path: String, resolution: String) -> Result<()> {
        self.transition_to(JobStatus::Ready)?;
        self.output_path = Some(output_path);
        self.resolution = Some(resolution);
        self.last_error = None;
        Ok(())
    }

    /// Record a retryable failure.
    ///
    /// Returns `true` if the job went back to the queue, `false` if the retry
    /// budget is spent and the job failed.
    pub fn requeue(&mut self, error: String) -> Result<bool> {
        if self.retry_count >= self.max_retries {
            self.fail(error)?;
            return Ok(false);
        }
        self.transition_to(JobStatus::Queued)?;
        self.retry_count += 1;
        self.last_error = Some(error);
        Ok(true)
    }

    /// Record a terminal failure.
    pub fn fail(&mut self, reason: String) -> Result<()> {
        self.transition_to(JobStatus::Failed {
            reason: reason.clone(),
        })?;
        self.last_error = Some(reason);
        Ok(())
    }

    /// Return a failed job to the queue with a fresh retry budget.
    pub fn reset(&mut self) -> Result<()> {
        self.transition_to(JobStatus::Queued)?;
        self.retry_count = 0;
        Ok(())
    }

    /// Release a claim abandoned by a crashed worker.
    pub fn release_claim(&mut self) -> Result<()> {
        self.transition_to(JobStatus::Queued)
    }

    /// Mark as soft-deleted.
    pub fn soft_delete(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.modified_at = now;
    }

    /// Whether the job is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Source video known to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Video identifier.
    pub id: Uuid,
    /// Blob key of the encoded source.
    pub source_path: String,
    /// Source width in pixels.
    #[serde(default)]
    pub width: u32,
    /// Source height in pixels.
    #[serde(default)]
    pub height: u32,
    /// Frames per second, if known ahead of probing.
    #[serde(default)]
    pub frame_rate: Option<f64>,
    /// Soft-delete timestamp.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl VideoRecord {
    /// Create a video record.
    pub fn new(source_path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_path: source_path.into(),
            width,
            height,
            frame_rate: None,
            deleted_at: None,
        }
    }

    /// Set the known frame rate.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    /// Whether the video is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Model metadata as stored by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Model description.
    #[serde(flatten)]
    pub spec: ModelSpec,
    /// Soft-delete timestamp.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ModelRecord {
    /// Wrap a model description.
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            deleted_at: None,
        }
    }

    /// Model identifier.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Whether the model is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A newly available rendition of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Job that produced it.
    pub job_id: Uuid,
    /// Model used.
    pub model_id: String,
    /// Resolution label such as `1080p`.
    pub label: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output blob key.
    pub path: String,
}

/// Resolution label for an output size.
pub fn resolution_label(width: u32, height: u32) -> String {
    let short = width.min(height);
    const LABELS: [u32; 6] = [4320, 2160, 1440, 1080, 720, 480];
    match LABELS.iter().find(|&&label| short >= label) {
        Some(label) => format!("{}p", label),
        None => format!("{}p", short),
    }
}
