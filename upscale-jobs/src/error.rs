//! Upscale job error types.

use thiserror::Error;
use upscale_neural::NeuralError;

/// Upscale job errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// Conversion, inference or model error.
    #[error("Upscale error: {0}")]
    Neural(#[from] NeuralError),

    /// Source video or image missing from storage.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Referenced record missing or soft-deleted.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid job state transition.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// The job's claim was released and taken by another run.
    #[error("Claim on job {0} was lost")]
    ClaimLost(uuid::Uuid),

    /// External frame extraction or muxing failed.
    #[error("Frame tool error: {0}")]
    FrameTool(String),

    /// Blob storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Blob key escapes the storage root.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Whether the job may succeed if run again unchanged.
    ///
    /// Storage, I/O and frame tool failures are retryable. Precision,
    /// dimension and model metadata errors fail identically on every run and
    /// are terminal, as are missing records.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Neural(e) => e.is_transient(),
            Self::SourceNotFound(_)
            | Self::FrameTool(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Internal(_) => true,
            Self::NotFound(_)
            | Self::ClaimLost(_)
            | Self::InvalidStateTransition { .. }
            | Self::InvalidKey(_)
            | Self::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for JobError {
    fn from(e: serde_json::Error) -> Self {
        JobError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for JobError {
    fn from(e: tokio::task::JoinError) -> Self {
        JobError::Internal(e.to_string())
    }
}

/// Result type for job operations.
pub type Result<T> = std::result::Result<T, JobError>;
