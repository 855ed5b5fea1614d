//! Neural upscale errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors from tensor conversion, inference and image upscaling.
#[derive(Error, Debug)]
pub enum NeuralError {
    /// The model's input element type is neither f16 nor f32.
    #[error("unsupported precision: model input is {0}")]
    UnsupportedPrecision(String),

    /// Image dimensions do not match the model's forced input size.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Required dimensions.
        expected: String,
        /// Dimensions of the supplied image.
        actual: String,
    },

    /// Source image is missing or unreadable.
    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Invalid input data
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Model metadata failed validation.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Model loading failed
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Inference error
    #[error("inference error: {0}")]
    Inference(String),

    /// ONNX feature not enabled
    #[error("ONNX feature not enabled")]
    OnnxNotEnabled,

    /// Image decode or encode failure.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NeuralError {
    /// Whether retrying the same call can succeed.
    ///
    /// Precision, dimension and model errors are properties of the model and
    /// input, so they fail identically every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound(_) | Self::Io(_) | Self::Inference(_)
        )
    }
}
