//! Neural super-resolution for still images and video frames
//!
//! This crate converts 8-bit interleaved pixels to normalized NCHW tensors in
//! half or single precision, runs a super-resolution model over them and
//! converts the result back to pixels.
//!
//! # Features
//!
//! - `onnx` - Enable ONNX Runtime support for neural inference
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use upscale_neural::{
//!     ChannelOrder, ImageUpscaler, InferenceEngine, ModelSpec, PixelBuffer, ResampleBackend,
//! };
//!
//! let spec = ModelSpec::new("preview-x2", "Preview x2", "preview.onnx", 2);
//! let engine = InferenceEngine::new(spec, Arc::new(ResampleBackend::new(2))).unwrap();
//! let upscaler = ImageUpscaler::new(Arc::new(engine));
//!
//! let frame = PixelBuffer::filled(64, 64, ChannelOrder::Rgb, [32, 64, 128]);
//! let upscaled = upscaler.upscale(&frame).unwrap();
//! assert_eq!(upscaled.image.dimensions(), (128, 128));
//! ```

mod error;
pub mod cache;
pub mod codec;
pub mod inference;
pub mod models;
pub mod precision;
pub mod simd;
pub mod tensor;
pub mod timing;
pub mod upscaler;

// Re-export primary types
pub use error::*;
pub use cache::ModelCache;
pub use codec::{ChannelPlanes, TensorCodec};
pub use inference::{
    BackendLoader, ExecutionProvider, InferenceBackend, InferenceConfig, InferenceEngine,
    OnnxBackend, OnnxLoader, OptimizationLevel, ResampleBackend, ResampleLoader,
};
pub use models::{ContentCategory, ModelCatalog, ModelSpec};
pub use precision::{ElementType, Precision, PrecisionClass};
pub use simd::{ConversionPath, SimdCapabilities};
pub use tensor::{ChannelOrder, PixelBuffer, Tensor};
pub use timing::UpscaleTimings;
pub use upscaler::{encode_png, save_png, ImageUpscaler, UpscaledImage};

/// Result type for neural operations
pub type Result<T> = std::result::Result<T, NeuralError>;
