//! Inference backends and the precision-negotiating engine.
//!
//! This module provides:
//! - The [`InferenceBackend`] seam over a loaded model
//! - An ONNX Runtime backend (feature `onnx`)
//! - A deterministic resampling backend for previews and tests
//! - [`InferenceEngine`], which picks the tensor precision a model accepts
//!   and refuses anything other than f16/f32 before doing any work

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::Array4;

use crate::codec::TensorCodec;
use crate::models::ModelSpec;
use crate::precision::{ElementType, Precision};
use crate::tensor::{PixelBuffer, Tensor};
use crate::{NeuralError, Result};

/// Execution provider for ONNX inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionProvider {
    /// CPU execution (default).
    #[default]
    Cpu,
    /// CUDA GPU execution.
    Cuda,
}

impl ExecutionProvider {
    /// Get the name of this execution provider.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Cuda => "CUDA",
        }
    }
}

/// Graph optimization level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    /// No optimization.
    None,
    /// Basic optimizations.
    Basic,
    /// Extended optimizations.
    Extended,
    /// All optimizations.
    #[default]
    All,
}

/// Configuration for ONNX sessions.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Execution provider to use.
    pub execution_provider: ExecutionProvider,
    /// GPU device ID (for CUDA).
    pub device_id: u32,
    /// Number of intra-op threads, 0 for the runtime default.
    pub intra_op_threads: usize,
    /// Number of inter-op threads, 0 for the runtime default.
    pub inter_op_threads: usize,
    /// Graph optimization level.
    pub optimization_level: OptimizationLevel,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::Cpu,
            device_id: 0,
            intra_op_threads: 0,
            inter_op_threads: 0,
            optimization_level: OptimizationLevel::All,
        }
    }
}

/// A loaded model that runs forward passes.
///
/// Implementations must be safe to call concurrently with distinct tensors.
pub trait InferenceBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Element type of the model's first input, as reported by the runtime.
    fn input_element_type(&self) -> ElementType;

    /// Run one forward pass.
    fn run(&self, input: &Tensor) -> Result<Tensor>;
}

/// Creates backends for models on demand.
pub trait BackendLoader: Send + Sync {
    /// Load the backend for `spec`.
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>>;
}

/// ONNX Runtime backend.
#[cfg(feature = "onnx")]
pub struct OnnxBackend {
    session: parking_lot::Mutex<ort::session::Session>,
    input_name: String,
    output_name: String,
    element_type: ElementType,
}

#[cfg(feature = "onnx")]
impl OnnxBackend {
    /// Load a model file into a session.
    pub fn from_file(path: &Path, config: &InferenceConfig) -> Result<Self> {
        use ort::execution_providers::CUDAExecutionProvider;
        use ort::session::builder::GraphOptimizationLevel;
        use ort::session::Session;

        if !path.exists() {
            return Err(NeuralError::ModelLoad(format!(
                "weights not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), provider = config.execution_provider.name(), "Loading ONNX model");

        let opt_level = match config.optimization_level {
            OptimizationLevel::None => GraphOptimizationLevel::Disable,
            OptimizationLevel::Basic => GraphOptimizationLevel::Level1,
            OptimizationLevel::Extended => GraphOptimizationLevel::Level2,
            OptimizationLevel::All => GraphOptimizationLevel::Level3,
        };

        let mut builder = Session::builder()
            .map_err(|e| NeuralError::ModelLoad(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(opt_level)
            .map_err(|e| NeuralError::ModelLoad(format!("Failed to set optimization level: {}", e)))?;

        if config.intra_op_threads > 0 {
            builder = builder
                .with_intra_threads(config.intra_op_threads)
                .map_err(|e| NeuralError::ModelLoad(format!("Failed to set intra threads: {}", e)))?;
        }

        if config.inter_op_threads > 0 {
            builder = builder
                .with_inter_threads(config.inter_op_threads)
                .map_err(|e| NeuralError::ModelLoad(format!("Failed to set inter threads: {}", e)))?;
        }

        if config.execution_provider == ExecutionProvider::Cuda {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(config.device_id as i32)
                    .build()])
                .map_err(|e| NeuralError::ModelLoad(format!("Failed to register CUDA: {}", e)))?;
        }

        let session = builder
            .commit_from_file(path)
            .map_err(|e| NeuralError::ModelLoad(format!("Failed to load model: {}", e)))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| NeuralError::ModelLoad("model has no inputs".to_string()))?;
        let output = session
            .outputs
            .first()
            .ok_or_else(|| NeuralError::ModelLoad("model has no outputs".to_string()))?;

        let element_type = match &input.input_type {
            ort::value::ValueType::Tensor { ty, .. } => element_type_from_ort(*ty),
            other => ElementType::Other(format!("{:?}", other)),
        };

        tracing::debug!(input = %input.name, output = %output.name, element_type = %element_type, "Model loaded");

        Ok(Self {
            input_name: input.name.clone(),
            output_name: output.name.clone(),
            element_type,
            session: parking_lot::Mutex::new(session),
        })
    }
}

#[cfg(feature = "onnx")]
fn element_type_from_ort(ty: ort::tensor::TensorElementType) -> ElementType {
    use ort::tensor::TensorElementType as T;
    match ty {
        T::Float16 => ElementType::Float16,
        T::Float32 => ElementType::Float32,
        T::Float64 => ElementType::Float64,
        T::Int8 => ElementType::Int8,
        T::Uint8 => ElementType::Uint8,
        other => ElementType::Other(format!("{:?}", other).to_lowercase()),
    }
}

#[cfg(feature = "onnx")]
impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &str {
        "onnx"
    }

    fn input_element_type(&self) -> ElementType {
        self.element_type.clone()
    }

    fn run(&self, input: &Tensor) -> Result<Tensor> {
        use ndarray::Ix4;
        use ort::value::Tensor as OrtTensor;

        let mut session = self.session.lock();
        let shape_err = |e: ndarray::ShapeError| {
            NeuralError::Inference(format!("Model output is not NCHW: {}", e))
        };

        match input {
            Tensor::Single(array) => {
                let value = OrtTensor::from_array(array.clone())
                    .map_err(|e| NeuralError::Inference(format!("Failed to create tensor: {}", e)))?;
                let outputs = session
                    .run(ort::inputs![self.input_name.as_str() => value])
                    .map_err(|e| NeuralError::Inference(format!("Inference failed: {}", e)))?;
                let view = outputs[self.output_name.as_str()]
                    .try_extract_array::<f32>()
                    .map_err(|e| NeuralError::Inference(format!("Failed to extract output: {}", e)))?;
                let array = view.to_owned().into_dimensionality::<Ix4>().map_err(shape_err)?;
                Ok(Tensor::Single(array))
            }
            Tensor::Half(array) => {
                let value = OrtTensor::from_array(array.clone())
                    .map_err(|e| NeuralError::Inference(format!("Failed to create tensor: {}", e)))?;
                let outputs = session
                    .run(ort::inputs![self.input_name.as_str() => value])
                    .map_err(|e| NeuralError::Inference(format!("Inference failed: {}", e)))?;
                let view = outputs[self.output_name.as_str()]
                    .try_extract_array::<f16>()
                    .map_err(|e| NeuralError::Inference(format!("Failed to extract output: {}", e)))?;
                let array = view.to_owned().into_dimensionality::<Ix4>().map_err(shape_err)?;
                Ok(Tensor::Half(array))
            }
        }
    }
}

/// ONNX backend placeholder when the `onnx` feature is disabled.
#[cfg(not(feature = "onnx"))]
pub struct OnnxBackend {
    _private: (),
}

#[cfg(not(feature = "onnx"))]
impl OnnxBackend {
    /// Always fails without the `onnx` feature.
    pub fn from_file(_path: &Path, _config: &InferenceConfig) -> Result<Self> {
        Err(NeuralError::OnnxNotEnabled)
    }
}

#[cfg(not(feature = "onnx"))]
impl InferenceBackend for OnnxBackend {
    fn name(&self) -> &str {
        "onnx"
    }

    fn input_element_type(&self) -> ElementType {
        ElementType::Float32
    }

    fn run(&self, _input: &Tensor) -> Result<Tensor> {
        Err(NeuralError::OnnxNotEnabled)
    }
}

/// Loads each model's weights file into an [`OnnxBackend`].
#[derive(Debug, Clone, Default)]
pub struct OnnxLoader {
    config: InferenceConfig,
}

impl OnnxLoader {
    /// Loader with the given session configuration.
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }
}

impl BackendLoader for OnnxLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>> {
        Ok(Arc::new(OnnxBackend::from_file(&spec.weights_path, &self.config)?))
    }
}

/// Deterministic bilinear upscaler standing in for a network.
///
/// Accepts only tensors of its configured element type, like a real session.
#[derive(Debug)]
pub struct ResampleBackend {
    scale: u32,
    element_type: ElementType,
    invocations: AtomicUsize,
}

impl ResampleBackend {
    /// Backend with the given integer scale taking f32 input.
    pub fn new(scale: u32) -> Self {
        Self {
            scale: scale.max(1),
            element_type: ElementType::Float32,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Report a different input element type.
    pub fn with_element_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }

    /// Number of forward passes run so far.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    fn resample(&self, input: &[f32], channels: usize, height: usize, width: usize) -> Vec<f32> {
        let scale = self.scale as usize;
        let (out_h, out_w) = (height * scale, width * scale);
        let mut output = vec![0.0f32; channels * out_h * out_w];
        if height == 0 || width == 0 {
            return output;
        }

        let scale_f = self.scale as f32;
        // Pixel-center aligned source coordinate, clamped to the image
        let source = |o: usize, len: usize| {
            let s = ((o as f32 + 0.5) / scale_f - 0.5).max(0.0);
            let i0 = (s.floor() as usize).min(len - 1);
            let i1 = (i0 + 1).min(len - 1);
            (i0, i1, s - i0 as f32)
        };

        for c in 0..channels {
            let plane = &input[c * height * width..(c + 1) * height * width];
            let out_plane = &mut output[c * out_h * out_w..(c + 1) * out_h * out_w];
            for oy in 0..out_h {
                let (y0, y1, dy) = source(oy, height);
                for ox in 0..out_w {
                    let (x0, x1, dx) = source(ox, width);
                    let top = plane[y0 * width + x0] * (1.0 - dx) + plane[y0 * width + x1] * dx;
                    let bottom = plane[y1 * width + x0] * (1.0 - dx) + plane[y1 * width + x1] * dx;
                    out_plane[oy * out_w + ox] = top * (1.0 - dy) + bottom * dy;
                }
            }
        }
        output
    }
}

impl InferenceBackend for ResampleBackend {
    fn name(&self) -> &str {
        "resample"
    }

    fn input_element_type(&self) -> ElementType {
        self.element_type.clone()
    }

    fn run(&self, input: &Tensor) -> Result<Tensor> {
        if input.precision().element_type() != self.element_type {
            return Err(NeuralError::Inference(format!(
                "backend expects {} input, got {}",
                self.element_type,
                input.precision()
            )));
        }
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let [batch, channels, height, width] = input.shape();
        if batch != 1 {
            return Err(NeuralError::Inference(format!("batch size {} not supported", batch)));
        }

        let scale = self.scale as usize;
        let shape = (1, channels, height * scale, width * scale);
        let values = self.resample(&input.to_f32_vec(), channels, height, width);
        let shape_err = |e: ndarray::ShapeError| NeuralError::Inference(e.to_string());

        Ok(match input {
            Tensor::Single(_) => Tensor::Single(Array4::from_shape_vec(shape, values).map_err(shape_err)?),
            Tensor::Half(_) => {
                let mut halves = vec![f16::ZERO; values.len()];
                halves.convert_from_f32_slice(&values);
                Tensor::Half(Array4::from_shape_vec(shape, halves).map_err(shape_err)?)
            }
        })
    }
}

/// Builds a [`ResampleBackend`] at each model's declared scale.
#[derive(Debug, Clone)]
pub struct ResampleLoader {
    element_type: ElementType,
}

impl Default for ResampleLoader {
    fn default() -> Self {
        Self {
            element_type: ElementType::Float32,
        }
    }
}

impl ResampleLoader {
    /// Loader whose backends report `element_type`.
    pub fn new(element_type: ElementType) -> Self {
        Self { element_type }
    }
}

impl BackendLoader for ResampleLoader {
    fn load(&self, spec: &ModelSpec) -> Result<Arc<dyn InferenceBackend>> {
        Ok(Arc::new(
            ResampleBackend::new(spec.scale).with_element_type(self.element_type.clone()),
        ))
    }
}

/// A model plus its loaded backend.
///
/// Negotiates the input precision, encodes pixels in exactly that precision
/// and runs the forward pass. Holds no per-call state, so one engine serves
/// any number of calls and threads.
pub struct InferenceEngine {
    spec: ModelSpec,
    backend: Arc<dyn InferenceBackend>,
    codec: TensorCodec,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("model", &self.spec.id)
            .field("backend", &self.backend.name())
            .field("codec", &self.codec)
            .finish()
    }
}

impl InferenceEngine {
    /// Create an engine after validating the model metadata.
    pub fn new(spec: ModelSpec, backend: Arc<dyn InferenceBackend>) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            backend,
            codec: TensorCodec::new(),
        })
    }

    /// Replace the codec (conversion path, output order).
    pub fn with_codec(mut self, codec: TensorCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Model metadata.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    /// Codec used for encode and decode.
    pub fn codec(&self) -> &TensorCodec {
        &self.codec
    }

    /// Backend name.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Precision the model accepts.
    ///
    /// The runtime-reported input type is authoritative. A declared half or
    /// single class that disagrees with it is logged and overridden; a mixed
    /// class simply defers to it. Anything but f16/f32 is rejected.
    pub fn resolve_precision(&self) -> Result<Precision> {
        let reported = self.backend.input_element_type();
        let precision = reported.precision()?;

        if let Some(declared) = self.spec.precision.declared() {
            if declared != precision {
                tracing::warn!(
                    model = %self.spec.id,
                    declared = %declared,
                    reported = %reported,
                    "Declared precision differs from model input, using model input"
                );
            }
        }
        Ok(precision)
    }

    /// Encode pixels in the negotiated precision.
    pub fn encode(&self, image: &PixelBuffer) -> Result<Tensor> {
        let precision = self.resolve_precision()?;
        self.codec.encode(image, precision)
    }

    /// Forward pass on an already encoded tensor.
    ///
    /// The output must be a single-batch 3-channel tensor; its spatial size is
    /// not enforced against the declared scale.
    pub fn infer(&self, input: &Tensor) -> Result<Tensor> {
        let precision = self.resolve_precision()?;
        if input.precision() != precision {
            return Err(NeuralError::InvalidInput(format!(
                "tensor is {}, model {} expects {}",
                input.precision(),
                self.spec.id,
                precision
            )));
        }

        let output = self.backend.run(input)?;
        let [batch, channels, height, width] = output.shape();
        if batch != 1 || channels != 3 {
            return Err(NeuralError::Inference(format!(
                "model {} produced shape [{}, {}, {}, {}], expected [1, 3, H, W]",
                self.spec.id, batch, channels, height, width
            )));
        }

        let expected = (input.height() * self.spec.scale as usize, input.width() * self.spec.scale as usize);
        if (height, width) != expected {
            tracing::debug!(
                model = %self.spec.id,
                declared_scale = self.spec.scale,
                height,
                width,
                "Model output size differs from declared scale"
            );
        }
        Ok(output)
    }

    /// Encode and run in one call.
    pub fn run(&self, image: &PixelBuffer) -> Result<Tensor> {
        let input = self.encode(image)?;
        self.infer(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::PrecisionClass;
    use crate::tensor::ChannelOrder;

    fn spec(scale: u32) -> ModelSpec {
        ModelSpec::new("test", "Test", "test.onnx", scale)
    }

    #[test]
    fn test_resample_output_shape() {
        let backend = ResampleBackend::new(2);
        let input = Tensor::Single(Array4::from_elem((1, 3, 4, 5), 0.5));
        let output = backend.run(&input).unwrap();
        assert_eq!(output.shape(), [1, 3, 8, 10]);
        assert!(output.to_f32_vec().iter().all(|&v| (v - 0.5).abs() < 1e-6));
        assert_eq!(backend.invocations(), 1);
    }

    #[test]
    fn test_resample_identity_at_scale_one() {
        let backend = ResampleBackend::new(1);
        let values: Vec<f32> = (0..12).map(|i| i as f32 / 11.0).collect();
        let input = Tensor::Single(Array4::from_shape_vec((1, 3, 2, 2), values.clone()).unwrap());
        assert_eq!(backend.run(&input).unwrap().to_f32_vec(), values);
    }

    #[test]
    fn test_resample_rejects_wrong_type() {
        let backend = ResampleBackend::new(2).with_element_type(ElementType::Float16);
        let input = Tensor::Single(Array4::zeros((1, 3, 2, 2)));
        assert!(matches!(backend.run(&input), Err(NeuralError::Inference(_))));
        assert_eq!(backend.invocations(), 0);
    }

    #[test]
    fn test_resolve_declared_precision() {
        let backend = Arc::new(ResampleBackend::new(2).with_element_type(ElementType::Float16));
        let engine = InferenceEngine::new(spec(2).with_precision(PrecisionClass::Half), backend).unwrap();
        assert_eq!(engine.resolve_precision().unwrap(), Precision::Half);
    }

    #[test]
    fn test_resolve_mixed_probes_backend() {
        for (ty, expected) in [
            (ElementType::Float16, Precision::Half),
            (ElementType::Float32, Precision::Single),
        ] {
            let backend = Arc::new(ResampleBackend::new(2).with_element_type(ty));
            let engine =
                InferenceEngine::new(spec(2).with_precision(PrecisionClass::Mixed), backend).unwrap();
            assert_eq!(engine.resolve_precision().unwrap(), expected);
        }
    }

    #[test]
    fn test_declared_mismatch_follows_model() {
        let backend = Arc::new(ResampleBackend::new(2).with_element_type(ElementType::Float16));
        let engine = InferenceEngine::new(spec(2).with_precision(PrecisionClass::Single), backend).unwrap();
        assert_eq!(engine.resolve_precision().unwrap(), Precision::Half);
    }

    #[test]
    fn test_unsupported_precision_runs_nothing() {
        let backend = Arc::new(ResampleBackend::new(2).with_element_type(ElementType::Float64));
        let engine = InferenceEngine::new(spec(2), backend.clone()).unwrap();
        let image = PixelBuffer::filled(4, 4, ChannelOrder::Rgb, [1, 2, 3]);
        assert!(matches!(engine.run(&image), Err(NeuralError::UnsupportedPrecision(_))));
        assert_eq!(backend.invocations(), 0);
    }

    #[test]
    fn test_engine_rejects_invalid_spec() {
        let backend = Arc::new(ResampleBackend::new(1));
        assert!(InferenceEngine::new(spec(0), backend).is_err());
    }

    #[test]
    fn test_infer_rejects_wrong_precision_tensor() {
        let backend = Arc::new(ResampleBackend::new(2));
        let engine = InferenceEngine::new(spec(2), backend.clone()).unwrap();
        let tensor = Tensor::Half(Array4::from_elem((1, 3, 2, 2), f16::ZERO));
        assert!(matches!(engine.infer(&tensor), Err(NeuralError::InvalidInput(_))));
        assert_eq!(backend.invocations(), 0);
    }

    #[test]
    fn test_engine_rejects_bad_output_channels() {
        struct FourChannel;
        impl InferenceBackend for FourChannel {
            fn name(&self) -> &str {
                "four"
            }
            fn input_element_type(&self) -> ElementType {
                ElementType::Float32
            }
            fn run(&self, _input: &Tensor) -> Result<Tensor> {
                Ok(Tensor::Single(Array4::zeros((1, 4, 2, 2))))
            }
        }

        let engine = InferenceEngine::new(spec(1), Arc::new(FourChannel)).unwrap();
        let image = PixelBuffer::filled(2, 2, ChannelOrder::Rgb, [0, 0, 0]);
        assert!(matches!(engine.run(&image), Err(NeuralError::Inference(_))));
    }

    #[test]
    fn test_onnx_loader_without_weights() {
        let loader = OnnxLoader::default();
        let spec = ModelSpec::new("missing", "Missing", "/nonexistent/model.onnx", 2);
        assert!(loader.load(&spec).is_err());
    }

    #[test]
    fn test_resample_loader_uses_scale() {
        let loader = ResampleLoader::new(ElementType::Float16);
        let backend = loader.load(&spec(3)).unwrap();
        assert_eq!(backend.input_element_type(), ElementType::Float16);
        let input = Tensor::Half(Array4::from_elem((1, 3, 1, 1), f16::ONE));
        assert_eq!(backend.run(&input).unwrap().shape(), [1, 3, 3, 3]);
    }
}
