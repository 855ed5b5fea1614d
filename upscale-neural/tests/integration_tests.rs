//! Integration tests for upscale-neural.
//!
//! These tests run without ONNX models by using the resampling backend.

use std::sync::Arc;

use upscale_neural::{
    encode_png, save_png, ChannelOrder, ConversionPath, ElementType, ImageUpscaler,
    InferenceBackend, InferenceEngine, ModelCache, ModelSpec, NeuralError, PixelBuffer,
    Precision, PrecisionClass, ResampleBackend, ResampleLoader, Tensor, TensorCodec,
};

fn engine_with(spec: ModelSpec, backend: Arc<ResampleBackend>) -> Arc<InferenceEngine> {
    Arc::new(InferenceEngine::new(spec, backend).unwrap())
}

fn checker(width: u32, height: u32) -> PixelBuffer {
    PixelBuffer::from_fn(width, height, ChannelOrder::Rgb, |x, y| {
        if (x / 4 + y / 4) % 2 == 0 {
            [240, 30, 90]
        } else {
            [10, 200, 160]
        }
    })
}

// ============================================================================
// Upscale Scenarios
// ============================================================================

#[test]
fn test_64_to_128_single_precision() {
    let spec = ModelSpec::new("x2", "Scale x2", "x2.onnx", 2).with_precision(PrecisionClass::Single);
    let upscaler = ImageUpscaler::new(engine_with(spec, Arc::new(ResampleBackend::new(2))));

    let result = upscaler.upscale(&checker(64, 64)).unwrap();
    assert_eq!(result.image.dimensions(), (128, 128));
    assert_eq!(result.image.as_bytes().len(), 128 * 128 * 3);
}

#[test]
fn test_forced_dimensions_checked_before_inference() {
    let backend = Arc::new(ResampleBackend::new(2));
    let spec = ModelSpec::new("fixed", "Fixed 256", "fixed.onnx", 2).with_must_input(256, 256);
    let upscaler = ImageUpscaler::new(engine_with(spec, backend.clone()));

    let err = upscaler.upscale(&checker(64, 64)).unwrap_err();
    assert!(matches!(err, NeuralError::DimensionMismatch { .. }));
    assert_eq!(backend.invocations(), 0);

    let ok = upscaler.upscale(&checker(256, 256)).unwrap();
    assert_eq!(ok.image.dimensions(), (512, 512));
    assert_eq!(backend.invocations(), 1);
}

#[test]
fn test_unsupported_precision_rejected_without_work() {
    for ty in [ElementType::Float64, ElementType::Uint8, ElementType::Other("bfloat16".into())] {
        let backend = Arc::new(ResampleBackend::new(2).with_element_type(ty));
        let spec = ModelSpec::new("bad", "Bad", "bad.onnx", 2).with_precision(PrecisionClass::Mixed);
        let upscaler = ImageUpscaler::new(engine_with(spec, backend.clone()));

        let err = upscaler.upscale(&checker(8, 8)).unwrap_err();
        assert!(matches!(err, NeuralError::UnsupportedPrecision(_)));
        assert_eq!(backend.invocations(), 0);
    }
}

#[test]
fn test_half_precision_model() {
    let backend = Arc::new(ResampleBackend::new(2).with_element_type(ElementType::Float16));
    let spec = ModelSpec::new("half", "Half", "half.onnx", 2).with_precision(PrecisionClass::Half);
    let engine = engine_with(spec, backend);

    let tensor = engine.encode(&checker(16, 8)).unwrap();
    assert_eq!(tensor.precision(), Precision::Half);

    let result = ImageUpscaler::new(engine).upscale(&checker(16, 8)).unwrap();
    assert_eq!(result.image.dimensions(), (32, 16));
}

#[test]
fn test_identity_model_preserves_pixels() {
    let spec = ModelSpec::new("x1", "Identity", "x1.onnx", 1);
    let upscaler = ImageUpscaler::new(engine_with(spec, Arc::new(ResampleBackend::new(1))));
    let image = checker(33, 17);

    let result = upscaler.upscale(&image).unwrap();
    assert_eq!(result.image, image);
}

#[test]
fn test_output_order_bgr() {
    let spec = ModelSpec::new("x1", "Identity", "x1.onnx", 1);
    let codec = TensorCodec::new().with_output_order(ChannelOrder::Bgr);
    let engine = InferenceEngine::new(spec, Arc::new(ResampleBackend::new(1)))
        .unwrap()
        .with_codec(codec);
    let upscaler = ImageUpscaler::new(Arc::new(engine));

    let image = PixelBuffer::filled(2, 2, ChannelOrder::Rgb, [1, 2, 3]);
    let result = upscaler.upscale(&image).unwrap();
    assert_eq!(result.image.order(), ChannelOrder::Bgr);
    assert_eq!(&result.image.as_bytes()[..3], &[3, 2, 1]);
}

#[test]
fn test_repeated_calls_are_deterministic() {
    let spec = ModelSpec::new("x2", "Scale x2", "x2.onnx", 2);
    let upscaler = ImageUpscaler::new(engine_with(spec, Arc::new(ResampleBackend::new(2))));
    let image = checker(21, 13);

    let first = upscaler.upscale(&image).unwrap().image;
    let second = upscaler.upscale(&image).unwrap().image;
    assert_eq!(first, second);
}

// ============================================================================
// File Tests
// ============================================================================

#[test]
fn test_upscale_file_and_save() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.png");
    let output = dir.path().join("output.png");
    save_png(&checker(10, 6), &input).unwrap();

    let spec = ModelSpec::new("x2", "Scale x2", "x2.onnx", 2);
    let upscaler = ImageUpscaler::new(engine_with(spec, Arc::new(ResampleBackend::new(2))));
    let result = upscaler.upscale_file(&input).unwrap();
    save_png(&result.image, &output).unwrap();

    let reloaded = image::open(&output).unwrap().to_rgb8();
    assert_eq!(reloaded.dimensions(), (20, 12));
}

#[test]
fn test_png_encoding_is_stable() {
    let image = checker(12, 12);
    assert_eq!(encode_png(&image).unwrap(), encode_png(&image).unwrap());
}

// ============================================================================
// Cache Tests
// ============================================================================

#[test]
fn test_cache_serves_upscaler() {
    let cache = ModelCache::new(Arc::new(ResampleLoader::default()), 2);
    let spec = ModelSpec::new("x4", "Scale x4", "x4.onnx", 4);

    let engine = cache.get_or_load(&spec).unwrap();
    let result = ImageUpscaler::new(engine).upscale(&checker(4, 4)).unwrap();
    assert_eq!(result.image.dimensions(), (16, 16));
    assert_eq!(cache.len(), 1);
}

// ============================================================================
// Codec Path Tests
// ============================================================================

#[test]
fn test_scalar_and_detected_paths_agree_end_to_end() {
    let backend = Arc::new(ResampleBackend::new(3));
    let image = checker(19, 11);

    let fast = TensorCodec::new();
    let slow = TensorCodec::with_path(ConversionPath::Scalar);

    let fast_in = fast.encode(&image, Precision::Single).unwrap();
    let slow_in = slow.encode(&image, Precision::Single).unwrap();
    assert_eq!(fast_in, slow_in);

    let output: Tensor = backend.run(&fast_in).unwrap();
    assert_eq!(fast.decode(&output), slow.decode(&output));
}
