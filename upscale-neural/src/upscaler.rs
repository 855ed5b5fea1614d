//! End-to-end still image upscaling.

use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;

use crate::inference::InferenceEngine;
use crate::tensor::PixelBuffer;
use crate::timing::{Timer, UpscaleTimings};
use crate::{NeuralError, Result};

/// Result of one upscale call.
#[derive(Debug, Clone)]
pub struct UpscaledImage {
    /// Upscaled pixels in the engine codec's output order.
    pub image: PixelBuffer,
    /// Phase durations.
    pub timings: UpscaleTimings,
}

/// Upscales single images with one loaded model.
///
/// Pipeline: read and decode the source, check forced input dimensions,
/// encode to the model's precision, run inference, decode the output tensor
/// and merge channels into the output order. Errors propagate unchanged.
#[derive(Debug, Clone)]
pub struct ImageUpscaler {
    engine: Arc<InferenceEngine>,
}

impl ImageUpscaler {
    /// Create an upscaler around a loaded engine.
    pub fn new(engine: Arc<InferenceEngine>) -> Self {
        Self { engine }
    }

    /// The engine in use.
    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Upscale an image file.
    pub fn upscale_file(&self, path: &Path) -> Result<UpscaledImage> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                NeuralError::SourceNotFound(path.to_path_buf())
            }
            _ => NeuralError::Io(e),
        })?;
        self.upscale_bytes(&bytes)
    }

    /// Upscale an encoded image (PNG, JPEG).
    pub fn upscale_bytes(&self, bytes: &[u8]) -> Result<UpscaledImage> {
        let decoded = image::load_from_memory(bytes)?.to_rgb8();
        self.upscale(&PixelBuffer::from_rgb_image(decoded))
    }

    /// Upscale decoded pixels.
    pub fn upscale(&self, image: &PixelBuffer) -> Result<UpscaledImage> {
        let spec = self.engine.spec();
        spec.check_input(image.width(), image.height())?;

        let timer = Timer::start("inference");
        let output = self.engine.run(image)?;
        let inference = timer.stop_and_log();

        let timer = Timer::start("decode");
        let upscaled = self.engine.codec().decode(&output);
        let decode = timer.stop_and_log();

        tracing::debug!(
            model = %spec.id,
            input = %format_args!("{}x{}", image.width(), image.height()),
            output = %format_args!("{}x{}", upscaled.width(), upscaled.height()),
            "Image upscaled"
        );

        Ok(UpscaledImage {
            image: upscaled,
            timings: UpscaleTimings { inference, decode },
        })
    }
}

/// Encode pixels as PNG.
pub fn encode_png(image: &PixelBuffer) -> Result<Vec<u8>> {
    let rgb = image.clone().into_rgb_image()?;
    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

/// Write pixels to a PNG file.
pub fn save_png(image: &PixelBuffer, path: &Path) -> Result<()> {
    std::fs::write(path, encode_png(image)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ResampleBackend;
    use crate::models::ModelSpec;
    use crate::tensor::ChannelOrder;

    fn upscaler(scale: u32) -> ImageUpscaler {
        let spec = ModelSpec::new("x", "x", "x.onnx", scale);
        let engine = InferenceEngine::new(spec, Arc::new(ResampleBackend::new(scale))).unwrap();
        ImageUpscaler::new(Arc::new(engine))
    }

    #[test]
    fn test_upscale_dimensions() {
        let image = PixelBuffer::filled(8, 6, ChannelOrder::Rgb, [200, 100, 50]);
        let result = upscaler(3).upscale(&image).unwrap();
        assert_eq!(result.image.dimensions(), (24, 18));
    }

    #[test]
    fn test_inference_phase_is_timed() {
        use crate::inference::InferenceBackend;
        use crate::precision::ElementType;
        use crate::tensor::Tensor;

        struct SlowBackend(ResampleBackend);

        impl InferenceBackend for SlowBackend {
            fn name(&self) -> &str {
                "slow"
            }

            fn input_element_type(&self) -> ElementType {
                self.0.input_element_type()
            }

            fn run(&self, input: &Tensor) -> Result<Tensor> {
                std::thread::sleep(std::time::Duration::from_millis(5));
                self.0.run(input)
            }
        }

        let spec = ModelSpec::new("slow", "slow", "slow.onnx", 2);
        let engine = InferenceEngine::new(spec, Arc::new(SlowBackend(ResampleBackend::new(2)))).unwrap();
        let image = PixelBuffer::filled(4, 4, ChannelOrder::Rgb, [1, 2, 3]);

        let result = ImageUpscaler::new(Arc::new(engine)).upscale(&image).unwrap();
        assert!(result.timings.inference >= std::time::Duration::from_millis(5));
        assert_eq!(result.timings.total(), result.timings.inference + result.timings.decode);
    }

    #[test]
    fn test_missing_file() {
        let err = upscaler(2)
            .upscale_file(Path::new("/nonexistent/input.png"))
            .unwrap_err();
        assert!(matches!(err, NeuralError::SourceNotFound(_)));
    }

    #[test]
    fn test_undecodable_bytes() {
        let err = upscaler(2).upscale_bytes(b"not an image").unwrap_err();
        assert!(matches!(err, NeuralError::Image(_)));
    }

    #[test]
    fn test_png_round_trip() {
        let image = PixelBuffer::from_fn(5, 4, ChannelOrder::Bgr, |x, y| [x as u8 * 40, y as u8 * 60, 7]);
        let png = encode_png(&image).unwrap();
        let result = upscaler(1).upscale_bytes(&png).unwrap();
        assert_eq!(result.image.max_channel_diff(&image), Some(0));
    }
}
