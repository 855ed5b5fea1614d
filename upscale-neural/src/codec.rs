//! Conversion between interleaved pixels and normalized NCHW tensors.
//!
//! Encoding splits an image into R, G and B planes, normalizes each plane to
//! `[0, 1]` and, for half precision, narrows the result in parallel. Decoding
//! converts each channel plane back to bytes with clamp-then-scale semantics
//! (truncating), and a separate merge step interleaves the planes into the
//! pipeline's channel order.
//!
//! Tensor channels are always R, G, B regardless of the buffer order.

use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::Array4;
use rayon::prelude::*;

use crate::precision::Precision;
use crate::simd::ConversionPath;
use crate::tensor::{ChannelOrder, PixelBuffer, Tensor};
use crate::{NeuralError, Result};

/// Elements narrowed per rayon task.
const NARROW_CHUNK: usize = 64 * 1024;

/// Decoded channel planes awaiting the merge step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPlanes {
    /// Plane width in pixels.
    pub width: u32,
    /// Plane height in pixels.
    pub height: u32,
    /// R, G and B planes, each `width * height` bytes.
    pub planes: [Vec<u8>; 3],
}

/// Pixel/tensor converter.
///
/// Holds only the conversion path chosen at construction and the output
/// channel order, so one codec can be shared freely across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorCodec {
    path: ConversionPath,
    output_order: ChannelOrder,
}

impl Default for TensorCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorCodec {
    /// Codec using the fastest path the CPU supports.
    pub fn new() -> Self {
        Self {
            path: ConversionPath::detect(),
            output_order: ChannelOrder::Rgb,
        }
    }

    /// Codec forced onto a specific conversion path.
    ///
    /// Falls back to scalar when the CPU cannot run `path`.
    pub fn with_path(path: ConversionPath) -> Self {
        let path = if path.is_supported() {
            path
        } else {
            tracing::warn!(requested = %path, "Conversion path not supported on this CPU, using scalar");
            ConversionPath::Scalar
        };
        Self {
            path,
            output_order: ChannelOrder::Rgb,
        }
    }

    /// Set the channel order produced by [`decode`](Self::decode).
    pub fn with_output_order(mut self, order: ChannelOrder) -> Self {
        self.output_order = order;
        self
    }

    /// Conversion path in use.
    pub fn path(&self) -> ConversionPath {
        self.path
    }

    /// Channel order produced by [`decode`](Self::decode).
    pub fn output_order(&self) -> ChannelOrder {
        self.output_order
    }

    /// Build a `[1, 3, H, W]` tensor with values in `[0, 1]`.
    pub fn encode(&self, image: &PixelBuffer, precision: Precision) -> Result<Tensor> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let plane = width * height;
        let offsets = image.order().rgb_offsets();

        let mut bytes = vec![0u8; plane * 3];
        for (i, pixel) in image.as_bytes().chunks_exact(PixelBuffer::CHANNELS).enumerate() {
            for (channel, &offset) in offsets.iter().enumerate() {
                bytes[channel * plane + i] = pixel[offset];
            }
        }

        let mut values = vec![0.0f32; plane * 3];
        for (src, dst) in bytes
            .chunks_exact(plane.max(1))
            .zip(values.chunks_exact_mut(plane.max(1)))
        {
            self.path.u8_to_unit(src, dst);
        }

        let shape = (1, 3, height, width);
        let tensor = match precision {
            Precision::Single => Tensor::Single(
                Array4::from_shape_vec(shape, values)
                    .map_err(|e| NeuralError::InvalidInput(format!("tensor shape: {}", e)))?,
            ),
            Precision::Half => Tensor::Half(
                Array4::from_shape_vec(shape, narrow(&values))
                    .map_err(|e| NeuralError::InvalidInput(format!("tensor shape: {}", e)))?,
            ),
        };
        Ok(tensor)
    }

    /// Convert a tensor back to pixels in the codec's output order.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not single-batch with exactly 3 channels.
    pub fn decode(&self, tensor: &Tensor) -> PixelBuffer {
        self.merge_planes(&self.decode_planes(tensor))
    }

    /// Per-channel conversion: clamp to `[0, 1]`, scale by 255, truncate.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not single-batch with exactly 3 channels.
    pub fn decode_planes(&self, tensor: &Tensor) -> ChannelPlanes {
        let [batch, channels, height, width] = tensor.shape();
        assert_eq!(batch, 1, "decode expects a single-batch tensor, got batch {}", batch);
        assert_eq!(channels, 3, "decode expects 3 channels, got {}", channels);
        assert!(
            height <= u32::MAX as usize && width <= u32::MAX as usize,
            "tensor dimensions {}x{} exceed image limits",
            width,
            height
        );

        let plane = width * height;
        let values = tensor.to_f32_vec();
        let planes = std::array::from_fn(|channel| {
            let mut out = vec![0u8; plane];
            self.path
                .unit_to_u8(&values[channel * plane..(channel + 1) * plane], &mut out);
            out
        });

        ChannelPlanes {
            width: width as u32,
            height: height as u32,
            planes,
        }
    }

    /// Interleave decoded planes into the codec's output order.
    pub fn merge_planes(&self, planes: &ChannelPlanes) -> PixelBuffer {
        let width = planes.width as usize;
        let offsets = self.output_order.rgb_offsets();
        let mut data = vec![0u8; width * planes.height as usize * PixelBuffer::CHANNELS];

        if width > 0 {
            data.par_chunks_mut(width * PixelBuffer::CHANNELS)
                .enumerate()
                .for_each(|(y, row)| {
                    let start = y * width;
                    for (x, pixel) in row.chunks_exact_mut(PixelBuffer::CHANNELS).enumerate() {
                        for (channel, &offset) in offsets.iter().enumerate() {
                            pixel[offset] = planes.planes[channel][start + x];
                        }
                    }
                });
        }

        PixelBuffer::from_parts(planes.width, planes.height, self.output_order, data)
    }
}

/// Narrow f32 values to f16, in parallel across chunks.
fn narrow(values: &[f32]) -> Vec<f16> {
    let mut out = vec![f16::ZERO; values.len()];
    out.par_chunks_mut(NARROW_CHUNK)
        .zip(values.par_chunks(NARROW_CHUNK))
        .for_each(|(dst, src)| dst.convert_from_f32_slice(src));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_fn(width, height, ChannelOrder::Rgb, |x, y| {
            [(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) * 3 % 256) as u8]
        })
    }

    #[test]
    fn test_encode_shape_and_range() {
        let codec = TensorCodec::new();
        let tensor = codec.encode(&gradient(5, 3), Precision::Single).unwrap();
        assert_eq!(tensor.shape(), [1, 3, 3, 5]);
        assert!(tensor.to_f32_vec().iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_encode_is_planar_rgb() {
        let codec = TensorCodec::new();
        let image = PixelBuffer::filled(2, 2, ChannelOrder::Bgr, [255, 0, 51]);
        let tensor = codec.encode(&image, Precision::Single).unwrap();
        let Tensor::Single(array) = tensor else {
            panic!("expected f32 tensor");
        };
        assert_eq!(array[[0, 0, 1, 1]], 1.0);
        assert_eq!(array[[0, 1, 0, 0]], 0.0);
        assert!((array[[0, 2, 0, 1]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_half_encode() {
        let codec = TensorCodec::new();
        let tensor = codec.encode(&gradient(4, 4), Precision::Half).unwrap();
        assert_eq!(tensor.precision(), Precision::Half);
        assert_eq!(tensor.byte_len(), 4 * 4 * 3 * 2);
    }

    #[test]
    fn test_round_trip_single() {
        let codec = TensorCodec::new();
        let image = gradient(17, 9);
        let tensor = codec.encode(&image, Precision::Single).unwrap();
        let decoded = codec.decode(&tensor);
        assert_eq!(decoded.dimensions(), (17, 9));
        assert!(decoded.max_channel_diff(&image).unwrap() <= Precision::Single.round_trip_tolerance());
    }

    #[test]
    fn test_round_trip_half() {
        let codec = TensorCodec::new();
        let image = gradient(33, 7);
        let tensor = codec.encode(&image, Precision::Half).unwrap();
        let decoded = codec.decode(&tensor);
        assert!(decoded.max_channel_diff(&image).unwrap() <= Precision::Half.round_trip_tolerance());
    }

    #[test]
    fn test_decode_clamps() {
        let codec = TensorCodec::new();
        let mut array = Array4::<f32>::zeros((1, 3, 1, 2));
        array[[0, 0, 0, 0]] = -1000.0;
        array[[0, 0, 0, 1]] = 1000.0;
        array[[0, 1, 0, 0]] = 0.5;
        array[[0, 2, 0, 1]] = f32::NAN;
        let decoded = codec.decode(&Tensor::Single(array));
        assert_eq!(decoded.rgb_at(0, 0), [0, 127, 0]);
        assert_eq!(decoded.rgb_at(1, 0), [255, 0, 0]);
    }

    #[test]
    fn test_merge_order() {
        let planes = ChannelPlanes {
            width: 1,
            height: 1,
            planes: [vec![1], vec![2], vec![3]],
        };
        let rgb = TensorCodec::new().merge_planes(&planes);
        let bgr = TensorCodec::new()
            .with_output_order(ChannelOrder::Bgr)
            .merge_planes(&planes);
        assert_eq!(rgb.as_bytes(), &[1, 2, 3]);
        assert_eq!(bgr.as_bytes(), &[3, 2, 1]);
        assert_eq!(bgr.order(), ChannelOrder::Bgr);
    }

    #[test]
    fn test_empty_image() {
        let codec = TensorCodec::new();
        let image = PixelBuffer::new(0, 0, ChannelOrder::Rgb, Vec::new()).unwrap();
        let tensor = codec.encode(&image, Precision::Single).unwrap();
        assert_eq!(tensor.shape(), [1, 3, 0, 0]);
        assert_eq!(codec.decode(&tensor).dimensions(), (0, 0));
    }

    #[test]
    #[should_panic(expected = "3 channels")]
    fn test_decode_rejects_channel_count() {
        let codec = TensorCodec::new();
        codec.decode(&Tensor::Single(Array4::zeros((1, 4, 2, 2))));
    }

    #[test]
    #[should_panic(expected = "single-batch")]
    fn test_decode_rejects_batch() {
        let codec = TensorCodec::new();
        codec.decode(&Tensor::Single(Array4::zeros((2, 3, 2, 2))));
    }

    #[test]
    fn test_forced_scalar_path() {
        let codec = TensorCodec::with_path(ConversionPath::Scalar);
        assert_eq!(codec.path(), ConversionPath::Scalar);
    }
}
