//! Pixel buffers and NCHW tensors.

use half::f16;
use half::slice::HalfFloatSliceExt;
use image::RgbImage;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::precision::Precision;
use crate::{NeuralError, Result};

/// Interleaved channel order of a [`PixelBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    /// RGB order (default for most models).
    #[default]
    Rgb,
    /// BGR order (OpenCV and most on-disk frame tooling).
    Bgr,
}

impl ChannelOrder {
    /// Byte offsets of R, G and B within one pixel.
    pub fn rgb_offsets(&self) -> [usize; 3] {
        match self {
            Self::Rgb => [0, 1, 2],
            Self::Bgr => [2, 1, 0],
        }
    }
}

/// 3-channel, 8-bit, interleaved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Channels per pixel.
    pub const CHANNELS: usize = 3;

    /// Wrap interleaved bytes. `data` must hold exactly `width * height * 3` bytes.
    pub fn new(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * Self::CHANNELS;
        if data.len() != expected {
            return Err(NeuralError::InvalidInput(format!(
                "pixel buffer {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            order,
            data,
        })
    }

    /// Wrap bytes the caller has already sized correctly.
    pub(crate) fn from_parts(width: u32, height: u32, order: ChannelOrder, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * Self::CHANNELS);
        Self {
            width,
            height,
            order,
            data,
        }
    }

    /// Buffer where every pixel is `rgb`.
    pub fn filled(width: u32, height: u32, order: ChannelOrder, rgb: [u8; 3]) -> Self {
        Self::from_fn(width, height, order, |_, _| rgb)
    }

    /// Build a buffer from a per-pixel RGB function.
    pub fn from_fn<F>(width: u32, height: u32, order: ChannelOrder, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> [u8; 3],
    {
        let offsets = order.rgb_offsets();
        let mut data = vec![0u8; width as usize * height as usize * Self::CHANNELS];
        for y in 0..height {
            for x in 0..width {
                let rgb = f(x, y);
                let base = (y as usize * width as usize + x as usize) * Self::CHANNELS;
                for (channel, &offset) in offsets.iter().enumerate() {
                    data[base + offset] = rgb[channel];
                }
            }
        }
        Self {
            width,
            height,
            order,
            data,
        }
    }

    /// Take ownership of an RGB image.
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            order: ChannelOrder::Rgb,
            data: image.into_raw(),
        }
    }

    /// Convert to an RGB image, reordering channels if needed.
    pub fn into_rgb_image(self) -> Result<RgbImage> {
        let (width, height) = (self.width, self.height);
        let rgb = self.into_order(ChannelOrder::Rgb);
        RgbImage::from_raw(width, height, rgb.data)
            .ok_or_else(|| NeuralError::InvalidInput("pixel buffer size mismatch".to_string()))
    }

    /// Same pixels in another channel order.
    pub fn into_order(mut self, order: ChannelOrder) -> Self {
        if self.order != order {
            for pixel in self.data.chunks_exact_mut(Self::CHANNELS) {
                pixel.swap(0, 2);
            }
            self.order = order;
        }
        self
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Channel order of the interleaved bytes.
    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    /// Raw interleaved bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume into raw interleaved bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Pixel at `(x, y)` as RGB.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let base = (y as usize * self.width as usize + x as usize) * Self::CHANNELS;
        let [r, g, b] = self.order.rgb_offsets();
        [self.data[base + r], self.data[base + g], self.data[base + b]]
    }

    /// Largest per-channel difference against another buffer of the same size.
    ///
    /// Channel order is taken into account; `None` when dimensions differ.
    pub fn max_channel_diff(&self, other: &PixelBuffer) -> Option<u8> {
        if self.dimensions() != other.dimensions() {
            return None;
        }
        let mut max = 0u8;
        for y in 0..self.height {
            for x in 0..self.width {
                let a = self.rgb_at(x, y);
                let b = other.rgb_at(x, y);
                for c in 0..Self::CHANNELS {
                    max = max.max(a[c].abs_diff(b[c]));
                }
            }
        }
        Some(max)
    }
}

/// Single-batch NCHW tensor in one of the two supported precisions.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    /// binary16 elements.
    Half(Array4<f16>),
    /// binary32 elements.
    Single(Array4<f32>),
}

impl Tensor {
    /// Element precision.
    pub fn precision(&self) -> Precision {
        match self {
            Self::Half(_) => Precision::Half,
            Self::Single(_) => Precision::Single,
        }
    }

    /// Shape as `[N, C, H, W]`.
    pub fn shape(&self) -> [usize; 4] {
        let dims = match self {
            Self::Half(array) => array.dim(),
            Self::Single(array) => array.dim(),
        };
        [dims.0, dims.1, dims.2, dims.3]
    }

    /// Batch size (N).
    pub fn batch(&self) -> usize {
        self.shape()[0]
    }

    /// Number of channels (C).
    pub fn channels(&self) -> usize {
        self.shape()[1]
    }

    /// Height (H).
    pub fn height(&self) -> usize {
        self.shape()[2]
    }

    /// Width (W).
    pub fn width(&self) -> usize {
        self.shape()[3]
    }

    /// Elements widened to f32 in standard (NCHW) order.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Self::Single(array) => match array.as_slice() {
                Some(slice) => slice.to_vec(),
                None => array.iter().copied().collect(),
            },
            Self::Half(array) => match array.as_slice() {
                Some(slice) => {
                    let mut out = vec![0.0f32; slice.len()];
                    slice.convert_to_f32_slice(&mut out);
                    out
                }
                None => array.iter().map(|v| v.to_f32()).collect(),
            },
        }
    }

    /// Total size of the element data in bytes.
    pub fn byte_len(&self) -> usize {
        let [n, c, h, w] = self.shape();
        n * c * h * w * self.precision().bytes_per_element()
    }
}
