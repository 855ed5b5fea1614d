//! Numeric precision negotiation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NeuralError, Result};

/// Tensor element precision the codec can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// IEEE 754 binary16.
    Half,
    /// IEEE 754 binary32.
    Single,
}

impl Precision {
    /// Size of one tensor element in bytes.
    pub fn bytes_per_element(&self) -> usize {
        match self {
            Self::Half => 2,
            Self::Single => 4,
        }
    }

    /// Maximum per-channel difference after an encode/decode round trip.
    ///
    /// `k / 255 * 255` is exact in f32 for every byte, so single precision
    /// round-trips losslessly; binary16 rounding can cost one level under
    /// truncating decode.
    pub fn round_trip_tolerance(&self) -> u8 {
        match self {
            Self::Half => 1,
            Self::Single => 0,
        }
    }

    /// Element type a model must declare to accept this precision.
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::Half => ElementType::Float16,
            Self::Single => ElementType::Float32,
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Half => f.write_str("f16"),
            Self::Single => f.write_str("f32"),
        }
    }
}

/// Precision declared in model metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionClass {
    /// 16-bit float input.
    Half,
    /// 32-bit float input.
    #[default]
    Single,
    /// Ask the loaded session which of the two it wants.
    Mixed,
}

impl PrecisionClass {
    /// The precision fixed by the metadata, if any.
    pub fn declared(&self) -> Option<Precision> {
        match self {
            Self::Half => Some(Precision::Half),
            Self::Single => Some(Precision::Single),
            Self::Mixed => None,
        }
    }
}

/// Input element type reported by an inference runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float16,
    Float32,
    Float64,
    Int8,
    Uint8,
    /// Anything else the runtime reports, by name.
    Other(String),
}

impl ElementType {
    /// Map to a codec precision, rejecting everything but f16 and f32.
    pub fn precision(&self) -> Result<Precision> {
        match self {
            Self::Float16 => Ok(Precision::Half),
            Self::Float32 => Ok(Precision::Single),
            other => Err(NeuralError::UnsupportedPrecision(other.to_string())),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float16 => f.write_str("float16"),
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
            Self::Int8 => f.write_str("int8"),
            Self::Uint8 => f.write_str("uint8"),
            Self::Other(name) => f.write_str(name),
        }
    }
}
