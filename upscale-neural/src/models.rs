//! Super-resolution model metadata.
//!
//! This module provides:
//! - Model descriptions (scale, forced input size, precision, content categories)
//! - Input validation against forced dimensions
//! - A catalog of models loadable from JSON

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::precision::PrecisionClass;
use crate::{NeuralError, Result};

bitflags! {
    /// Content a model is trained for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ContentCategory: u32 {
        /// Camera footage.
        const LIVE_ACTION = 0x0001;
        /// Anime, cartoons and illustration.
        const ANIMATION = 0x0002;
        /// Screen recordings, slides, text.
        const SCREEN = 0x0004;
        /// Rendered game footage.
        const GAME = 0x0008;
    }
}

/// Description of one super-resolution model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Location of the weights file.
    pub weights_path: PathBuf,
    /// Integer upscale factor, at least 1.
    pub scale: u32,
    /// Required input width, 0 for any.
    #[serde(default)]
    pub must_input_width: u32,
    /// Required input height, 0 for any.
    #[serde(default)]
    pub must_input_height: u32,
    /// Supported content.
    #[serde(default)]
    pub categories: ContentCategory,
    /// Declared input precision.
    #[serde(default)]
    pub precision: PrecisionClass,
}

impl ModelSpec {
    /// Model accepting any input size at single precision.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        weights_path: impl Into<PathBuf>,
        scale: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weights_path: weights_path.into(),
            scale,
            must_input_width: 0,
            must_input_height: 0,
            categories: ContentCategory::empty(),
            precision: PrecisionClass::default(),
        }
    }

    /// Force the input dimensions.
    pub fn with_must_input(mut self, width: u32, height: u32) -> Self {
        self.must_input_width = width;
        self.must_input_height = height;
        self
    }

    /// Set the declared precision.
    pub fn with_precision(mut self, precision: PrecisionClass) -> Self {
        self.precision = precision;
        self
    }

    /// Set the supported content categories.
    pub fn with_categories(mut self, categories: ContentCategory) -> Self {
        self.categories = categories;
        self
    }

    /// Check metadata invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(NeuralError::InvalidModel("model id is empty".to_string()));
        }
        if self.scale < 1 {
            return Err(NeuralError::InvalidModel(format!(
                "model {} declares scale {}, must be at least 1",
                self.id, self.scale
            )));
        }
        if self.weights_path.as_os_str().is_empty() {
            return Err(NeuralError::InvalidModel(format!(
                "model {} has no weights path",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether either input dimension is forced.
    pub fn has_forced_input(&self) -> bool {
        self.must_input_width > 0 || self.must_input_height > 0
    }

    /// Reject images whose size differs from a forced input dimension.
    pub fn check_input(&self, width: u32, height: u32) -> Result<()> {
        let width_ok = self.must_input_width == 0 || self.must_input_width == width;
        let height_ok = self.must_input_height == 0 || self.must_input_height == height;
        if width_ok && height_ok {
            return Ok(());
        }

        let dim = |v: u32| if v == 0 { "any".to_string() } else { v.to_string() };
        Err(NeuralError::DimensionMismatch {
            expected: format!("{}x{}", dim(self.must_input_width), dim(self.must_input_height)),
            actual: format!("{}x{}", width, height),
        })
    }

    /// Output size for a given input size, as declared by the model.
    pub fn output_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        (width * self.scale, height * self.scale)
    }

    /// Whether the model is trained for any of `categories`.
    pub fn supports(&self, categories: ContentCategory) -> bool {
        self.categories.intersects(categories)
    }
}

/// Models known to this process, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: HashMap<String, ModelSpec>,
}

impl ModelCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of models.
    pub fn from_json(json: &str) -> Result<Self> {
        let specs: Vec<ModelSpec> = serde_json::from_str(json)
            .map_err(|e| NeuralError::InvalidModel(format!("model catalog: {}", e)))?;
        let mut catalog = Self::new();
        for spec in specs {
            catalog.register(spec)?;
        }
        Ok(catalog)
    }

    /// Load a JSON catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Add or replace a model after validating it.
    pub fn register(&mut self, spec: ModelSpec) -> Result<()> {
        spec.validate()?;
        self.models.insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Look up a model by id.
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.get(id)
    }

    /// All models, ordered by id.
    pub fn list(&self) -> Vec<&ModelSpec> {
        let mut models: Vec<_> = self.models.values().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    /// Number of models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_scale() {
        let spec = ModelSpec::new("x0", "Broken", "x0.onnx", 0);
        assert!(matches!(spec.validate(), Err(NeuralError::InvalidModel(_))));
        assert!(ModelSpec::new("x1", "Identity", "x1.onnx", 1).validate().is_ok());
    }

    #[test]
    fn test_validate_weights_path() {
        let spec = ModelSpec::new("x2", "No weights", "", 2);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_check_input_any() {
        let spec = ModelSpec::new("x2", "Any", "x2.onnx", 2);
        assert!(spec.check_input(64, 64).is_ok());
        assert!(spec.check_input(1, 999).is_ok());
    }

    #[test]
    fn test_check_input_forced() {
        let spec = ModelSpec::new("x2", "Fixed", "x2.onnx", 2).with_must_input(256, 256);
        assert!(spec.check_input(256, 256).is_ok());
        match spec.check_input(64, 64) {
            Err(NeuralError::DimensionMismatch { expected, actual }) => {
                assert_eq!(expected, "256x256");
                assert_eq!(actual, "64x64");
            }
            other => panic!("expected dimension mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_check_input_one_axis() {
        let spec = ModelSpec::new("x2", "Width only", "x2.onnx", 2).with_must_input(128, 0);
        assert!(spec.check_input(128, 7).is_ok());
        assert!(spec.check_input(127, 7).is_err());
    }

    #[test]
    fn test_output_dimensions() {
        let spec = ModelSpec::new("x4", "Four", "x4.onnx", 4);
        assert_eq!(spec.output_dimensions(64, 32), (256, 128));
    }

    #[test]
    fn test_categories() {
        let spec = ModelSpec::new("anime", "Anime", "anime.onnx", 2)
            .with_categories(ContentCategory::ANIMATION | ContentCategory::GAME);
        assert!(spec.supports(ContentCategory::ANIMATION));
        assert!(!spec.supports(ContentCategory::LIVE_ACTION));
    }

    #[test]
    fn test_catalog_from_json() {
        let json = r#"[
            {"id": "esr-x4", "name": "ESR x4", "weights_path": "esr.onnx", "scale": 4, "precision": "half"},
            {"id": "fixed-x2", "name": "Fixed", "weights_path": "fixed.onnx", "scale": 2,
             "must_input_width": 256, "must_input_height": 256, "precision": "mixed"}
        ]"#;
        let catalog = ModelCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("esr-x4").unwrap().precision, PrecisionClass::Half);
        assert!(catalog.get("fixed-x2").unwrap().has_forced_input());
        assert_eq!(catalog.list()[0].id, "esr-x4");
    }

    #[test]
    fn test_catalog_rejects_invalid() {
        let json = r#"[{"id": "bad", "name": "Bad", "weights_path": "bad.onnx", "scale": 0}]"#;
        assert!(ModelCatalog::from_json(json).is_err());
    }
}
