//! Single image upscale command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use upscale_neural::{
    BackendLoader, ElementType, ImageUpscaler, InferenceConfig, InferenceEngine, ModelCatalog,
    ModelSpec, OnnxLoader, PrecisionClass, ResampleLoader,
};

use crate::settings::{PrecisionArg, Provider};

/// Upscale one image file.
#[derive(Args, Debug)]
pub struct CmdImage {
    /// Input image (PNG or JPEG).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output image; format follows the extension.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Model catalog (JSON). Without it a bilinear preview is used.
    #[arg(long, requires = "model")]
    pub models: Option<PathBuf>,

    /// Model id from the catalog.
    #[arg(long, requires = "models")]
    pub model: Option<String>,

    /// Scale of the bilinear preview.
    #[arg(long, default_value_t = 2)]
    pub scale: u32,

    /// Override the model's precision class.
    #[arg(long, value_enum)]
    pub precision: Option<PrecisionArg>,

    /// Execution provider for ONNX models.
    #[arg(long, value_enum, default_value_t = Provider::Cpu)]
    pub provider: Provider,

    /// GPU device for CUDA.
    #[arg(long, default_value_t = 0)]
    pub device_id: u32,

    /// Output in JSON format.
    #[arg(long)]
    pub json: bool,
}

impl CmdImage {
    fn resolve_model(&self) -> anyhow::Result<(ModelSpec, Arc<dyn BackendLoader>)> {
        if let (Some(path), Some(id)) = (&self.models, &self.model) {
            let catalog = ModelCatalog::load(path)
                .with_context(|| format!("Failed to load model catalog: {}", path.display()))?;
            let spec = catalog
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Unknown model: {}", id))?;
            let config = InferenceConfig {
                execution_provider: self.provider.into(),
                device_id: self.device_id,
                ..Default::default()
            };
            return Ok((spec, Arc::new(OnnxLoader::new(config))));
        }

        let spec = ModelSpec::new(
            format!("preview-x{}", self.scale),
            format!("Bilinear preview x{}", self.scale),
            "builtin:bilinear",
            self.scale,
        );
        let element_type = match self.precision.map(PrecisionClass::from) {
            Some(PrecisionClass::Half) => ElementType::Float16,
            _ => ElementType::Float32,
        };
        Ok((spec, Arc::new(ResampleLoader::new(element_type))))
    }

    /// Execute the image command.
    pub fn run(&self) -> anyhow::Result<()> {
        let (mut spec, loader) = self.resolve_model()?;
        if let Some(precision) = self.precision {
            spec = spec.with_precision(precision.into());
        }

        let backend = loader.load(&spec)?;
        let engine = Arc::new(InferenceEngine::new(spec, backend)?);
        let precision = engine.resolve_precision()?;
        let upscaler = ImageUpscaler::new(engine.clone());

        let result = upscaler
            .upscale_file(&self.input)
            .with_context(|| format!("Failed to upscale {}", self.input.display()))?;
        let (width, height) = result.image.dimensions();
        result
            .image
            .into_rgb_image()?
            .save(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;

        if self.json {
            let output = serde_json::json!({
                "model": engine.spec().id,
                "backend": engine.backend_name(),
                "precision": precision.to_string(),
                "conversion_path": engine.codec().path().to_string(),
                "width": width,
                "height": height,
                "inference_ms": result.timings.inference.as_secs_f64() * 1000.0,
                "decode_ms": result.timings.decode.as_secs_f64() * 1000.0,
                "output": self.output.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!(
                "{} {} -> {} ({}x{}, {}, {})",
                style("Upscaled").green().bold(),
                self.input.display(),
                self.output.display(),
                width,
                height,
                precision,
                engine.backend_name()
            );
            println!(
                "  inference {:.1} ms, decode {:.1} ms",
                result.timings.inference.as_secs_f64() * 1000.0,
                result.timings.decode.as_secs_f64() * 1000.0
            );
        }

        Ok(())
    }
}
