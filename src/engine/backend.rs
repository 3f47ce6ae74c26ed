//! Uniform embedding interface over the supported model runtimes

use std::path::Path;

use anyhow::Result;
use ndarray::{Array2, Array4};

use super::preprocess::Normalization;
use crate::config::Config;

/// Model file formats that can be loaded, keyed by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// OpenVINO IR (`.xml` plus sibling `.bin`)
    OpenVinoIr,
    /// ONNX graph (`.onnx`)
    Onnx,
    /// Native Candle weights (`.safetensors`)
    Safetensors,
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::OpenVinoIr => "openvino",
            ModelFormat::Onnx => "onnx",
            ModelFormat::Safetensors => "candle",
        }
    }

    /// Detect the format from the model file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "xml" => Ok(ModelFormat::OpenVinoIr),
            "onnx" => Ok(ModelFormat::Onnx),
            "safetensors" => Ok(ModelFormat::Safetensors),
            _ => anyhow::bail!(
                "unsupported model file {:?}: expected .xml (OpenVINO IR), .onnx or .safetensors",
                path
            ),
        }
    }
}

/// A loaded embedding model.
///
/// Implementations wrap one inference runtime each and normalize its API to
/// a single batched call: NCHW image batch in, one embedding row per image out.
pub trait EmbeddingBackend {
    /// Short runtime name for logging
    fn name(&self) -> &'static str;

    /// Pixel normalization this backend expects when the config says `auto`
    fn default_normalization(&self) -> Normalization;

    /// Embedding dimensionality, once known. Backends with static model
    /// metadata report it at load time; others after the first forward pass.
    fn embedding_dim(&self) -> Option<usize>;

    /// Run the model on a `[batch, 3, H, W]` tensor, returning `[batch, dim]`
    fn embed_batch(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>>;
}

/// Load the backend matching the model file's format
pub fn load_backend(path: &Path, config: &Config) -> Result<Box<dyn EmbeddingBackend>> {
    match ModelFormat::from_path(path)? {
        ModelFormat::OpenVinoIr => Ok(Box::new(super::openvino::OpenVinoBackend::load(
            path,
            &config.inference,
        )?)),
        ModelFormat::Onnx => Ok(Box::new(super::onnx::OnnxBackend::load(
            path,
            &config.inference,
        )?)),
        ModelFormat::Safetensors => Ok(Box::new(super::candle::CandleBackend::load(
            path, config,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(
            ModelFormat::from_path(Path::new("models/glint360k_r100.xml")).unwrap(),
            ModelFormat::OpenVinoIr
        );
        assert_eq!(
            ModelFormat::from_path(Path::new("models/w600k_r50.onnx")).unwrap(),
            ModelFormat::Onnx
        );
        assert_eq!(
            ModelFormat::from_path(Path::new("models/r100.safetensors")).unwrap(),
            ModelFormat::Safetensors
        );
    }

    #[test]
    fn test_format_detection_case_insensitive() {
        assert_eq!(
            ModelFormat::from_path(Path::new("MODEL.ONNX")).unwrap(),
            ModelFormat::Onnx
        );
    }

    #[test]
    fn test_unknown_format_rejected() {
        assert!(ModelFormat::from_path(Path::new("model.h5")).is_err());
        assert!(ModelFormat::from_path(Path::new("model")).is_err());
    }
}
