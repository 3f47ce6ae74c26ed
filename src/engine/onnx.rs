//! ONNX Runtime backend
//!
//! Runs `.onnx` exports through the `ort` crate. Expects a single image
//! input and takes the first output as the embedding.

use std::borrow::Cow;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{Array2, Array4, Ix2};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use tracing::info;

use super::backend::EmbeddingBackend;
use super::preprocess::Normalization;
use crate::config::InferenceConfig;

pub struct OnnxBackend {
    session: Session,
    input_name: String,
    output_name: String,
    embedding_dim: Option<usize>,
}

impl OnnxBackend {
    pub fn load(path: &Path, config: &InferenceConfig) -> Result<Self> {
        info!("Loading ONNX model from {}", path.display());
        let start = Instant::now();

        // Environment init is a process-wide singleton, safe to repeat.
        let _ = ort::init().commit();

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads as usize)?
            .commit_from_file(path)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.to_string())
            .context("ONNX model declares no inputs")?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.to_string())
            .context("ONNX model declares no outputs")?;

        info!(
            "ONNX session ready in {:?} (input: {}, output: {})",
            start.elapsed(),
            input_name,
            output_name
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            embedding_dim: None,
        })
    }
}

impl EmbeddingBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn default_normalization(&self) -> Normalization {
        Normalization::Arcface
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.embedding_dim
    }

    fn embed_batch(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        use ort::session::{SessionInputValue, SessionInputs};

        let batch_size = batch.dim().0;

        let value = Value::from_array(batch.clone().into_dyn())
            .context("failed to convert batch tensor to an ort value")?;
        let inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            vec![(Cow::Borrowed(self.input_name.as_str()), value.into())];

        let outputs = self
            .session
            .run(SessionInputs::from(inputs))
            .context("ONNX Runtime inference failed")?;

        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .context("ONNX output is not an f32 tensor")?;

        let embeddings = output
            .to_owned()
            .into_dimensionality::<Ix2>()
            .context("ONNX output is not a [batch, dim] matrix")?;
        anyhow::ensure!(
            embeddings.nrows() == batch_size,
            "ONNX output has {} rows for a batch of {}",
            embeddings.nrows(),
            batch_size
        );

        self.embedding_dim = Some(embeddings.ncols());
        Ok(embeddings)
    }
}
