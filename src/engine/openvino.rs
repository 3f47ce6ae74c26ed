//! OpenVINO IR backend
//!
//! Loads `.xml` IR checkpoints (the sibling `.bin` weights file is resolved
//! by the runtime). IR graphs converted from training checkpoints carry their
//! own preprocessing, so this backend defaults to raw pixel input.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{Array2, Array4};
use openvino::{CompiledModel, Core, ElementType, Shape, Tensor};
use tracing::info;

use super::backend::EmbeddingBackend;
use super::preprocess::Normalization;
use crate::config::InferenceConfig;

pub struct OpenVinoBackend {
    compiled: CompiledModel,
    embedding_dim: Option<usize>,
}

impl OpenVinoBackend {
    pub fn load(path: &Path, config: &InferenceConfig) -> Result<Self> {
        let model_path = path
            .to_str()
            .with_context(|| format!("non-UTF8 model path {:?}", path))?;

        info!("Loading OpenVINO IR model from {}", model_path);
        let start = Instant::now();

        let mut core = Core::new()?;
        let model = core.read_model_from_file(model_path, "")?;
        let compiled = core.compile_model(&model, config.device.as_str().into())?;

        info!("OpenVINO model compiled for {} in {:?}", config.device, start.elapsed());

        Ok(Self {
            compiled,
            embedding_dim: None,
        })
    }
}

impl EmbeddingBackend for OpenVinoBackend {
    fn name(&self) -> &'static str {
        "openvino"
    }

    fn default_normalization(&self) -> Normalization {
        Normalization::None
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.embedding_dim
    }

    fn embed_batch(&mut self, batch: &Array4<f32>) -> Result<Array2<f32>> {
        let (batch_size, channels, height, width) = batch.dim();

        let mut request = self.compiled.create_infer_request()?;

        let input_shape = Shape::new(&[
            batch_size as i64,
            channels as i64,
            height as i64,
            width as i64,
        ])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        // OpenVINO exposes tensor storage as raw bytes; copy the contiguous
        // NCHW data in one shot.
        let input_data = batch
            .as_slice()
            .context("batch tensor is not contiguous")?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let output = request.get_output_tensor()?;
        let output_shape = output.get_shape()?;
        let output_dims: Vec<i64> = output_shape.get_dimensions().to_vec();

        let output_len = output_dims.iter().product::<i64>() as usize;
        anyhow::ensure!(
            output_len % batch_size == 0,
            "output of {} elements does not divide into batch of {}",
            output_len,
            batch_size
        );
        let dim = output_len / batch_size;

        let output_data: Vec<f32> = unsafe {
            let ptr = output.get_raw_data()?.as_ptr() as *const f32;
            std::slice::from_raw_parts(ptr, output_len).to_vec()
        };

        self.embedding_dim = Some(dim);
        Ok(Array2::from_shape_vec((batch_size, dim), output_data)?)
    }
}
