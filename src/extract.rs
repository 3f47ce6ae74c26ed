//! Batch embedding extraction driver
//!
//! Streams dataset records in order, batch by batch: load and preprocess the
//! images, run the backend, append to the growing result arrays.

use anyhow::{Context, Result};
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use tracing::debug;

use crate::archive::EmbeddingSet;
use crate::config::Config;
use crate::dataset::FolderDataset;
use crate::engine::preprocess;
use crate::engine::EmbeddingBackend;
use crate::utils::math::l2_normalize;

/// Run the full dataset through the backend and collect the results.
///
/// The output arrays are ordered exactly like `dataset.records()`; the
/// embedding dimensionality must not change between batches.
pub fn extract(
    dataset: &FolderDataset,
    backend: &mut dyn EmbeddingBackend,
    config: &Config,
) -> Result<EmbeddingSet> {
    anyhow::ensure!(
        !dataset.is_empty(),
        "no images found under the dataset path"
    );

    let norm = config
        .preprocess
        .normalization
        .resolve(backend.default_normalization());
    let size = config.preprocess.input_size;
    let batch_size = config.extract.batch_size.max(1);
    let num_batches = dataset.len().div_ceil(batch_size);

    let pb = ProgressBar::new(num_batches as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap(),
    );
    pb.set_message("Embedding");

    let mut image_names = Vec::with_capacity(dataset.len());
    let mut image_classes = Vec::with_capacity(dataset.len());
    let mut rows: Vec<f32> = Vec::new();
    let mut dim: Option<usize> = None;

    for chunk in dataset.records().chunks(batch_size) {
        let images: Vec<DynamicImage> = chunk
            .iter()
            .map(|r| {
                preprocess::load_image(&r.path)
                    .with_context(|| format!("failed to load image {:?}", r.path))
            })
            .collect::<Result<_>>()?;

        let batch = preprocess::batch_to_tensor(&images, size, config.preprocess.channel_order, norm);
        let embeddings = backend.embed_batch(&batch)?;

        anyhow::ensure!(
            embeddings.nrows() == chunk.len(),
            "backend returned {} embeddings for a batch of {}",
            embeddings.nrows(),
            chunk.len()
        );
        match dim {
            None => {
                anyhow::ensure!(embeddings.ncols() > 0, "backend returned empty embeddings");
                dim = Some(embeddings.ncols());
                debug!("Embedding dimension: {}", embeddings.ncols());
            }
            Some(d) => anyhow::ensure!(
                embeddings.ncols() == d,
                "embedding dimension changed mid-run: {} != {}",
                embeddings.ncols(),
                d
            ),
        }

        image_names.extend(chunk.iter().map(|r| r.name.clone()));
        image_classes.extend(chunk.iter().map(|r| r.label));
        rows.extend(embeddings.iter().copied());
        pb.inc(1);
    }

    pb.finish();

    let dim = dim.context("no batches were processed")?;

    if config.extract.l2_normalize {
        for row in rows.chunks_exact_mut(dim) {
            l2_normalize(row);
        }
    }

    let embeddings = Array2::from_shape_vec((image_names.len(), dim), rows)?;

    Ok(EmbeddingSet {
        image_names,
        image_classes,
        embeddings,
    })
}
