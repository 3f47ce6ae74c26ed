//! Face Embedding Extraction Tool
//!
//! Extracts face embeddings from a folder-per-class image dataset with one
//! of the supported model backends (OpenVINO IR / ONNX Runtime / Candle) and
//! saves the `(image_names, image_classes, embeddings)` arrays to a
//! compressed NPZ archive.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use roembed::archive;
use roembed::config::Config;
use roembed::dataset::FolderDataset;
use roembed::engine;
use roembed::extract;

#[derive(Parser)]
#[command(name = "roembed")]
#[command(about = "Extract face embeddings from an image dataset into an NPZ archive", long_about = None)]
struct Cli {
    /// Model file path: .xml (OpenVINO IR), .onnx or .safetensors
    #[arg(short = 'M', long)]
    model_file: PathBuf,

    /// Dataset directory (one subdirectory per identity class)
    #[arg(short = 'D', long)]
    data_path: PathBuf,

    /// Destination archive path (default: derived from the dataset name and
    /// embedding dimension)
    #[arg(short = 'd', long)]
    dest_file: Option<String>,

    /// Batch size
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// Test parameter, convert only the first [NUM] images (-1 = unlimited)
    #[arg(short = 'L', long, allow_hyphen_values = true)]
    limit: Option<i64>,

    /// TOML config file (default: config.toml if present)
    #[arg(short = 'c', long)]
    config: Option<String>,
}

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    info!("Starting embedding extraction v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration; an explicitly given config file must parse
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load(Config::default_path()).unwrap_or_else(|e| {
            info!("Using default config ({})", e);
            Config::default()
        }),
    };
    if let Some(batch_size) = cli.batch_size {
        config.extract.batch_size = batch_size;
    }

    info!("Configuration:");
    info!("  Device: {}", config.inference.device);
    info!("  Input size: {}", config.preprocess.input_size);
    info!("  Batch size: {}", config.extract.batch_size);

    // Scan the dataset
    let mut dataset = FolderDataset::scan(&cli.data_path)?;
    info!(
        "Image length: {}, classes: {}",
        dataset.len(),
        dataset.num_classes()
    );

    let limit = cli.limit.unwrap_or(-1);
    if limit > 0 {
        dataset.truncate(limit);
        info!("Limited to the first {} images", dataset.len());
    }

    // Load the model backend
    let start = Instant::now();
    let mut backend = engine::load_backend(&cli.model_file, &config)?;
    info!("Backend {} ready in {:?}", backend.name(), start.elapsed());

    // Extract embeddings
    let set = extract::extract(&dataset, backend.as_mut(), &config)?;

    // Save to npz
    let dest = archive::resolve_dest_file(
        cli.dest_file.as_deref(),
        dataset.source(),
        set.embedding_dim(),
    );
    set.save(Path::new(&dest))?;
    info!("Output: {}", dest);

    Ok(())
}
