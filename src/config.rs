//! Embedding extraction configuration

use serde::Deserialize;

use crate::engine::preprocess::{ChannelOrder, Normalization, EMBEDDER_INPUT_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub inference: InferenceConfig,
    pub preprocess: PreprocessConfig,
    pub extract: ExtractConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub device: String,
    pub num_threads: u32,
    pub arch: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    pub input_size: u32,
    pub normalization: Normalization,
    pub channel_order: ChannelOrder,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    pub batch_size: usize,
    pub l2_normalize: bool,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inference: InferenceConfig {
                device: "CPU".to_string(),
                num_threads: 4,
                arch: "r100".to_string(),
            },
            preprocess: PreprocessConfig {
                input_size: EMBEDDER_INPUT_SIZE,
                normalization: Normalization::Auto,
                channel_order: ChannelOrder::Rgb,
            },
            extract: ExtractConfig {
                batch_size: 256,
                l2_normalize: false,
            },
        }
    }
}
