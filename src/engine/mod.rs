//! Inference engine module
//!
//! Three model runtimes behind one batched embedding interface:
//! - OpenVINO IR (`.xml`)
//! - ONNX Runtime (`.onnx`)
//! - Candle with native IResNet weights (`.safetensors`)

pub mod backend;
pub mod candle;
pub mod onnx;
pub mod openvino;
pub mod preprocess;

pub use backend::{load_backend, EmbeddingBackend, ModelFormat};
