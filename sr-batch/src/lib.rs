//! crate: `sr-batch` flattens one sampled window into a training batch and persists it.
//!
//! Files are `batch_{idx:06}.safetensors` with a `batch_{idx:06}.meta.json` sidecar.

use thiserror::Error;

pub mod batch;
pub mod schema;
pub mod writer;

pub use batch::{ObsData, ObsTensor, RolloutBuffers, TrainingBatch};
pub use writer::{cleanup_tmp_files, BatchMeta, BatchWriter, BatchWriterConfig, ObsComponentMeta};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("safetensors: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),
    #[error("batch shape: {0}")]
    Shape(String),
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod writer_tests;
