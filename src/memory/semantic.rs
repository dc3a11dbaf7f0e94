//! Sentence-embedding provider backed by fastembed (all-MiniLM-L6-v2).
//!
//! The model is fetched into fastembed's cache on first use.

use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::debug;

use crate::error::MemoryError;
use crate::memory::embedding::EmbeddingProvider;

const MODEL_NAME: &str = "all-MiniLM-L6-v2";
const MODEL_DIMENSIONS: usize = 384;

/// Dense sentence embeddings from a local ONNX model.
pub struct FastEmbedder {
    /// `embed` needs `&mut`, the trait only gives `&self`.
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    /// Load the model, downloading it if it is not cached yet.
    pub fn load() -> Result<Self, MemoryError> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| MemoryError::ModelLoadFailed {
            model: MODEL_NAME.to_string(),
            reason: e.to_string(),
        })?;

        debug!(model = MODEL_NAME, dims = MODEL_DIMENSIONS, "Embedding model loaded");
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl EmbeddingProvider for FastEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut model = self.model.lock().map_err(|e| MemoryError::EmbeddingFailed {
            reason: format!("model lock poisoned: {e}"),
        })?;

        model
            .embed(vec![text], None)
            .map_err(|e| MemoryError::EmbeddingFailed {
                reason: e.to_string(),
            })?
            .pop()
            .ok_or_else(|| MemoryError::EmbeddingFailed {
                reason: "model returned no embedding".to_string(),
            })
    }

    fn dimensions(&self) -> usize {
        MODEL_DIMENSIONS
    }

    fn name(&self) -> &str {
        MODEL_NAME
    }
}
