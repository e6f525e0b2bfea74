//! Sentence-embedding engine shared by every matching job.
//!
//! The engine only turns normalized text into raw vectors. Unit-length
//! normalization happens in Stage 1 retrieval.

use std::sync::{Arc, Mutex};

use fastembed::TextEmbedding;
use thiserror::Error;

pub mod archive;
pub mod loader;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("failed to load embedding model from {source_name}: {reason}")]
    LoadFailed { source_name: String, reason: String },
    #[error("embedding inference failed: {0}")]
    InferenceFailed(String),
    #[error("embedder returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Something that maps text to dense vectors, one per input, in order.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;
}

/// [`TextEmbedder`] backed by a loaded fastembed model.
///
/// fastembed needs exclusive access while running inference, so calls are
/// serialized through a mutex.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastEmbedder {
    pub fn new(model: TextEmbedding) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }
}

impl TextEmbedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::InferenceFailed("model mutex poisoned".to_string()))?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|error| EmbeddingError::InferenceFailed(format!("{error:?}")))
    }
}

/// Thin wrapper exposing single and batched embedding over one shared model.
#[derive(Clone)]
pub struct EmbeddingEngine {
    embedder: Arc<dyn TextEmbedder>,
}

impl EmbeddingEngine {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { embedder }
    }

    pub fn embed_one(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_many(&[text.to_string()])?
            .pop()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })
    }

    /// Embeds `texts` in a single batch, preserving input order.
    pub fn embed_many(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed(texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        Ok(vectors)
    }
}
