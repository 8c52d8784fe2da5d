//! Embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for generating embeddings:
//! - One-time model loading with configurable cache directory
//! - Batch embedding generation with input order preserved
//! - L2 normalization, so inner product equals cosine similarity

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Maps text to fixed-dimension, unit-norm vectors.
pub trait Embedder: Send + Sync {
    /// Identifier of the underlying model, persisted alongside the index.
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed many texts; output is one-to-one with input order.
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
    dimensions: usize,
}

impl FastEmbedder {
    /// Load the named model, downloading it into `cache_dir/models` on first use.
    ///
    /// # Arguments
    /// * `model_id` - Model identifier (e.g., "sentence-transformers/all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    pub fn new(model_id: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_id)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::ModelLoad(format!("Failed to create models directory: {}", e))
        })?;

        log::info!("Loading embedding model '{}'", model_id);

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::ModelLoad(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        log::debug!("Model '{}' produces {}-dim embeddings", model_id, dimensions);

        Ok(Self {
            model: Mutex::new(model),
            model_id: model_id.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    ///
    /// Accepts hub-style names with an organization prefix
    /// (`sentence-transformers/all-MiniLM-L6-v2`, `BAAI/bge-small-en-v1.5`).
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        let lowered = name.trim().to_lowercase();
        let short = lowered.rsplit('/').next().unwrap_or(lowered.as_str());

        match short {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            _ => Err(EmbeddingError::ModelLoad(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::ModelLoad(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::ModelLoad("Model returned no embedding".to_string()))
    }
}

impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::Encoding(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::Encoding(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(l2_normalize)
            .ok_or_else(|| EmbeddingError::Encoding("No embedding returned".to_string()))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::Encoding(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::Encoding(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::Encoding(format!(
                "Expected {} embeddings, model returned {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(embeddings.into_iter().map(l2_normalize).collect())
    }
}

/// Scale a vector to unit Euclidean norm. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}
