//! Runtime search façade.
//!
//! A `Searcher` owns one loaded index bundle and one embedder for the
//! lifetime of the process. `SharedSearcher` guards the expensive load with
//! one-time initialization so every caller reuses the same instance.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::Config;
use crate::knowledge::KnowledgeEntry;
use crate::retrieval::embeddings::{Embedder, EmbeddingError, FastEmbedder};
use crate::retrieval::index::IndexError;
use crate::retrieval::storage::{IndexBundle, IndexStore, StorageError};

/// Errors that can occur while loading or querying the searcher.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("index not found at {0}; run `faqbot build` first")]
    IndexNotFound(PathBuf),

    #[error("index is corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("index was built with model '{index}' but the embedder is '{embedder}'")]
    ModelMismatch { index: String, embedder: String },

    #[error("index has {index} dimensions but the embedder produces {embedder}")]
    DimensionMismatch { index: usize, embedder: usize },

    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl From<StorageError> for SearchError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(path) => SearchError::IndexNotFound(path),
            StorageError::Corrupt(msg) => SearchError::IndexCorrupt(msg),
            StorageError::Serialize(e) => SearchError::IndexCorrupt(e.to_string()),
            StorageError::Io(e) => SearchError::Io(e),
        }
    }
}

/// One ranked knowledge base hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Cosine similarity with the query
    pub score: f32,
    pub entry: KnowledgeEntry,
}

pub struct Searcher {
    embedder: Box<dyn Embedder>,
    bundle: IndexBundle,
}

impl Searcher {
    /// Load the persisted bundle and pair it with `embedder`.
    pub fn open(store: &IndexStore, embedder: Box<dyn Embedder>) -> Result<Self, SearchError> {
        let bundle = store.load()?;
        Self::from_bundle(bundle, embedder)
    }

    /// Pair an in-memory bundle with `embedder`, rejecting a model or dimension mismatch.
    pub fn from_bundle(bundle: IndexBundle, embedder: Box<dyn Embedder>) -> Result<Self, SearchError> {
        if !bundle
            .model_identifier
            .eq_ignore_ascii_case(embedder.model_id())
        {
            return Err(SearchError::ModelMismatch {
                index: bundle.model_identifier,
                embedder: embedder.model_id().to_string(),
            });
        }

        if bundle.dimensions() != embedder.dimensions() {
            return Err(SearchError::DimensionMismatch {
                index: bundle.dimensions(),
                embedder: embedder.dimensions(),
            });
        }

        Ok(Self { embedder, bundle })
    }

    /// Load the index from the configured data directory and the embedding
    /// model recorded in it.
    pub fn load(config: &Config) -> Result<Self, SearchError> {
        let store = IndexStore::new(config.data_dir());
        let bundle = store.load()?;

        if !bundle.model_identifier.eq_ignore_ascii_case(&config.model) {
            log::warn!(
                "Configured model '{}' differs from index model '{}'; using the index model. Rebuild to switch models.",
                config.model,
                bundle.model_identifier
            );
        }

        let embedder = FastEmbedder::new(&bundle.model_identifier, config.model_cache_dir())?;
        let searcher = Self::from_bundle(bundle, Box::new(embedder))?;

        log::info!(
            "Loaded {} knowledge base entries (built {})",
            searcher.len(),
            searcher.built_at().to_rfc3339()
        );
        if searcher.is_empty() {
            log::warn!("Index is empty; every query will fall back");
        }

        Ok(searcher)
    }

    /// Return up to `top_k` entries ranked by similarity to `query`, best first.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>, SearchError> {
        if self.bundle.is_empty() || top_k == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self.embedder.embed(query)?;
        let hits = self.bundle.index.search(&query_embedding, top_k)?;

        hits.into_iter()
            .map(|hit| {
                self.bundle
                    .entries
                    .get(hit.position)
                    .map(|entry| SearchResult {
                        score: hit.score,
                        entry: entry.clone(),
                    })
                    .ok_or_else(|| {
                        SearchError::IndexCorrupt(format!(
                            "vector {} has no matching entry",
                            hit.position
                        ))
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bundle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundle.is_empty()
    }

    pub fn model_identifier(&self) -> &str {
        &self.bundle.model_identifier
    }

    pub fn dimensions(&self) -> usize {
        self.bundle.dimensions()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.bundle.built_at
    }
}

type SearcherInit = Box<dyn Fn() -> Result<Searcher, SearchError> + Send + Sync>;

/// Process-wide searcher, loaded on first use and reused afterwards.
///
/// A failed load is not cached, so a later call retries (e.g. after `build`).
pub struct SharedSearcher {
    cell: OnceCell<Arc<Searcher>>,
    init: SearcherInit,
}

impl SharedSearcher {
    pub fn new<F>(init: F) -> Self
    where
        F: Fn() -> Result<Searcher, SearchError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            init: Box::new(init),
        }
    }

    pub fn from_config(config: Config) -> Self {
        Self::new(move || Searcher::load(&config))
    }

    /// Get the loaded searcher, loading it on the first call.
    pub fn get(&self) -> Result<Arc<Searcher>, SearchError> {
        if !self.is_loaded() {
            log::debug!("Loading search index");
        }
        self.cell
            .get_or_try_init(|| (self.init)().map(Arc::new))
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}
