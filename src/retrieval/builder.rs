//! Offline index build: knowledge base in, persisted bundle out.

use std::path::Path;

use chrono::Utc;

use crate::knowledge::{KnowledgeBase, KnowledgeError};
use crate::lock::BuildLock;
use crate::retrieval::embeddings::{Embedder, EmbeddingError};
use crate::retrieval::index::{FlatIndex, IndexError};
use crate::retrieval::storage::{IndexBundle, IndexStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Knowledge base error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Could not lock data directory: {0}")]
    Locked(std::io::Error),
}

pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self { embedder }
    }

    /// Embed every question and assemble the bundle. Nothing is written.
    pub fn build(&self, kb: &KnowledgeBase) -> Result<IndexBundle, BuildError> {
        let questions = kb.questions();
        let vectors = self.embedder.embed_many(&questions)?;

        if vectors.len() != questions.len() {
            return Err(EmbeddingError::Encoding(format!(
                "embedded {} of {} questions",
                vectors.len(),
                questions.len()
            ))
            .into());
        }

        let index = FlatIndex::from_vectors(self.embedder.dimensions(), vectors)?;
        Ok(IndexBundle {
            model_identifier: self.embedder.model_id().to_string(),
            built_at: Utc::now(),
            columns: kb.columns().to_vec(),
            entries: kb.entries().to_vec(),
            index,
        })
    }

    /// Read the CSV at `kb_path`, then build and persist its index.
    ///
    /// A table that fails validation writes nothing and leaves any existing
    /// index untouched.
    pub fn build_from_csv(
        &self,
        kb_path: &Path,
        store: &IndexStore,
    ) -> Result<IndexBundle, BuildError> {
        let kb = KnowledgeBase::from_csv_path(kb_path)?;
        log::info!("Read {} entries from {}", kb.len(), kb_path.display());
        if kb.is_empty() {
            log::warn!("Knowledge base has no entries; every query will fall back");
        }

        self.build_and_save(&kb, store)
    }

    /// Build and persist, replacing whatever bundle `store` held before.
    pub fn build_and_save(
        &self,
        kb: &KnowledgeBase,
        store: &IndexStore,
    ) -> Result<IndexBundle, BuildError> {
        let bundle = self.build(kb)?;

        std::fs::create_dir_all(store.dir()).map_err(StorageError::from)?;
        let _lock = BuildLock::try_acquire(store.dir()).map_err(BuildError::Locked)?;

        if store.exists() {
            log::info!("Replacing existing index in {}", store.dir().display());
        }

        store.save(&bundle)?;

        log::info!(
            "Built index with {} entries ({} dims, model '{}')",
            bundle.len(),
            bundle.dimensions(),
            bundle.model_identifier
        );
        log::info!("Saved index -> {}", store.vectors_path().display());
        log::info!("Saved metadata -> {}", store.meta_path().display());

        Ok(bundle)
    }
}
