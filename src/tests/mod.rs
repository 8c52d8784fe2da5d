mod assistant;

use crate::knowledge::{KnowledgeBase, KnowledgeEntry};
use crate::retrieval::{l2_normalize, Embedder, EmbeddingError, IndexBuilder, IndexStore};

pub const TEST_MODEL: &str = "test/hashed-words";
const TEST_DIMENSIONS: usize = 1024;

/// Words that carry no meaning for the hashed bag-of-words embedder.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "do", "does", "i", "how", "what", "s", "is", "my", "to", "of", "can",
];

/// Deterministic, model-free embedder: each non-stopword token bumps one
/// slot picked by the high half of its FNV-1a hash, then the vector is
/// L2-normalized.
pub struct HashedWordsEmbedder {
    model_id: String,
    dimensions: usize,
}

impl HashedWordsEmbedder {
    pub fn new() -> Self {
        Self::with_model(TEST_MODEL, TEST_DIMENSIONS)
    }

    pub fn with_model(model_id: &str, dimensions: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimensions,
        }
    }

    fn slot(&self, token: &str) -> usize {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        ((hash >> 32) % self.dimensions as u64) as usize
    }
}

impl Embedder for HashedWordsEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut v = vec![0.0; self.dimensions];
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty() && !STOPWORDS.contains(t))
            .for_each(|t| v[self.slot(t)] += 1.0);
        Ok(l2_normalize(v))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Embedder whose inference always fails.
pub struct BrokenEmbedder;

impl Embedder for BrokenEmbedder {
    fn model_id(&self) -> &str {
        TEST_MODEL
    }

    fn dimensions(&self) -> usize {
        TEST_DIMENSIONS
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Encoding("inference backend unavailable".to_string()))
    }

    fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Encoding("inference backend unavailable".to_string()))
    }
}

pub fn knowledge_base(pairs: &[(&str, &str)]) -> KnowledgeBase {
    KnowledgeBase::from_entries(
        vec!["question".to_string(), "answer".to_string()],
        pairs.iter().map(|(q, a)| KnowledgeEntry::new(q, a)).collect(),
    )
}

/// Build and persist an index for `pairs` into a fresh temp data directory.
pub fn build_store(pairs: &[(&str, &str)]) -> (IndexStore, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let store = IndexStore::new(tmp.path().join("data"));

    IndexBuilder::new(&HashedWordsEmbedder::new())
        .build_and_save(&knowledge_base(pairs), &store)
        .expect("failed to build index");

    (store, tmp)
}

pub const FAQ: &[(&str, &str)] = &[
    ("How do I get a refund?", "Contact support within 30 days."),
    ("Where is my order?", "Use the tracking link in your confirmation email."),
    ("How long does shipping take?", "Standard shipping takes 3-5 business days."),
    ("Can I change my delivery address?", "Yes, before the order ships."),
    ("Do you ship internationally?", "We ship to over 40 countries."),
];
