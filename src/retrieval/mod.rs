//! Retrieval core: embeddings, exact vector search, persistence, and the
//! confidence policy that routes between the knowledge base and fallback.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed for normalized embedding generation
//! - `index`: Flat in-memory vector index with exact inner-product search
//! - `storage`: vectors.bin + meta.json persistence
//! - `builder`: Offline knowledge base → index bundle build
//! - `searcher`: Load-once search façade
//! - `policy`: Top-1 threshold decision

pub mod builder;
pub mod embeddings;
pub mod index;
pub mod policy;
pub mod searcher;
pub mod storage;

pub use builder::{BuildError, IndexBuilder};
pub use embeddings::{l2_normalize, Embedder, EmbeddingError, FastEmbedder};
pub use index::{FlatIndex, Hit, IndexError};
pub use policy::{decide, Decision};
pub use searcher::{SearchError, SearchResult, Searcher, SharedSearcher};
pub use storage::{IndexBundle, IndexStore, StorageError};
