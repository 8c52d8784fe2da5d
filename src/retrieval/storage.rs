//! Persistence of the index bundle as two artifacts in the data directory.
//!
//! File format: vectors.bin
//!
//! Header (49 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model identifier)
//! - dimensions: u32 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Body:
//! - embeddings: [f32; entry_count * dimensions] (little-endian, row-major)
//! - checksum: u32 (CRC32 of the embedding bytes)
//!
//! File format: meta.json
//!
//! `{model_identifier, dimensions, built_at, vectors_sha256, columns, rows}`;
//! row `i` belongs to vector `i`. `vectors_sha256` is the digest of the
//! vectors.bin written by the same build, so a metadata file is only ever
//! accepted next to its own vectors.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::knowledge::KnowledgeEntry;
use crate::retrieval::index::FlatIndex;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(4) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 49;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const META_FILE: &str = "meta.json";

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("index not found at {0}; run `faqbot build` first")]
    NotFound(PathBuf),

    #[error("index is corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Everything needed to answer queries: rows, their vectors, and the model
/// that produced them.
#[derive(Debug, Clone)]
pub struct IndexBundle {
    pub model_identifier: String,
    pub built_at: DateTime<Utc>,
    pub columns: Vec<String>,
    pub entries: Vec<KnowledgeEntry>,
    pub index: FlatIndex,
}

impl IndexBundle {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.index.dimensions()
    }
}

#[derive(Serialize, Deserialize)]
struct Metadata {
    model_identifier: String,
    dimensions: usize,
    built_at: DateTime<Utc>,
    vectors_sha256: String,
    #[serde(default)]
    columns: Vec<String>,
    rows: Vec<KnowledgeEntry>,
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u32,
    entry_count: u64,
}

/// Storage manager for the index bundle.
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Check if both artifacts exist.
    pub fn exists(&self) -> bool {
        self.vectors_path().exists() && self.meta_path().exists()
    }

    /// Save the bundle, replacing any previous one.
    ///
    /// Each artifact is written to a temp file in the data directory, synced,
    /// then renamed over the old file. Vectors go first, metadata last.
    pub fn save(&self, bundle: &IndexBundle) -> Result<(), StorageError> {
        if bundle.index.len() != bundle.entries.len() {
            return Err(StorageError::Corrupt(format!(
                "refusing to save {} vectors for {} entries",
                bundle.index.len(),
                bundle.entries.len()
            )));
        }

        std::fs::create_dir_all(&self.dir)?;

        let vectors = encode_vectors(&bundle.index, &model_id_hash(&bundle.model_identifier));
        self.write_atomic(&self.vectors_path(), |writer| {
            writer.write_all(&vectors)?;
            Ok(())
        })?;

        let meta = Metadata {
            model_identifier: bundle.model_identifier.clone(),
            dimensions: bundle.index.dimensions(),
            built_at: bundle.built_at,
            vectors_sha256: sha256_hex(&vectors),
            columns: bundle.columns.clone(),
            rows: bundle.entries.clone(),
        };
        self.write_atomic(&self.meta_path(), |writer| {
            serde_json::to_writer_pretty(&mut *writer, &meta)?;
            writer.write_all(b"\n")?;
            Ok(())
        })?;

        Ok(())
    }

    /// Load and cross-check both artifacts.
    pub fn load(&self) -> Result<IndexBundle, StorageError> {
        let meta_path = self.meta_path();
        let vectors_path = self.vectors_path();

        for path in [&meta_path, &vectors_path] {
            if !path.exists() {
                return Err(StorageError::NotFound(path.clone()));
            }
        }

        let meta_bytes = std::fs::read(&meta_path)?;
        let meta: Metadata = serde_json::from_slice(&meta_bytes)
            .map_err(|e| StorageError::Corrupt(format!("{}: {}", META_FILE, e)))?;

        let vector_bytes = std::fs::read(&vectors_path)?;
        let (header, index) = decode_vectors(&vector_bytes)?;

        if sha256_hex(&vector_bytes) != meta.vectors_sha256 {
            return Err(StorageError::Corrupt(format!(
                "{} does not belong to {}; rebuild the index",
                VECTORS_FILE, META_FILE
            )));
        }

        if header.model_id != model_id_hash(&meta.model_identifier) {
            return Err(StorageError::Corrupt(format!(
                "{} was built with a different model than {} ({})",
                VECTORS_FILE, META_FILE, meta.model_identifier
            )));
        }

        if header.dimensions as usize != meta.dimensions {
            return Err(StorageError::Corrupt(format!(
                "dimension mismatch: {} has {}, {} has {}",
                VECTORS_FILE, header.dimensions, META_FILE, meta.dimensions
            )));
        }

        if header.entry_count != meta.rows.len() as u64 || index.len() != meta.rows.len() {
            return Err(StorageError::Corrupt(format!(
                "entry count mismatch: {} has {}, {} has {}",
                VECTORS_FILE,
                index.len(),
                META_FILE,
                meta.rows.len()
            )));
        }

        log::debug!(
            "Loaded {} vectors (version {}, {} dims) from {}",
            index.len(),
            header.version,
            index.dimensions(),
            self.dir.display()
        );

        Ok(IndexBundle {
            model_identifier: meta.model_identifier,
            built_at: meta.built_at,
            columns: meta.columns,
            entries: meta.rows,
            index,
        })
    }

    fn write_atomic<F>(&self, path: &Path, write: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut BufWriter<&File>) -> Result<(), StorageError>,
    {
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            write(&mut writer)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }
}

/// SHA256 of the model identifier, stored in the vector header.
pub fn model_id_hash(model_identifier: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(model_identifier.as_bytes());
    hasher.finalize().into()
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn encode_vectors(index: &FlatIndex, model_id: &[u8; 32]) -> Vec<u8> {
    let flat = index.as_flat();
    let mut bytes = Vec::with_capacity(HEADER_SIZE + flat.len() * 4 + 4);

    bytes.push(FORMAT_VERSION);
    bytes.extend_from_slice(model_id);
    bytes.extend_from_slice(&(index.dimensions() as u32).to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    let header_checksum = crc32fast::hash(&bytes[0..HEADER_SIZE - 4]);
    bytes.extend_from_slice(&header_checksum.to_le_bytes());

    for &value in flat {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    let body_checksum = crc32fast::hash(&bytes[HEADER_SIZE..]);
    bytes.extend_from_slice(&body_checksum.to_le_bytes());

    bytes
}

fn decode_vectors(bytes: &[u8]) -> Result<(Header, FlatIndex), StorageError> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(StorageError::Corrupt(format!(
            "{} is truncated ({} bytes)",
            VECTORS_FILE,
            bytes.len()
        )));
    }

    let version = bytes[0];
    if version != FORMAT_VERSION {
        return Err(StorageError::Corrupt(format!(
            "unsupported {} version {}, expected {}",
            VECTORS_FILE, version, FORMAT_VERSION
        )));
    }

    let stored_checksum = read_u32(&bytes[45..49]);
    if stored_checksum != crc32fast::hash(&bytes[0..45]) {
        return Err(StorageError::Corrupt(format!(
            "{} header checksum mismatch",
            VECTORS_FILE
        )));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&bytes[1..33]);
    let dimensions = read_u32(&bytes[33..37]);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[37..45]);
    let entry_count = u64::from_le_bytes(count_bytes);

    if dimensions == 0 && entry_count > 0 {
        return Err(StorageError::Corrupt(format!(
            "{} declares {} zero-dimension vectors",
            VECTORS_FILE, entry_count
        )));
    }

    let body = &bytes[HEADER_SIZE..bytes.len() - 4];
    let expected_len = (entry_count as u128) * (dimensions as u128) * 4;
    if body.len() as u128 != expected_len {
        return Err(StorageError::Corrupt(format!(
            "{} body has {} bytes, header promises {}",
            VECTORS_FILE,
            body.len(),
            expected_len
        )));
    }

    let body_checksum = read_u32(&bytes[bytes.len() - 4..]);
    if body_checksum != crc32fast::hash(body) {
        return Err(StorageError::Corrupt(format!(
            "{} body checksum mismatch",
            VECTORS_FILE
        )));
    }

    let data = body
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    let index = FlatIndex::from_flat(dimensions as usize, data)
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;

    Ok((
        Header {
            version,
            model_id,
            dimensions,
            entry_count,
        },
        index,
    ))
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
