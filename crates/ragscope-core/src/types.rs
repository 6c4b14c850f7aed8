//! Core domain types for the retrieval system.

use serde::{Deserialize, Serialize};

/// Smallest window size the chunker will produce.
pub const MIN_CHUNK_SIZE: usize = 10;

/// A document in the corpus, identified by its filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Filename, unique within a corpus.
    pub id: String,

    /// Raw text content.
    pub content: String,

    /// Blake3 hash of the content (hex).
    pub content_hash: String,

    /// Length of the content in chars.
    pub char_len: usize,
}

impl Document {
    /// Create a new document.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        let char_len = content.chars().count();

        Self {
            id: id.into(),
            content,
            content_hash,
            char_len,
        }
    }
}

/// A window of a document, the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Parent document id (filename).
    pub doc_id: String,

    /// Index within the document (0-based).
    pub chunk_index: u32,

    /// Chunk text content.
    pub content: String,

    /// Start offset in the source, in chars.
    pub start: usize,

    /// End offset in the source (exclusive), in chars.
    pub end: usize,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(
        doc_id: impl Into<String>,
        chunk_index: u32,
        content: impl Into<String>,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            chunk_index,
            content: content.into(),
            start,
            end,
        }
    }
}

/// Window size and overlap, clamped to values that always make progress.
///
/// Invalid inputs are never rejected:
/// - `chunk_size` below [`MIN_CHUNK_SIZE`] becomes [`MIN_CHUNK_SIZE`]
/// - negative `overlap` becomes 0
/// - `overlap >= chunk_size` becomes `chunk_size - 1`
///
/// Two requests that clamp to the same pair share one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawChunkParams")]
pub struct ChunkParams {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkParams {
    /// Clamp raw values into valid parameters.
    pub fn new(chunk_size: i64, overlap: i64) -> Self {
        let chunk_size = usize::try_from(chunk_size)
            .unwrap_or(0)
            .max(MIN_CHUNK_SIZE);
        let overlap = usize::try_from(overlap)
            .unwrap_or(0)
            .min(chunk_size - 1);

        Self {
            chunk_size,
            overlap,
        }
    }

    /// Window size in chars.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Overlap between consecutive windows in chars.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts. Always at least 1.
    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self::new(120, 30)
    }
}

/// Unclamped wire form, so deserialized values go through [`ChunkParams::new`].
#[derive(Deserialize)]
struct RawChunkParams {
    chunk_size: i64,
    overlap: i64,
}

impl From<RawChunkParams> for ChunkParams {
    fn from(raw: RawChunkParams) -> Self {
        Self::new(raw.chunk_size, raw.overlap)
    }
}

impl std::fmt::Display for ChunkParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "size={} overlap={}", self.chunk_size, self.overlap)
    }
}

/// Statistics about a loaded corpus and one of its indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    /// Number of documents loaded.
    pub documents: u64,

    /// Number of files skipped during load.
    pub skipped: u64,

    /// Number of chunks in the index.
    pub chunks: u64,

    /// Embedding dimension.
    pub dimension: usize,

    /// Chunking used to build the index.
    pub params: ChunkParams,
}
