//! Core traits defining the interfaces between components.

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::types::ChunkParams;
use crate::vector::Embedding;

/// Embedding model trait.
///
/// Implementations must be deterministic for a fixed model: the same text
/// always maps to the same vector. Ranking reproducibility depends on it.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of document texts. The output is index-aligned with
    /// `texts`.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>>;

    /// Embed a single query text.
    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    /// Force any lazy model loading to happen now.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Chunking strategy trait.
pub trait Chunker: Send + Sync {
    /// Split text into windows. Never fails: parameters are already clamped.
    fn chunk(&self, content: &str, params: ChunkParams) -> Vec<ChunkSpan>;
}

/// Raw chunk data before it is attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Chunk text content.
    pub content: String,

    /// Start offset in chars.
    pub start: usize,

    /// End offset in chars (exclusive).
    pub end: usize,
}

/// Answer generation boundary: `(query, context) -> answer`.
///
/// Typically a remote language model. May be slow; callers decide whether to
/// invoke it at all.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer to `query` grounded in `context`.
    async fn generate(&self, query: &str, context: &str) -> Result<String>;
}
