//! Deterministic embedders that need no model files.

use async_trait::async_trait;

use ragscope_core::{Embedder, Embedding, Result};

/// A mock embedder for testing that doesn't require actual models.
///
/// Vectors are derived from a hash of the text, so equal texts always get
/// equal vectors. They carry no semantic meaning.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    /// Create a new mock embedder with the MiniLM dimension (384).
    pub fn new() -> Self {
        Self { dimension: 384 }
    }

    /// Create a mock embedder with a custom dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let hash = blake3::hash(text.as_bytes());
        let seed = u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap_or([0; 8]));

        let values: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let mixed = seed.wrapping_mul(i as u64 * 2 + 1).rotate_left((i % 64) as u32);
                (mixed % 1000) as f32 / 1000.0 - 0.5
            })
            .collect();

        Embedding::new(values).normalized()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Bag-of-keywords embedder: one dimension per keyword, counting
/// case-insensitive occurrences, plus a constant bias dimension so no text
/// maps to the zero vector.
///
/// Useful when a test needs similarity to follow shared vocabulary.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
}

impl KeywordEmbedder {
    /// Create an embedder over the given vocabulary.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }

    fn embed_text(&self, text: &str) -> Embedding {
        let lower = text.to_lowercase();
        let mut values: Vec<f32> = self
            .keywords
            .iter()
            .map(|k| lower.matches(k.as_str()).count() as f32)
            .collect();
        values.push(0.1);
        Embedding::new(values)
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.keywords.len() + 1
    }
}
