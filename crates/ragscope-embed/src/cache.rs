//! Memoizing wrapper around an embedder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use ragscope_core::{Embedder, Embedding, RagError, Result};

/// Default number of entries kept per role.
const DEFAULT_CAPACITY: usize = 100_000;

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Caches embeddings by the blake3 hash of their text.
///
/// Document and query embeddings are cached separately, since an asymmetric
/// model embeds the same text differently in each role. Only misses reach the
/// inner embedder, in one batch per call. Once a role holds `capacity`
/// entries, new vectors are returned but not stored.
///
/// Locks are never held across the inner embedder call.
pub struct CachingEmbedder<E> {
    inner: E,
    documents: RwLock<HashMap<blake3::Hash, Embedding>>,
    queries: RwLock<HashMap<blake3::Hash, Embedding>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<E: Embedder> CachingEmbedder<E> {
    /// Wrap an embedder with the default capacity.
    pub fn new(inner: E) -> Self {
        Self::with_capacity(inner, DEFAULT_CAPACITY)
    }

    /// Wrap an embedder, storing at most `capacity` entries per role.
    pub fn with_capacity(inner: E, capacity: usize) -> Self {
        Self {
            inner,
            documents: RwLock::new(HashMap::new()),
            queries: RwLock::new(HashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped embedder.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let entries = self.documents.read().map(|m| m.len()).unwrap_or(0)
            + self.queries.read().map(|m| m.len()).unwrap_or(0);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
        }
    }

    fn store(&self, map: &RwLock<HashMap<blake3::Hash, Embedding>>, entries: Vec<(blake3::Hash, Embedding)>) -> Result<()> {
        let mut map = map
            .write()
            .map_err(|e| RagError::internal(format!("Embedding cache poisoned: {}", e)))?;
        for (key, embedding) in entries {
            if map.len() >= self.capacity {
                break;
            }
            map.insert(key, embedding);
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachingEmbedder<E> {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let keys: Vec<blake3::Hash> = texts.iter().map(|t| blake3::hash(t.as_bytes())).collect();
        let mut results: Vec<Option<Embedding>> = Vec::with_capacity(texts.len());

        // Unique texts not in the cache, in first-seen order
        let mut missing: Vec<(blake3::Hash, &str)> = Vec::new();
        {
            let cache = self
                .documents
                .read()
                .map_err(|e| RagError::internal(format!("Embedding cache poisoned: {}", e)))?;
            for (key, text) in keys.iter().zip(texts) {
                match cache.get(key) {
                    Some(embedding) => results.push(Some(embedding.clone())),
                    None => {
                        if !missing.iter().any(|(k, _)| k == key) {
                            missing.push((*key, text));
                        }
                        results.push(None);
                    }
                }
            }
        }

        self.hits
            .fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if missing.is_empty() {
            return Ok(results.into_iter().flatten().collect());
        }

        debug!(
            "Embedding cache: {} of {} texts need embedding",
            missing.len(),
            texts.len()
        );

        let missing_texts: Vec<&str> = missing.iter().map(|(_, t)| *t).collect();
        let fresh = self.inner.embed_batch(&missing_texts).await?;
        if fresh.len() != missing.len() {
            return Err(RagError::embedding(format!(
                "Embedder returned {} vectors for {} texts",
                fresh.len(),
                missing.len()
            )));
        }

        let fresh: HashMap<blake3::Hash, Embedding> = missing
            .iter()
            .map(|(k, _)| *k)
            .zip(fresh)
            .collect();

        let embeddings = results
            .into_iter()
            .zip(&keys)
            .map(|(cached, key)| match cached {
                Some(embedding) => Ok(embedding),
                None => fresh
                    .get(key)
                    .cloned()
                    .ok_or_else(|| RagError::internal("Missing embedding for cached key")),
            })
            .collect::<Result<Vec<_>>>()?;

        self.store(&self.documents, fresh.into_iter().collect())?;

        Ok(embeddings)
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        let key = blake3::hash(text.as_bytes());
        let cached = self
            .queries
            .read()
            .map_err(|e| RagError::internal(format!("Embedding cache poisoned: {}", e)))?
            .get(&key)
            .cloned();

        if let Some(embedding) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(embedding);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let embedding = self.inner.embed_one(text).await?;
        self.store(&self.queries, vec![(key, embedding.clone())])?;
        Ok(embedding)
    }

    async fn warm_up(&self) -> Result<()> {
        self.inner.warm_up().await
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
