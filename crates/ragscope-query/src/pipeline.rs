//! Retrieval pipeline: index the corpus once, then answer queries against it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use ragscope_chunk::SlidingWindowChunker;
use ragscope_core::{
    Chunk, ChunkParams, Chunker, Embedder, Embedding, RagConfig, RagError, Result, StartupError,
    Stats,
};

use crate::loader::Corpus;
use crate::ranker;

/// Separator between chunk texts in the assembled context.
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Chunks of a corpus under one chunking configuration, with their embeddings.
///
/// `chunks` and `embeddings` are index-aligned. Immutable once built.
#[derive(Debug)]
pub struct CorpusIndex {
    params: ChunkParams,
    chunks: Vec<Chunk>,
    embeddings: Vec<Embedding>,
}

impl CorpusIndex {
    /// Chunk every document (in filename order) and embed all chunks in one
    /// batch call.
    pub async fn build(
        corpus: &Corpus,
        chunker: &dyn Chunker,
        embedder: &dyn Embedder,
        params: ChunkParams,
    ) -> Result<Self> {
        let start = Instant::now();

        let mut chunks = Vec::new();
        for doc in corpus.documents() {
            for (i, span) in chunker.chunk(&doc.content, params).into_iter().enumerate() {
                chunks.push(Chunk::new(&doc.id, i as u32, span.content, span.start, span.end));
            }
        }

        debug!("Chunked {} documents into {} chunks ({})", corpus.len(), chunks.len(), params);

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::embedding(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let expected = embedder.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.dimension() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.dimension(),
            });
        }

        info!(
            "Built index ({}): {} chunks in {}ms",
            params,
            chunks.len(),
            start.elapsed().as_millis()
        );

        Ok(Self {
            params,
            chunks,
            embeddings,
        })
    }

    /// Chunking used to build this index.
    pub fn params(&self) -> ChunkParams {
        self.params
    }

    /// All chunks, grouped by document in filename order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunk embeddings, index-aligned with [`CorpusIndex::chunks`].
    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    /// Number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Score every chunk against a query embedding, best first.
    pub fn rank(&self, query: &Embedding) -> Result<Vec<ScoredChunk>> {
        let ranked = ranker::rank_indexed(query, &self.embeddings)?;

        Ok(ranked
            .into_iter()
            .enumerate()
            .map(|(position, (i, score))| ScoredChunk {
                rank: position as u32 + 1,
                score,
                chunk: self.chunks[i].clone(),
                embedding: self.embeddings[i].clone(),
            })
            .collect())
    }
}

/// A chunk with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    /// Position in the ranked list (1-based).
    pub rank: u32,

    /// Cosine similarity to the query.
    pub score: f32,

    /// The chunk.
    pub chunk: Chunk,

    /// The chunk's embedding.
    pub embedding: Embedding,
}

/// Per-request options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    /// Chunking configuration to retrieve from.
    pub params: ChunkParams,

    /// Number of chunks in the context.
    pub top_k: usize,

    /// Upper bound on the time spent answering.
    pub deadline: Option<Duration>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            params: ChunkParams::default(),
            top_k: 5,
            deadline: None,
        }
    }
}

impl QueryOptions {
    /// Use a different chunking configuration (clamped).
    pub fn with_chunking(mut self, chunk_size: i64, overlap: i64) -> Self {
        self.params = ChunkParams::new(chunk_size, overlap);
        self
    }

    /// Set the number of chunks in the context.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set a deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Everything produced for one query.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// The query text.
    pub query: String,

    /// Filename to content for every loaded document, shared across results.
    pub documents: Arc<BTreeMap<String, String>>,

    /// The index the query ran against.
    pub index: Arc<CorpusIndex>,

    /// Every chunk, best first.
    pub ranked: Vec<ScoredChunk>,

    /// The first `top_k` entries of `ranked`.
    pub top_k: Vec<ScoredChunk>,

    /// Top-k chunk texts joined in rank order.
    pub context: String,

    /// The query embedding.
    pub query_embedding: Embedding,

    /// Time spent answering.
    pub latency_ms: u64,
}

impl RetrievalResult {
    /// Chunking actually used.
    pub fn params(&self) -> ChunkParams {
        self.index.params()
    }

    /// All chunks, in index order.
    pub fn chunks(&self) -> &[Chunk] {
        self.index.chunks()
    }

    /// Chunk embeddings, index-aligned with [`RetrievalResult::chunks`].
    pub fn chunk_embeddings(&self) -> &[Embedding] {
        self.index.embeddings()
    }
}

type IndexSlot = Arc<OnceCell<Arc<CorpusIndex>>>;

/// Retrieves the chunks of a corpus most similar to a query.
///
/// Opening a retriever loads the corpus and builds the startup index; there
/// is no way to query before that has finished. A query naming a different
/// chunking configuration gets its own index, built on first use and shared
/// by later queries with the same configuration. At most
/// `max_cached_indexes` such indexes are kept; beyond that, indexes are built
/// per query and dropped afterwards.
pub struct Retriever {
    corpus: Corpus,
    documents: Arc<BTreeMap<String, String>>,
    embedder: Arc<dyn Embedder>,
    chunker: SlidingWindowChunker,
    default_index: Arc<CorpusIndex>,
    indexes: Mutex<HashMap<ChunkParams, IndexSlot>>,
    max_cached_indexes: usize,
    default_top_k: usize,
    query_timeout: Option<Duration>,
}

impl Retriever {
    /// Load the corpus directory named in `config` and index it.
    pub async fn open(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
    ) -> std::result::Result<Self, StartupError> {
        let corpus = Corpus::load(&config.corpus.dir)?;
        Self::with_corpus(corpus, embedder, config).await
    }

    /// Index an already loaded corpus.
    pub async fn with_corpus(
        corpus: Corpus,
        embedder: Arc<dyn Embedder>,
        config: &RagConfig,
    ) -> std::result::Result<Self, StartupError> {
        embedder.warm_up().await?;

        let chunker = SlidingWindowChunker::new();
        let params = config.chunking.params();
        let default_index =
            CorpusIndex::build(&corpus, &chunker, embedder.as_ref(), params).await?;

        info!(
            "Retriever ready: {} documents, {} chunks",
            corpus.len(),
            default_index.len()
        );

        Ok(Self {
            documents: Arc::new(corpus.contents()),
            corpus,
            embedder,
            chunker,
            default_index: Arc::new(default_index),
            indexes: Mutex::new(HashMap::new()),
            max_cached_indexes: config.search.max_cached_indexes,
            default_top_k: config.search.default_top_k,
            query_timeout: config.search.query_timeout(),
        })
    }

    /// Options matching the configured defaults.
    pub fn default_options(&self) -> QueryOptions {
        QueryOptions {
            params: self.default_index.params(),
            top_k: self.default_top_k,
            deadline: self.query_timeout,
        }
    }

    /// The loaded corpus.
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    /// The index built at startup.
    pub fn default_index(&self) -> &Arc<CorpusIndex> {
        &self.default_index
    }

    /// Corpus and startup index statistics.
    pub fn stats(&self) -> Stats {
        Stats {
            documents: self.corpus.len() as u64,
            skipped: self.corpus.skipped().len() as u64,
            chunks: self.default_index.len() as u64,
            dimension: self.embedder.dimension(),
            params: self.default_index.params(),
        }
    }

    /// Number of non-default indexes currently cached.
    pub fn cached_indexes(&self) -> usize {
        self.indexes
            .lock()
            .map(|indexes| indexes.values().filter(|slot| slot.initialized()).count())
            .unwrap_or(0)
    }

    /// Retrieve the chunks most similar to `query`.
    pub async fn retrieve(&self, query: &str, options: QueryOptions) -> Result<RetrievalResult> {
        if query.trim().is_empty() {
            return Err(RagError::invalid_argument("Query must not be empty"));
        }

        let start = Instant::now();
        info!("Retrieving for: {:?} ({})", query, options.params);

        let work = async {
            let index = self.index_for(options.params).await?;
            let query_embedding = self.embedder.embed_one(query).await?;
            let ranked = index.rank(&query_embedding)?;
            Ok::<_, RagError>((index, query_embedding, ranked))
        };

        let (index, query_embedding, ranked) = match options.deadline {
            Some(deadline) => tokio::time::timeout(deadline, work)
                .await
                .map_err(|_| RagError::DeadlineExceeded { deadline })??,
            None => work.await?,
        };

        let top_k = ranker::top_k(&ranked, options.top_k).to_vec();
        let context = top_k
            .iter()
            .map(|s| s.chunk.content.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Ranked {} chunks in {}ms, top score {:?}",
            ranked.len(),
            latency_ms,
            ranked.first().map(|s| s.score)
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            documents: Arc::clone(&self.documents),
            index,
            ranked,
            top_k,
            context,
            query_embedding,
            latency_ms,
        })
    }

    /// The index for `params`, building it if needed.
    async fn index_for(&self, params: ChunkParams) -> Result<Arc<CorpusIndex>> {
        if params == self.default_index.params() {
            return Ok(Arc::clone(&self.default_index));
        }

        let slot = {
            let mut indexes = self.lock_indexes()?;
            match indexes.get(&params) {
                Some(slot) => Some(Arc::clone(slot)),
                None if indexes.len() < self.max_cached_indexes => {
                    let slot = IndexSlot::default();
                    indexes.insert(params, Arc::clone(&slot));
                    Some(slot)
                }
                None => None,
            }
        };

        let Some(slot) = slot else {
            warn!("Index cache full, building uncached index ({})", params);
            return self.build_index(params).await.map(Arc::new);
        };

        match slot
            .get_or_try_init(|| async { self.build_index(params).await.map(Arc::new) })
            .await
        {
            Ok(index) => Ok(Arc::clone(index)),
            Err(e) => {
                // Free the slot so a later request can retry
                let mut indexes = self.lock_indexes()?;
                if indexes
                    .get(&params)
                    .is_some_and(|s| Arc::ptr_eq(s, &slot) && !s.initialized())
                {
                    indexes.remove(&params);
                }
                Err(e)
            }
        }
    }

    async fn build_index(&self, params: ChunkParams) -> Result<CorpusIndex> {
        CorpusIndex::build(&self.corpus, &self.chunker, self.embedder.as_ref(), params).await
    }

    fn lock_indexes(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ChunkParams, IndexSlot>>> {
        self.indexes
            .lock()
            .map_err(|e| RagError::internal(format!("Index cache poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use ragscope_embed::{KeywordEmbedder, MockEmbedder};

    const CAT_DOG: &str = "The cat sat on the mat. The dog ran in the park.";

    /// Counts batch calls and can be told to fail.
    struct TestEmbedder {
        inner: KeywordEmbedder,
        batches: AtomicUsize,
        fail_batches: bool,
        fail_queries: bool,
        query_delay: Option<Duration>,
        reported_dimension: Option<usize>,
    }

    impl TestEmbedder {
        fn new() -> Self {
            Self {
                inner: KeywordEmbedder::new(["cat", "sat", "mat", "dog", "park"]),
                batches: AtomicUsize::new(0),
                fail_batches: false,
                fail_queries: false,
                query_delay: None,
                reported_dimension: None,
            }
        }
    }

    #[async_trait]
    impl Embedder for TestEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            if self.fail_batches {
                return Err(RagError::embedding("model unavailable"));
            }
            self.inner.embed_batch(texts).await
        }

        async fn embed_one(&self, text: &str) -> Result<Embedding> {
            if let Some(delay) = self.query_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_queries {
                return Err(RagError::embedding("model unavailable"));
            }
            self.inner.embed_one(text).await
        }

        fn dimension(&self) -> usize {
            self.reported_dimension.unwrap_or_else(|| self.inner.dimension())
        }
    }

    fn config(chunk_size: i64, overlap: i64) -> RagConfig {
        let mut config = RagConfig::default();
        config.chunking.chunk_size = chunk_size;
        config.chunking.chunk_overlap = overlap;
        config
    }

    async fn cat_dog_retriever(embedder: Arc<TestEmbedder>) -> Retriever {
        let corpus = Corpus::from_documents([("doc1.txt", CAT_DOG)]);
        Retriever::with_corpus(corpus, embedder, &config(20, 5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_cat_dog() {
        let retriever = cat_dog_retriever(Arc::new(TestEmbedder::new())).await;

        let starts: Vec<_> = retriever.default_index().chunks().iter().map(|c| c.start).collect();
        assert_eq!(starts, [0, 15, 30, 45]);

        let result = retriever
            .retrieve("Where did the cat sit?", retriever.default_options())
            .await
            .unwrap();

        assert_eq!(result.ranked.len(), 4);
        assert_eq!(result.top_k.len(), 4);
        assert_eq!(result.ranked[0].chunk.content, "The cat sat on the m");
        assert_eq!(result.ranked[0].rank, 1);

        let dog_only = result
            .ranked
            .iter()
            .position(|s| s.chunk.content == "g ran in the park.")
            .unwrap();
        assert!(dog_only > 0);
        assert!(result.ranked[0].score > result.ranked[dog_only].score);

        let tail = &result.chunks()[3];
        assert_eq!((tail.content.as_str(), tail.chunk_index), ("rk.", 3));

        assert!(result.context.starts_with("The cat sat on the m\n\n"));
        assert_eq!(result.documents["doc1.txt"], CAT_DOG);
        assert_eq!(result.params(), ChunkParams::new(20, 5));
        assert_eq!(result.chunk_embeddings().len(), result.chunks().len());
        assert_eq!(result.ranked[0].embedding, result.chunk_embeddings()[0]);
    }

    #[tokio::test]
    async fn test_top_k_limits() {
        let retriever = cat_dog_retriever(Arc::new(TestEmbedder::new())).await;
        let options = retriever.default_options();

        let none = retriever.retrieve("cat", options.with_top_k(0)).await.unwrap();
        assert!(none.top_k.is_empty());
        assert!(none.context.is_empty());
        assert_eq!(none.ranked.len(), 4);

        let all = retriever.retrieve("cat", options.with_top_k(50)).await.unwrap();
        assert_eq!(all.top_k, all.ranked);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let retriever = cat_dog_retriever(Arc::new(TestEmbedder::new())).await;
        let err = retriever
            .retrieve("   ", retriever.default_options())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let corpus = Corpus::from_documents([
            ("a.txt", "Rust has ownership and borrowing. ".repeat(10)),
            ("b.txt", "Tokio runs async tasks on a thread pool. ".repeat(10)),
            ("c.txt", "Embeddings map text to vectors. ".repeat(10)),
        ]);
        let retriever = Arc::new(
            Retriever::with_corpus(corpus, Arc::new(MockEmbedder::with_dimension(32)), &RagConfig::default())
                .await
                .unwrap(),
        );

        let queries = ["ownership", "async runtime", "vectors", "borrowing rules"];
        let options = retriever.default_options();

        let mut sequential = Vec::new();
        for q in queries {
            sequential.push(retriever.retrieve(q, options).await.unwrap().ranked);
        }

        let handles: Vec<_> = queries
            .iter()
            .map(|q| {
                let retriever = Arc::clone(&retriever);
                let q = q.to_string();
                tokio::spawn(async move { retriever.retrieve(&q, options).await.unwrap().ranked })
            })
            .collect();

        for (handle, expected) in handles.into_iter().zip(sequential) {
            assert_eq!(handle.await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_index_built_once_per_config() {
        let embedder = Arc::new(TestEmbedder::new());
        let retriever = Arc::new(cat_dog_retriever(Arc::clone(&embedder)).await);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);

        // Same clamped key as the startup index: no rebuild
        let same = retriever.default_options().with_chunking(20, 5);
        retriever.retrieve("cat", same).await.unwrap();
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 1);

        // Concurrent first requests for a new key build it once
        let other = retriever.default_options().with_chunking(30, 10);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let retriever = Arc::clone(&retriever);
                tokio::spawn(async move { retriever.retrieve("dog", other).await.unwrap() })
            })
            .collect();
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.params(), ChunkParams::new(30, 10));
        }
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);
        assert_eq!(retriever.cached_indexes(), 1);

        // Clamps to (10, 9), a third key
        let clamped = retriever.default_options().with_chunking(3, 99);
        let result = retriever.retrieve("dog", clamped).await.unwrap();
        assert_eq!(result.params(), ChunkParams::new(10, 9));
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cache_capacity_overflow() {
        let embedder = Arc::new(TestEmbedder::new());
        let corpus = Corpus::from_documents([("doc1.txt", CAT_DOG)]);
        let mut config = config(20, 5);
        config.search.max_cached_indexes = 1;
        let retriever = Retriever::with_corpus(corpus, embedder.clone(), &config)
            .await
            .unwrap();

        let first = retriever.default_options().with_chunking(30, 0);
        let second = retriever.default_options().with_chunking(40, 0);

        retriever.retrieve("cat", first).await.unwrap();
        retriever.retrieve("cat", first).await.unwrap();
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);

        // Over capacity: answered correctly, but rebuilt every time
        let a = retriever.retrieve("cat", second).await.unwrap();
        let b = retriever.retrieve("cat", second).await.unwrap();
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 4);
        assert_eq!(a.ranked, b.ranked);
        assert_eq!(a.params(), ChunkParams::new(40, 0));
        assert_eq!(retriever.cached_indexes(), 1);
    }

    #[tokio::test]
    async fn test_startup_embedding_failure_is_fatal() {
        let embedder = TestEmbedder {
            fail_batches: true,
            ..TestEmbedder::new()
        };
        let corpus = Corpus::from_documents([("doc1.txt", CAT_DOG)]);

        let err = Retriever::with_corpus(corpus, Arc::new(embedder), &RagConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Indexing(RagError::Embedding { .. })));
    }

    #[tokio::test]
    async fn test_wrong_dimension_fails_startup() {
        let embedder = TestEmbedder {
            reported_dimension: Some(8),
            ..TestEmbedder::new()
        };
        let corpus = Corpus::from_documents([("doc1.txt", CAT_DOG)]);

        let err = Retriever::with_corpus(corpus, Arc::new(embedder), &RagConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StartupError::Indexing(RagError::DimensionMismatch { expected: 8, actual: 6 })
        ));
    }

    #[tokio::test]
    async fn test_documents_shared_across_queries() {
        let retriever = cat_dog_retriever(Arc::new(TestEmbedder::new())).await;
        let options = retriever.default_options();

        let a = retriever.retrieve("cat", options).await.unwrap();
        let b = retriever.retrieve("dog", options.with_chunking(30, 10)).await.unwrap();
        assert!(Arc::ptr_eq(&a.documents, &b.documents));
        assert_eq!(a.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_corpus_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RagConfig::default();
        config.corpus.dir = dir.path().join("nope");

        let err = Retriever::open(&config, Arc::new(MockEmbedder::new()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "CORPUS_LOAD_ERROR");
    }

    #[tokio::test]
    async fn test_query_embedding_failure_is_typed() {
        let embedder = Arc::new(TestEmbedder {
            fail_queries: true,
            ..TestEmbedder::new()
        });
        let retriever = cat_dog_retriever(embedder).await;

        let err = retriever
            .retrieve("cat", retriever.default_options())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let embedder = Arc::new(TestEmbedder {
            query_delay: Some(Duration::from_millis(200)),
            ..TestEmbedder::new()
        });
        let retriever = cat_dog_retriever(embedder).await;

        let options = retriever
            .default_options()
            .with_deadline(Duration::from_millis(10));
        let err = retriever.retrieve("cat", options).await.unwrap_err();
        assert!(matches!(err, RagError::DeadlineExceeded { .. }));
    }

    #[tokio::test]
    async fn test_load_directory_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc1.txt"), CAT_DOG).unwrap();
        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        std::fs::write(dir.path().join("bad.bin"), [0xff, 0xfe]).unwrap();

        let mut config = config(20, 5);
        config.corpus.dir = dir.path().to_path_buf();
        let retriever = Retriever::open(&config, Arc::new(TestEmbedder::new()))
            .await
            .unwrap();

        let stats = retriever.stats();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.chunks, 4);
        assert_eq!(stats.dimension, 6);
        assert_eq!(stats.params, ChunkParams::new(20, 5));
    }
}
