//! Debug view of a retrieval: every intermediate stage, ready to serialize.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use ragscope_core::{AnswerGenerator, RagError, Result};
use ragscope_query::{QueryOptions, RetrievalResult, Retriever, ScoredChunk};

/// Number of leading dimensions shown for each embedding.
pub const EMBEDDING_PREVIEW_DIMS: usize = 10;

/// A debug retrieval request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DebugRequest {
    /// The question.
    pub query: String,

    /// Window size in chars (clamped to at least 10).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,

    /// Overlap between windows in chars (clamped below `chunk_size`).
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: i64,

    /// Number of chunks in the context.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Whether to generate an answer from the context.
    #[serde(default)]
    pub generate: bool,
}

fn default_chunk_size() -> i64 {
    120
}

fn default_chunk_overlap() -> i64 {
    30
}

fn default_top_k() -> usize {
    5
}

impl DebugRequest {
    /// A request with default chunking and top-k.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            generate: false,
        }
    }
}

/// One chunk as shown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkView {
    pub file: String,
    pub chunk_id: u32,
    pub text: String,
}

/// One chunk with its similarity score, rounded to 4 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunkView {
    pub file: String,
    pub chunk_id: u32,
    pub text: String,
    pub score: f32,
}

impl From<&ScoredChunk> for ScoredChunkView {
    fn from(scored: &ScoredChunk) -> Self {
        Self {
            file: scored.chunk.doc_id.clone(),
            chunk_id: scored.chunk.chunk_index,
            text: scored.chunk.content.clone(),
            score: round4(scored.score),
        }
    }
}

fn round4(score: f32) -> f32 {
    (score * 10_000.0).round() / 10_000.0
}

/// Every stage of one retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugResponse {
    /// Filename to content.
    pub documents: BTreeMap<String, String>,

    /// Every chunk, in document order.
    pub chunks: Vec<ChunkView>,

    /// Leading dimensions of each chunk embedding, aligned with `chunks`.
    pub chunk_embeddings_preview: Vec<Vec<f32>>,

    /// Leading dimensions of the query embedding.
    pub query_embedding_preview: Vec<f32>,

    /// Every chunk, best first.
    pub similarity_data: Vec<ScoredChunkView>,

    /// The best `top_k` chunks.
    pub top_k_chunks: Vec<ScoredChunkView>,

    /// Context passed to generation (only when an answer was requested).
    pub final_context: Option<String>,

    /// Generated answer (only when requested).
    pub answer: Option<String>,
}

impl DebugResponse {
    fn from_result(result: &RetrievalResult) -> Self {
        Self {
            documents: result.documents.as_ref().clone(),
            chunks: result
                .chunks()
                .iter()
                .map(|c| ChunkView {
                    file: c.doc_id.clone(),
                    chunk_id: c.chunk_index,
                    text: c.content.clone(),
                })
                .collect(),
            chunk_embeddings_preview: result
                .chunk_embeddings()
                .iter()
                .map(|e| e.preview(EMBEDDING_PREVIEW_DIMS).to_vec())
                .collect(),
            query_embedding_preview: result
                .query_embedding
                .preview(EMBEDDING_PREVIEW_DIMS)
                .to_vec(),
            similarity_data: result.ranked.iter().map(ScoredChunkView::from).collect(),
            top_k_chunks: result.top_k.iter().map(ScoredChunkView::from).collect(),
            final_context: None,
            answer: None,
        }
    }
}

/// Serves debug requests against a shared retriever.
pub struct RagService {
    retriever: Arc<Retriever>,
    generator: Option<Arc<dyn AnswerGenerator>>,
    deadline: Option<Duration>,
}

impl RagService {
    /// Create a service without answer generation.
    pub fn new(retriever: Arc<Retriever>) -> Self {
        let deadline = retriever.default_options().deadline;
        Self {
            retriever,
            generator: None,
            deadline,
        }
    }

    /// Enable answer generation.
    pub fn with_generator(mut self, generator: Arc<dyn AnswerGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// The underlying retriever.
    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    /// Run a retrieval and report every stage.
    pub async fn debug(&self, request: DebugRequest) -> Result<DebugResponse> {
        if request.query.trim().is_empty() {
            return Err(RagError::invalid_argument("query must not be empty"));
        }

        let generator = match (request.generate, &self.generator) {
            (false, _) => None,
            (true, Some(generator)) => Some(generator),
            (true, None) => {
                return Err(RagError::generation("no answer generator configured"));
            }
        };

        let options = QueryOptions {
            deadline: self.deadline,
            ..QueryOptions::default()
        }
        .with_chunking(request.chunk_size, request.chunk_overlap)
        .with_top_k(request.top_k);

        let result = self.retriever.retrieve(&request.query, options).await?;
        let mut response = DebugResponse::from_result(&result);

        if let Some(generator) = generator {
            let answer = generator.generate(&request.query, &result.context).await?;
            info!("Generated answer ({} chars)", answer.len());
            response.final_context = Some(result.context);
            response.answer = Some(answer);
        }

        Ok(response)
    }
}
