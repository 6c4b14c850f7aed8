//! ragscope-service - Request handling on top of the retriever
//!
//! This crate shapes a retrieval into a debug response that exposes every
//! stage (documents, chunks, embedding previews, similarity scores, top-k)
//! and optionally asks a language model to answer from the retrieved
//! context.
//!
//! # Components
//!
//! - [`RagService`] - runs [`DebugRequest`]s against a shared retriever
//! - [`ChatCompletionsGenerator`] - answer generation over an
//!   OpenAI-compatible chat completions API

mod debug;
mod generate;

pub use debug::{
    ChunkView, DebugRequest, DebugResponse, RagService, ScoredChunkView, EMBEDDING_PREVIEW_DIMS,
};
pub use generate::ChatCompletionsGenerator;
