//! ragscope-query - Indexing, ranking and retrieval
//!
//! This crate loads a document corpus, indexes it into embedded chunks, and
//! ranks those chunks against queries by cosine similarity.
//!
//! # Features
//!
//! - Corpus loading from a flat directory of text files
//! - Cosine ranking with a stable sort and a zero-norm policy
//! - One immutable index per chunking configuration, built once and shared
//! - Optional per-query deadlines
//!
//! # Example
//!
//! ```rust,ignore
//! use ragscope_query::Retriever;
//! use std::sync::Arc;
//!
//! let retriever = Retriever::open(&config, Arc::new(embedder)).await?;
//! let result = retriever.retrieve("where did the cat sit?", retriever.default_options()).await?;
//! println!("{}", result.context);
//! ```

mod loader;
mod pipeline;
pub mod ranker;

pub use loader::Corpus;
pub use pipeline::{CorpusIndex, QueryOptions, RetrievalResult, Retriever, ScoredChunk};
pub use ranker::{rank, score, top_k, try_score};
