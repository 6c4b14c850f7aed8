//! ragscope-embed - embedding providers
//!
//! This crate turns text into vectors for similarity search.
//!
//! # Providers
//!
//! - [`OnnxEmbedder`]: sentence-transformer models (all-MiniLM-L6-v2 by
//!   default) run through ONNX Runtime, with mean pooling over the attention
//!   mask and L2 normalization. The model loads lazily, once.
//! - [`CachingEmbedder`]: memoizes any embedder by content hash.
//! - [`MockEmbedder`] and [`KeywordEmbedder`]: deterministic, model-free
//!   embedders for tests and offline runs.

mod cache;
mod mock;
mod onnx;

pub use cache::{CacheStats, CachingEmbedder};
pub use mock::{KeywordEmbedder, MockEmbedder};
pub use onnx::OnnxEmbedder;

// Re-export the Embedder trait for convenience
pub use ragscope_core::Embedder;
