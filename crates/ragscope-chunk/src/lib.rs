//! ragscope-chunk - Sliding window chunking
//!
//! Splits document text into fixed-size, overlapping windows. Chunking is a
//! pure function of `(text, params)`: no hidden state, same input, same output.
//!
//! # Example
//!
//! ```rust
//! use ragscope_chunk::{Chunker, SlidingWindowChunker};
//! use ragscope_core::ChunkParams;
//!
//! let chunker = SlidingWindowChunker::new();
//! let spans = chunker.chunk("Hello world", ChunkParams::default());
//! assert_eq!(spans.len(), 1);
//! ```

mod window;

pub use window::{chunk_text, windows, SlidingWindowChunker, Window, Windows};

// Re-export types for convenience
pub use ragscope_core::{ChunkParams, ChunkSpan, Chunker};
