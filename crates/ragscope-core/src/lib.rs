//! ragscope-core - Core types and traits for the retrieval system
//!
//! This crate provides the foundational types, traits, and error handling
//! used throughout the ragscope workspace.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod vector;

pub use config::*;
pub use error::{RagError, Result, StartupError};
pub use traits::*;
pub use types::*;
pub use vector::Embedding;
