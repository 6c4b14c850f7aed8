//! Error types for the retrieval system.
//!
//! Errors are split by when they can happen. [`StartupError`] covers the
//! one-time corpus load and indexing and always halts the process.
//! [`RagError`] covers a single request and is reported to its caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur while serving a request.
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A single document could not be read. The document is skipped.
    #[error("Failed to read document {id}: {reason}")]
    DocumentRead { id: String, reason: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// A vector with zero (or non-finite) norm was scored.
    #[error("Degenerate vector: cosine similarity is undefined for a zero-norm vector")]
    DegenerateVector,

    /// Two vectors of different dimension were compared.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The request ran past its deadline.
    #[error("Deadline of {deadline:?} exceeded")]
    DeadlineExceeded { deadline: Duration },

    /// Answer generation failed.
    #[error("Generation error: {message}")]
    Generation { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a document read error.
    pub fn document_read(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::DocumentRead {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::DocumentRead { .. } => "DOCUMENT_READ_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::DegenerateVector => "DEGENERATE_VECTOR",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

/// Errors that abort startup. None of these leave a usable retriever behind.
#[derive(Error, Debug)]
pub enum StartupError {
    /// The corpus directory is missing or cannot be listed.
    #[error("Failed to load corpus from {path}: {reason}")]
    CorpusLoad { path: PathBuf, reason: String },

    /// Building the startup index failed (no partial index is kept).
    #[error("Failed to index corpus: {0}")]
    Indexing(#[source] RagError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StartupError {
    /// Create a corpus load error.
    pub fn corpus_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CorpusLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CorpusLoad { .. } => "CORPUS_LOAD_ERROR",
            Self::Indexing(_) => "INDEXING_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl From<RagError> for StartupError {
    fn from(err: RagError) -> Self {
        match err {
            RagError::Config { message } => Self::Config { message },
            other => Self::Indexing(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::document_read("notes.txt", "stream did not contain valid UTF-8");
        assert!(err.to_string().contains("notes.txt"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RagError::embedding("boom").error_code(), "EMBEDDING_ERROR");
        assert_eq!(RagError::DegenerateVector.error_code(), "DEGENERATE_VECTOR");
        assert_eq!(
            StartupError::corpus_load("data", "not found").error_code(),
            "CORPUS_LOAD_ERROR"
        );
    }

    #[test]
    fn test_startup_error_from_rag_error() {
        let err: StartupError = RagError::embedding("model missing").into();
        assert!(matches!(err, StartupError::Indexing(RagError::Embedding { .. })));

        let err: StartupError = RagError::config("bad path").into();
        assert!(matches!(err, StartupError::Config { .. }));
    }
}
