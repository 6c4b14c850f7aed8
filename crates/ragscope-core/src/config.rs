//! Configuration types for the retrieval system.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::ChunkParams;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    /// Document source configuration.
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Embedding configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Answer generation configuration.
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Document source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Directory of plain-text files, one document per file.
    #[serde(default = "default_corpus_dir")]
    pub dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_corpus_dir(),
        }
    }
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Path to the ONNX model file.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Path to the tokenizer.json file.
    #[serde(default = "default_tokenizer_path")]
    pub tokenizer_path: PathBuf,

    /// Output dimension of the model.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum tokens per input; longer inputs are truncated.
    #[serde(default = "default_embedding_max_tokens")]
    pub max_tokens: usize,

    /// Batch size for embedding.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of threads for CPU inference.
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Feed a `token_type_ids` input (BERT-style exports need it).
    #[serde(default = "default_true")]
    pub token_type_ids: bool,

    /// Prefix prepended to document texts (asymmetric models).
    #[serde(default)]
    pub document_prefix: String,

    /// Prefix prepended to query texts (asymmetric models).
    #[serde(default)]
    pub query_prefix: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            tokenizer_path: default_tokenizer_path(),
            dimension: 384,
            max_tokens: 256,
            batch_size: 32,
            num_threads: 4,
            token_type_ids: true,
            document_prefix: String::new(),
            query_prefix: String::new(),
        }
    }
}

/// Chunking configuration used for the startup index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in chars.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,

    /// Overlap between windows in chars.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: i64,
}

impl ChunkingConfig {
    /// Clamped chunking parameters.
    pub fn params(&self) -> ChunkParams {
        ChunkParams::new(self.chunk_size, self.chunk_overlap)
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 120,
            chunk_overlap: 30,
        }
    }
}

/// Search configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default number of results.
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Indexes kept for non-default chunking, besides the startup one.
    #[serde(default = "default_max_cached_indexes")]
    pub max_cached_indexes: usize,

    /// Per-query deadline in milliseconds (0 = none).
    #[serde(default)]
    pub query_timeout_ms: u64,
}

impl SearchConfig {
    /// Per-query deadline, if configured.
    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_ms > 0).then(|| Duration::from_millis(self.query_timeout_ms))
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_cached_indexes: 8,
            query_timeout_ms: 0,
        }
    }
}

/// Answer generation configuration (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Chat completions endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model name.
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens in the answer.
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,

    /// Nucleus sampling.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            temperature: 0.3,
            max_tokens: 600,
            top_p: 0.9,
        }
    }
}

// Default value functions

fn default_true() -> bool {
    true
}

fn default_corpus_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_dimension() -> usize {
    384
}

fn default_embedding_max_tokens() -> usize {
    256
}

fn default_batch_size() -> usize {
    32
}

fn default_num_threads() -> usize {
    4
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

fn default_max_cached_indexes() -> usize {
    8
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1/chat/completions".to_string()
}

fn default_generation_model() -> String {
    "openai/gpt-oss-120b".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_generation_max_tokens() -> u32 {
    600
}

fn default_top_p() -> f32 {
    0.9
}

fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ragscope")
        .join("models")
        .join("all-MiniLM-L6-v2")
}

fn default_model_path() -> PathBuf {
    default_model_dir().join("model.onnx")
}

fn default_tokenizer_path() -> PathBuf {
    default_model_dir().join("tokenizer.json")
}

impl RagConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            crate::error::RagError::config(format!("Failed to parse config: {}", e))
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> crate::error::Result<Self> {
        // Try user config first
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ragscope").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let local_config = PathBuf::from("ragscope.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}
