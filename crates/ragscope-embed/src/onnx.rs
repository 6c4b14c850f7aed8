//! ONNX-based embedding model implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use ragscope_core::{Embedder, Embedding, EmbeddingConfig, RagError, Result};

/// ONNX-based embedder for sentence-transformer models such as
/// all-MiniLM-L6-v2.
///
/// Construction is cheap. The model and tokenizer are loaded on first use
/// (or by [`Embedder::warm_up`]) and kept for the lifetime of the embedder.
/// The ONNX session sits behind a `Mutex`, so one batch runs at a time;
/// concurrent callers queue on it.
pub struct OnnxEmbedder {
    config: EmbeddingConfig,

    /// Loaded once, on first use.
    model: OnceCell<Arc<LoadedModel>>,
}

/// Model state that exists only after loading.
struct LoadedModel {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Tokenizer for the model.
    tokenizer: Tokenizer,

    /// Expected embedding dimension.
    dimension: usize,

    /// Maximum token count; longer inputs are truncated.
    max_tokens: usize,

    /// Whether the graph takes a `token_type_ids` input (BERT-style models).
    token_type_ids: bool,
}

impl OnnxEmbedder {
    /// Create an embedder. Nothing is loaded until the first embed call.
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            model: OnceCell::new(),
        }
    }

    /// Create an embedder from explicit model and tokenizer paths, keeping
    /// every other setting at its default.
    pub fn from_paths(model_path: impl AsRef<Path>, tokenizer_path: impl AsRef<Path>) -> Self {
        Self::new(EmbeddingConfig {
            model_path: model_path.as_ref().to_path_buf(),
            tokenizer_path: tokenizer_path.as_ref().to_path_buf(),
            ..EmbeddingConfig::default()
        })
    }

    /// Whether the model has been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Get the loaded model, loading it on the blocking pool the first time.
    async fn model(&self) -> Result<Arc<LoadedModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || LoadedModel::load(&config).map(Arc::new))
                    .await
                    .map_err(|e| RagError::embedding(format!("Model loading task failed: {}", e)))?
            })
            .await?;
        Ok(Arc::clone(model))
    }

    /// Embed texts with a prefix, in batches of `batch_size`, off the async
    /// runtime.
    async fn embed_with_prefix(&self, texts: &[&str], prefix: &str) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model().await?;
        let batch_size = self.config.batch_size.max(1);
        let mut embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            let prefixed: Vec<String> = batch.iter().map(|t| format!("{}{}", prefix, t)).collect();
            let model = Arc::clone(&model);
            let batch_embeddings = tokio::task::spawn_blocking(move || model.encode(&prefixed))
                .await
                .map_err(|e| RagError::embedding(format!("Embedding task failed: {}", e)))??;
            embeddings.extend(batch_embeddings);
        }

        Ok(embeddings)
    }
}

impl LoadedModel {
    fn load(config: &EmbeddingConfig) -> Result<Self> {
        info!("Loading ONNX model from {:?}", config.model_path);

        let session = Session::builder()
            .map_err(|e| RagError::embedding(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RagError::embedding(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.num_threads.max(1))
            .map_err(|e| RagError::embedding(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(&config.model_path)
            .map_err(|e| RagError::embedding(format!("Failed to load model: {}", e)))?;

        info!("Loading tokenizer from {:?}", config.tokenizer_path);

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| RagError::embedding(format!("Failed to load tokenizer: {}", e)))?;

        info!(
            "Embedder initialized: dim={}, max_tokens={}, token_type_ids={}",
            config.dimension, config.max_tokens, config.token_type_ids
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimension: config.dimension,
            max_tokens: config.max_tokens,
            token_type_ids: config.token_type_ids,
        })
    }

    /// Run one batch through the model.
    fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| RagError::embedding(format!("Tokenization failed: {}", e)))?;

        // Pad to the longest input, truncating at max_tokens
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_tokens)
            .max(1);

        let batch_size = encodings.len();

        debug!("Embedding batch: size={}, max_len={}", batch_size, max_len);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
                type_ids[i * max_len + j] = types[j] as i64;
            }
        }

        let pooling_mask = attention_mask.clone();

        let input_ids_tensor = Tensor::from_array((vec![batch_size, max_len], input_ids))
            .map_err(|e| RagError::embedding(format!("Failed to create input tensor: {}", e)))?;

        let attention_mask_tensor = Tensor::from_array((vec![batch_size, max_len], attention_mask))
            .map_err(|e| RagError::embedding(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RagError::embedding(format!("Failed to lock session: {}", e)))?;

        let outputs = (if self.token_type_ids {
            let type_ids_tensor = Tensor::from_array((vec![batch_size, max_len], type_ids))
                .map_err(|e| {
                    RagError::embedding(format!("Failed to create token type tensor: {}", e))
                })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => type_ids_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
        })
        .map_err(|e| RagError::embedding(format!("Inference failed: {}", e)))?;

        // The first output is the token embeddings (or pooled sentence
        // embeddings, depending on the export)
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RagError::embedding("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| RagError::embedding(format!("Failed to extract tensor: {}", e)))?;

        let shape: Vec<usize> = view.shape().to_vec();
        debug!("Output shape: {:?}", shape);

        let embeddings = match shape.as_slice() {
            // (batch_size, seq_len, hidden_dim) - need mean pooling
            [_, _, _] => mean_pool(&view, &pooling_mask, max_len),
            // (batch_size, hidden_dim) - already pooled
            [_, hidden_dim] => (0..batch_size)
                .map(|i| {
                    let values: Vec<f32> = (0..*hidden_dim).map(|j| view[[i, j]]).collect();
                    Embedding::new(values).normalized()
                })
                .collect(),
            _ => {
                return Err(RagError::embedding(format!(
                    "Unexpected output shape: {:?}",
                    shape
                )))
            }
        };

        if let Some(first) = embeddings.first() {
            if first.dimension() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: first.dimension(),
                });
            }
        }

        Ok(embeddings)
    }
}

/// Mean pooling over the sequence dimension with the attention mask, then L2
/// normalization. `tensor` has shape `[batch, seq, hidden]`; `mask` is
/// `[batch, max_len]` row-major.
fn mean_pool(tensor: &ArrayViewD<'_, f32>, mask: &[i64], max_len: usize) -> Vec<Embedding> {
    let shape = tensor.shape();
    let (batch_size, seq_len, hidden_dim) = (shape[0], shape[1], shape[2]);

    (0..batch_size)
        .map(|i| {
            let mut sum = vec![0.0f32; hidden_dim];
            let mut count = 0usize;

            for j in 0..seq_len.min(max_len) {
                if mask[i * max_len + j] == 1 {
                    count += 1;
                    for (k, s) in sum.iter_mut().enumerate() {
                        *s += tensor[[i, j, k]];
                    }
                }
            }

            if count > 0 {
                for s in &mut sum {
                    *s /= count as f32;
                }
            }

            Embedding::new(sum).normalized()
        })
        .collect()
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        self.embed_with_prefix(texts, &self.config.document_prefix)
            .await
    }

    async fn embed_one(&self, text: &str) -> Result<Embedding> {
        self.embed_with_prefix(&[text], &self.config.query_prefix)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::embedding("No embedding returned"))
    }

    async fn warm_up(&self) -> Result<()> {
        self.model().await.map(|_| ())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::Array3;

    #[tokio::test]
    async fn test_missing_model_is_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = OnnxEmbedder::from_paths(
            dir.path().join("model.onnx"),
            dir.path().join("tokenizer.json"),
        );

        assert!(!embedder.is_loaded());
        let err = embedder.warm_up().await.unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_ERROR");
        assert!(!embedder.is_loaded());
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_load() {
        let embedder = OnnxEmbedder::from_paths("/nonexistent/model.onnx", "/nonexistent/tok.json");
        let embeddings = embedder.embed_batch(&[]).await.unwrap();
        assert!(embeddings.is_empty());
        assert!(!embedder.is_loaded());
        assert_eq!(embedder.dimension(), 384);
    }

    #[test]
    fn test_mean_pool_respects_mask() {
        // batch 1, seq 3, hidden 2; last token is padding
        let tensor = Array3::from_shape_vec((1, 3, 2), vec![1.0, 0.0, 3.0, 0.0, 100.0, 100.0])
            .unwrap()
            .into_dyn();
        let pooled = mean_pool(&tensor.view(), &[1, 1, 0], 3);

        assert_eq!(pooled.len(), 1);
        assert_eq!(pooled[0].as_slice(), &[1.0, 0.0]);
    }
}
