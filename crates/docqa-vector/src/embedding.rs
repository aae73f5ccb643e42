//! Embedding service trait and implementations.
//!
//! - `OllamaEmbedding` calls a local Ollama server (`/api/embed`). This is the
//!   default production backend.
//! - `OnnxEmbeddingService` (feature `onnx`) runs a sentence-transformer
//!   export in-process via ort and the HuggingFace tokenizers crate.
//! - `MockEmbedding` produces deterministic bag-of-words vectors for tests and
//!   offline runs.

use std::future::Future;
use std::hash::Hasher;
use std::pin::Pin;
use std::sync::Arc;

use docqa_core::config::EmbeddingConfig;
use docqa_core::error::{DocqaError, Result};
use docqa_core::retry::{RetryPolicy, ServiceKind};
use serde::{Deserialize, Serialize};
use tracing::debug;
use twox_hash::XxHash64;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors. The same
/// service must be used for ingestion and for queries against one index.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed several texts, preserving order.
    ///
    /// The default calls [`embed`](Self::embed) once per text; providers with
    /// a native batch endpoint override it.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
        async move {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(self.embed(text).await?);
            }
            Ok(vectors)
        }
    }

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// A blanket implementation is provided so that every `EmbeddingService`
/// automatically implements `DynEmbeddingService`, letting the retriever and
/// the ingestion pipeline share one `Arc<dyn DynEmbeddingService>`.
pub trait DynEmbeddingService: Send + Sync {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>>;

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;

    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(&'a self, texts: &'a [String]) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

/// Build the embedding service named by `config.provider`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingService>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedding::from_config(config)?)),
        "mock" => Ok(Arc::new(MockEmbedding::with_dimensions(config.dimensions))),
        #[cfg(feature = "onnx")]
        "onnx" => {
            let dir = config.model_dir.as_deref().ok_or_else(|| {
                DocqaError::Config("embedding.model_dir must be set for onnx".to_string())
            })?;
            let dir = docqa_core::config::expand_home(dir);
            let service = OnnxEmbeddingService::from_directory(&dir)?;
            Ok(Arc::new(service))
        }
        #[cfg(not(feature = "onnx"))]
        "onnx" => Err(DocqaError::Config(
            "this build does not include the onnx embedding provider".to_string(),
        )),
        other => Err(DocqaError::Config(format!(
            "unknown embedding provider '{}'",
            other
        ))),
    }
}

fn check_dimensions(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(DocqaError::unavailable(
            "embedding",
            format!(
                "provider returned a {}-dimensional vector, expected {}",
                vector.len(),
                expected
            ),
        ));
    }
    Ok(())
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// OllamaEmbedding - HTTP client for a local Ollama server
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding client for Ollama's `/api/embed` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedding {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedding {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(DocqaError::Config("missing embedding model name".to_string()));
        }
        let client = reqwest::Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| DocqaError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embed", base_url.trim_end_matches('/')),
            model,
            dimensions,
            retry,
        })
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.model.clone(),
            config.dimensions,
            config.retry_policy(),
        )
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DocqaError::unavailable("embedding", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(DocqaError::unavailable(
                "embedding",
                format!("HTTP {}: {}", status, detail),
            ));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            DocqaError::unavailable("embedding", format!("malformed response: {}", e))
        })?;
        if parsed.embeddings.len() != texts.len() {
            return Err(DocqaError::unavailable(
                "embedding",
                format!(
                    "provider returned {} embeddings for {} inputs",
                    parsed.embeddings.len(),
                    texts.len()
                ),
            ));
        }
        for vector in &parsed.embeddings {
            check_dimensions(vector, self.dimensions)?;
        }
        Ok(parsed.embeddings)
    }
}

impl EmbeddingService for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DocqaError::unavailable("embedding", "provider returned no vectors"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.model, batch = texts.len(), "Requesting embeddings");
        self.retry
            .run(ServiceKind::Embedding, move || self.request(texts))
            .await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - in-process ONNX Runtime inference
// ---------------------------------------------------------------------------

#[cfg(feature = "onnx")]
pub use onnx::OnnxEmbeddingService;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use ort::session::Session;
    use ort::value::TensorRef;
    use tokenizers::Tokenizer;
    use tracing::info;

    use super::{l2_normalize, EmbeddingService};
    use docqa_core::error::{DocqaError, Result};

    struct OnnxModel {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
    }

    /// ONNX Runtime-backed embedding service using a sentence-transformer model.
    ///
    /// Expects a model directory containing `model.onnx` and `tokenizer.json`.
    /// Token embeddings are mean-pooled under the attention mask and
    /// L2-normalised.
    #[derive(Clone)]
    pub struct OnnxEmbeddingService {
        model: Arc<OnnxModel>,
        dimensions: usize,
    }

    impl std::fmt::Debug for OnnxEmbeddingService {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("OnnxEmbeddingService")
                .field("dimensions", &self.dimensions)
                .finish()
        }
    }

    fn inference_error(context: &str, e: impl std::fmt::Display) -> DocqaError {
        DocqaError::unavailable("embedding", format!("{}: {}", context, e))
    }

    impl OnnxEmbeddingService {
        pub fn from_directory(model_dir: &Path) -> Result<Self> {
            Self::from_files(
                &model_dir.join("model.onnx"),
                &model_dir.join("tokenizer.json"),
            )
        }

        pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
            if !model_path.exists() {
                return Err(DocqaError::Config(format!(
                    "ONNX model not found at {}",
                    model_path.display()
                )));
            }
            if !tokenizer_path.exists() {
                return Err(DocqaError::Config(format!(
                    "Tokenizer not found at {}",
                    tokenizer_path.display()
                )));
            }

            let session = Session::builder()
                .map_err(|e| DocqaError::Config(format!("ONNX session builder: {}", e)))?
                .with_intra_threads(1)
                .map_err(|e| DocqaError::Config(format!("ONNX set threads: {}", e)))?
                .commit_from_file(model_path)
                .map_err(|e| DocqaError::Config(format!("ONNX load model: {}", e)))?;

            // Output is [batch, seq_len, hidden_dim]; fall back to MiniLM's width.
            let dimensions = session
                .outputs()
                .first()
                .and_then(|out| out.dtype().tensor_shape())
                .and_then(|shape| shape.last().copied())
                .filter(|d| *d > 0)
                .map(|d| d as usize)
                .unwrap_or(384);

            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| DocqaError::Config(format!("Failed to load tokenizer: {}", e)))?;

            info!(
                model = %model_path.display(),
                dimensions,
                "Loaded ONNX embedding model"
            );

            Ok(Self {
                model: Arc::new(OnnxModel {
                    session: Mutex::new(session),
                    tokenizer,
                }),
                dimensions,
            })
        }
    }

    impl OnnxModel {
        fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| inference_error("tokenization failed", e))?;

            let to_i64 = |values: &[u32]| values.iter().map(|&v| v as i64).collect::<Vec<i64>>();
            let input_ids = to_i64(encoding.get_ids());
            let attention_mask = to_i64(encoding.get_attention_mask());
            let token_type_ids = to_i64(encoding.get_type_ids());
            let seq_len = input_ids.len();

            let ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
                .map_err(|e| inference_error("input_ids array", e))?;
            let mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask.clone())
                .map_err(|e| inference_error("attention_mask array", e))?;
            let type_array = ndarray::Array2::from_shape_vec((1, seq_len), token_type_ids)
                .map_err(|e| inference_error("token_type_ids array", e))?;

            let ids_ref = TensorRef::from_array_view(&ids_array)
                .map_err(|e| inference_error("input_ids tensor", e))?;
            let mask_ref = TensorRef::from_array_view(&mask_array)
                .map_err(|e| inference_error("attention_mask tensor", e))?;
            let type_ref = TensorRef::from_array_view(&type_array)
                .map_err(|e| inference_error("token_type_ids tensor", e))?;

            let mut session = self
                .session
                .lock()
                .map_err(|e| DocqaError::Storage(format!("Session lock poisoned: {}", e)))?;
            let outputs = session
                .run(ort::inputs![ids_ref, mask_ref, type_ref])
                .map_err(|e| inference_error("ONNX inference failed", e))?;

            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| inference_error("extract embeddings", e))?;

            let hidden_dim = match shape.iter().copied().collect::<Vec<i64>>().as_slice() {
                [_, .., last] if *last > 0 => *last as usize,
                other => {
                    return Err(inference_error(
                        "unexpected output shape",
                        format!("{:?}", other),
                    ))
                }
            };

            let mut pooled = vec![0.0f32; hidden_dim];
            let mut count = 0.0f32;
            for (tok_idx, &mask_val) in attention_mask.iter().enumerate() {
                if mask_val > 0 {
                    let offset = tok_idx * hidden_dim;
                    for (dim, slot) in pooled.iter_mut().enumerate() {
                        *slot += data[offset + dim];
                    }
                    count += 1.0;
                }
            }
            if count > 0.0 {
                for val in &mut pooled {
                    *val /= count;
                }
            }

            l2_normalize(&mut pooled);
            Ok(pooled)
        }
    }

    impl EmbeddingService for OnnxEmbeddingService {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.trim().is_empty() {
                return Err(DocqaError::InvalidInput("cannot embed empty text".to_string()));
            }
            // CPU-bound; keep it off the async workers.
            let model = Arc::clone(&self.model);
            let text = text.to_string();
            let vector = tokio::task::spawn_blocking(move || model.embed_sync(&text))
                .await
                .map_err(|e| inference_error("embedding task panicked", e))??;
            super::check_dimensions(&vector, self.dimensions)?;
            Ok(vector)
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_onnx_missing_model() {
            let result = OnnxEmbeddingService::from_directory(Path::new("/nonexistent"));
            assert!(matches!(result, Err(DocqaError::Config(_))));
        }
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic bag-of-words vectors
// ---------------------------------------------------------------------------

/// Default width of mock vectors.
pub const MOCK_DIMENSIONS: usize = 384;

/// Mock embedding service using feature hashing over lower-cased words.
///
/// Identical inputs always produce identical vectors, and texts that share
/// words score higher than texts that don't, which is enough for retrieval
/// tests to rank the obviously relevant chunk first.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::with_dimensions(MOCK_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        // Raw bytes into a fixed-seed hash keep vectors identical across
        // toolchains, so a persisted mock index stays queryable.
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(token.as_bytes());
        let h = hasher.finish();
        let index = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = vec![0.0f32; self.dimensions];

        let mut any_token = false;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let (index, sign) = self.bucket(&token.to_lowercase());
            result[index] += sign;
            any_token = true;
        }
        if !any_token {
            // Punctuation-only text still needs a non-zero vector.
            let (index, sign) = self.bucket(text);
            result[index] += sign;
        }

        l2_normalize(&mut result);
        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(DocqaError::InvalidInput("cannot embed empty text".to_string()));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new();
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), MOCK_DIMENSIONS);

        let small = MockEmbedding::with_dimensions(16);
        assert_eq!(small.embed("hello world").await.unwrap().len(), 16);
        assert_eq!(EmbeddingService::dimensions(&small), 16);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[test]
    fn test_mock_buckets_are_pinned() {
        // XXH64 of the empty input with seed 0 is 0xEF46DB3751D8E999.
        let service = MockEmbedding::with_dimensions(1000);
        assert_eq!(service.bucket(""), (921, -1.0));
    }

    #[tokio::test]
    async fn test_mock_embedding_unit_length() {
        let service = MockEmbedding::new();
        let vec = service.embed("Remote work is allowed").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::new();
        assert!(matches!(
            service.embed("   ").await,
            Err(DocqaError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_embedding_punctuation_only() {
        let service = MockEmbedding::new();
        let vec = service.embed("?!").await.unwrap();
        assert!(vec.iter().any(|v| *v != 0.0));
    }

    #[tokio::test]
    async fn test_mock_shared_words_score_higher() {
        let service = MockEmbedding::new();
        let chunk = service
            .embed("Remote work is allowed 3 days per week.")
            .await
            .unwrap();
        let unrelated = service
            .embed("Expense reports require a receipt for every purchase.")
            .await
            .unwrap();
        let query = service
            .embed("How many remote days are allowed?")
            .await
            .unwrap();

        assert!(cosine(&query, &chunk) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_embed_batch_default_preserves_order() {
        let service = MockEmbedding::new();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let batch = service.embed_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], service.embed("alpha").await.unwrap());
        assert_eq!(batch[1], service.embed("beta").await.unwrap());
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Box<dyn DynEmbeddingService> = Box::new(MockEmbedding::with_dimensions(8));
        assert_eq!(service.dimensions(), 8);
        let vec = service.embed_boxed("boxed").await.unwrap();
        assert_eq!(vec.len(), 8);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(service.embed_batch_boxed(&texts).await.unwrap().len(), 3);
    }

    #[test]
    fn test_build_embedder_by_provider() {
        let mut config = EmbeddingConfig {
            provider: "mock".to_string(),
            dimensions: 32,
            ..EmbeddingConfig::default()
        };
        assert_eq!(build_embedder(&config).unwrap().dimensions(), 32);

        config.provider = "ollama".to_string();
        assert_eq!(build_embedder(&config).unwrap().dimensions(), 32);

        config.provider = "word2vec".to_string();
        assert!(matches!(build_embedder(&config), Err(DocqaError::Config(_))));
    }

    #[test]
    fn test_check_dimensions() {
        assert!(check_dimensions(&[0.0; 4], 4).is_ok());
        let err = check_dimensions(&[0.0; 3], 4).unwrap_err();
        assert!(matches!(err, DocqaError::ServiceUnavailable { .. }));
    }

    #[test]
    fn test_ollama_requires_model() {
        let result = OllamaEmbedding::new("http://localhost:11434", "", 768, RetryPolicy::default());
        assert!(matches!(result, Err(DocqaError::Config(_))));
    }

    #[tokio::test]
    async fn test_ollama_unreachable_is_service_unavailable() {
        // Port 9 (discard) is closed on test machines; connection is refused fast.
        let policy = RetryPolicy::new(std::time::Duration::from_secs(2), 0);
        let service = OllamaEmbedding::new("http://127.0.0.1:9", "nomic-embed-text", 768, policy)
            .unwrap();
        let err = service.embed("hello").await.unwrap_err();
        assert!(matches!(err, DocqaError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_ollama_empty_batch_skips_request() {
        let service = OllamaEmbedding::new(
            "http://127.0.0.1:9",
            "nomic-embed-text",
            768,
            RetryPolicy::default(),
        )
        .unwrap();
        assert!(service.embed_batch(&[]).await.unwrap().is_empty());
    }
}
