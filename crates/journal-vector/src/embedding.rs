//! Embedding service trait and implementations.
//!
//! - `OnnxEmbeddingService` loads a sentence-transformer ONNX model (e.g.
//!   all-MiniLM-L6-v2) via ort and tokenizes with the HuggingFace tokenizers
//!   crate. This is the production embedding backend.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.
//! - `TimeoutEmbedding` bounds any backend with a per-call deadline.
//!
//! Every failure surfaces as [`JournalError::EmbeddingProvider`]; nothing here
//! retries.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use journal_core::error::{JournalError, Result};
use ort::session::Session;
use ort::value::TensorRef;
use tokenizers::Tokenizer;
use tracing::info;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors that capture
/// semantic meaning. The same service must be used to build an index and to
/// query it, so that the dimensions agree.
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed several texts, one vector per text in input order.
    ///
    /// The default embeds one text at a time. Backends with real batch
    /// inference override it.
    fn embed_batch(&self, texts: &[&str]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send {
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

/// Object-safe version of [`EmbeddingService`] for dynamic dispatch.
///
/// `EmbeddingService::embed` returns `impl Future`, which is not object-safe.
/// This trait boxes the future so `Arc<dyn DynEmbeddingService>` can be shared
/// between the index builder, the retriever and the clusterer.
pub trait DynEmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>>;

    /// Embed a batch of texts (boxed future).
    fn embed_batch_boxed<'a>(
        &'a self,
        texts: &'a [&'a str],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>>;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

impl<T: EmbeddingService> DynEmbeddingService for T {
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<f32>>> + Send + 'a>> {
        Box::pin(self.embed(text))
    }

    fn embed_batch_boxed<'a>(
        &'a self,
        texts: &'a [&'a str],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Vec<f32>>>> + Send + 'a>> {
        Box::pin(self.embed_batch(texts))
    }

    fn dimensions(&self) -> usize {
        EmbeddingService::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// OnnxEmbeddingService - sentence-transformer inference via ONNX Runtime
// ---------------------------------------------------------------------------

/// Fallback width when the model does not declare its hidden size.
const MINILM_DIMENSIONS: usize = 384;

/// Sentence-transformer embeddings (all-MiniLM-L6-v2 by default) computed
/// with ONNX Runtime.
///
/// A model directory holds `model.onnx` and `tokenizer.json`. A batch is
/// tokenized together, padded to its longest sequence and run through the
/// model in one pass. Each row is mean-pooled over its real tokens and
/// L2-normalised.
#[derive(Clone)]
pub struct OnnxEmbeddingService {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    dimensions: usize,
}

// ort::Session is Send + Sync internally (uses Arc<SharedSessionInner>).
unsafe impl Send for OnnxEmbeddingService {}
unsafe impl Sync for OnnxEmbeddingService {}

impl std::fmt::Debug for OnnxEmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmbeddingService")
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

fn provider_err(context: &str, e: impl std::fmt::Display) -> JournalError {
    JournalError::EmbeddingProvider(format!("{}: {}", context, e))
}

impl OnnxEmbeddingService {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn from_directory(model_dir: &Path) -> Result<Self> {
        Self::from_files(
            &model_dir.join("model.onnx"),
            &model_dir.join("tokenizer.json"),
        )
    }

    pub fn from_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        for (what, path) in [("ONNX model", model_path), ("Tokenizer", tokenizer_path)] {
            if !path.exists() {
                return Err(JournalError::EmbeddingProvider(format!(
                    "{} not found at {}",
                    what,
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e| provider_err("ONNX session builder", e))?
            .with_intra_threads(1)
            .map_err(|e| provider_err("ONNX set threads", e))?
            .commit_from_file(model_path)
            .map_err(|e| provider_err("ONNX load model", e))?;

        // Output 0 is token embeddings, [batch, seq_len, hidden].
        let dimensions = session
            .outputs()
            .first()
            .and_then(|out| out.dtype().tensor_shape())
            .and_then(|shape| shape.last().copied())
            .and_then(|d| usize::try_from(d).ok())
            .filter(|&d| d > 0)
            .unwrap_or(MINILM_DIMENSIONS);

        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| provider_err("Failed to load tokenizer", e))?;

        info!(
            model = %model_path.display(),
            dimensions,
            "Loaded ONNX embedding model"
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            dimensions,
        })
    }

    /// Inference is CPU-bound, so batches run on the blocking pool.
    async fn run_blocking(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let svc = self.clone();
        tokio::task::spawn_blocking(move || svc.embed_batch_sync(&texts))
            .await
            .map_err(|e| provider_err("Embedding task panicked", e))?
    }

    fn embed_batch_sync(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(JournalError::EmbeddingProvider(format!(
                "Cannot embed empty text (batch position {})",
                pos
            )));
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.iter().map(String::as_str).collect::<Vec<_>>(), true)
            .map_err(|e| provider_err("Tokenization failed", e))?;

        let batch = encodings.len();
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        // Zero padding: pad positions carry mask 0 and drop out of pooling.
        let mut ids = ndarray::Array2::<i64>::zeros((batch, seq_len));
        let mut mask = ndarray::Array2::<i64>::zeros((batch, seq_len));
        let mut types = ndarray::Array2::<i64>::zeros((batch, seq_len));
        for (row, encoding) in encodings.iter().enumerate() {
            let tokens = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids());
            for (col, ((&id, &m), &t)) in tokens.enumerate() {
                ids[[row, col]] = i64::from(id);
                mask[[row, col]] = i64::from(m);
                types[[row, col]] = i64::from(t);
            }
        }

        let ids_ref =
            TensorRef::from_array_view(&ids).map_err(|e| provider_err("TensorRef input_ids", e))?;
        let mask_ref = TensorRef::from_array_view(&mask)
            .map_err(|e| provider_err("TensorRef attention_mask", e))?;
        let type_ref = TensorRef::from_array_view(&types)
            .map_err(|e| provider_err("TensorRef token_type_ids", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| provider_err("Session lock poisoned", e))?;
        let outputs = session
            .run(ort::inputs![ids_ref, mask_ref, type_ref])
            .map_err(|e| provider_err("ONNX inference failed", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| provider_err("Extract embeddings", e))?;
        let shape: Vec<i64> = shape.iter().copied().collect();
        let hidden = match shape.as_slice() {
            [b, s, h] if *b == batch as i64 && *s == seq_len as i64 && *h > 0 => *h as usize,
            other => {
                return Err(JournalError::EmbeddingProvider(format!(
                    "Unexpected output shape {:?} for batch of {} x {}",
                    other, batch, seq_len
                )))
            }
        };

        let row_len = seq_len * hidden;
        Ok((0..batch)
            .map(|row| {
                mean_pool(
                    &data[row * row_len..(row + 1) * row_len],
                    mask.row(row).iter().copied(),
                    hidden,
                )
            })
            .collect())
    }
}

impl EmbeddingService for OnnxEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.run_blocking(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| JournalError::EmbeddingProvider("Model returned no embedding".into()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.run_blocking(texts.iter().map(|t| t.to_string()).collect())
            .await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Masked mean over the token rows of one sequence, L2-normalised.
///
/// `tokens` is `seq_len * hidden` values, row-major.
fn mean_pool(tokens: &[f32], mask: impl Iterator<Item = i64>, hidden: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; hidden];
    let mut count = 0usize;

    for (token, m) in tokens.chunks_exact(hidden).zip(mask) {
        if m > 0 {
            for (slot, v) in pooled.iter_mut().zip(token) {
                *slot += v;
            }
            count += 1;
        }
    }

    if count > 0 {
        let n = count as f32;
        for v in &mut pooled {
            *v /= n;
        }
    }
    l2_normalize(&mut pooled);
    pooled
}

fn l2_normalize(values: &mut [f32]) {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for val in values {
            *val /= norm;
        }
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic unit vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs. Texts that differ share no structure, so
/// this backend is only useful for plumbing and determinism checks.
#[derive(Debug, Clone)]
pub struct MockEmbedding {
    dimensions: usize,
}

impl MockEmbedding {
    /// A 384-dimensional mock, matching all-MiniLM-L6-v2.
    pub fn new() -> Self {
        Self::with_dimensions(384)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_to_vector(&self, text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(self.dimensions);
        for i in 0..self.dimensions {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }
        l2_normalize(&mut result);
        result
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(JournalError::EmbeddingProvider(
                "Cannot embed empty text".to_string(),
            ));
        }
        Ok(self.hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// TimeoutEmbedding - caller-side deadline for slow providers
// ---------------------------------------------------------------------------

/// Wraps a backend so each `embed` call fails after `limit` elapses.
///
/// Expiry is reported as an embedding provider error; the call is not retried.
#[derive(Debug, Clone)]
pub struct TimeoutEmbedding<E> {
    inner: E,
    limit: Duration,
}

impl<E: EmbeddingService> TimeoutEmbedding<E> {
    pub fn new(inner: E, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: EmbeddingService> EmbeddingService for TimeoutEmbedding<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match tokio::time::timeout(self.limit, self.inner.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(JournalError::EmbeddingProvider(format!(
                "embedding timed out after {:?}",
                self.limit
            ))),
        }
    }

    /// The whole batch shares one deadline of `limit` per text.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let per_text = u32::try_from(texts.len().max(1)).unwrap_or(u32::MAX);
        let budget = self.limit.saturating_mul(per_text);
        match tokio::time::timeout(budget, self.inner.embed_batch(texts)).await {
            Ok(result) => result,
            Err(_) => Err(JournalError::EmbeddingProvider(format!(
                "embedding batch of {} timed out after {:?}",
                texts.len(),
                budget
            ))),
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedding_dimension() {
        let service = MockEmbedding::new();
        let vec = service.embed("hello world").await.unwrap();
        assert_eq!(vec.len(), 384);

        let small = MockEmbedding::with_dimensions(8);
        assert_eq!(small.embed("hello").await.unwrap().len(), 8);
        assert_eq!(EmbeddingService::dimensions(&small), 8);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("same text").await.unwrap();
        let v2 = service.embed("same text").await.unwrap();
        assert_eq!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new();
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::new();
        let result = service.embed("   ").await;
        assert!(matches!(result, Err(JournalError::EmbeddingProvider(_))));
    }

    #[tokio::test]
    async fn test_mock_embedding_unit_length() {
        let service = MockEmbedding::new();
        let vec = service.embed("test range").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_dyn_dispatch() {
        let service: Arc<dyn DynEmbeddingService> = Arc::new(MockEmbedding::with_dimensions(4));
        let vec = service.embed_boxed("boxed").await.unwrap();
        assert_eq!(vec.len(), 4);
        assert_eq!(service.dimensions(), 4);
    }

    struct SlowEmbedding;

    impl EmbeddingService for SlowEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![0.0; 2])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_timeout_embedding_expires() {
        let service = TimeoutEmbedding::new(SlowEmbedding, Duration::from_millis(10));
        let err = service.embed("anything").await.unwrap_err();
        assert!(matches!(err, JournalError::EmbeddingProvider(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_embedding_passes_through() {
        let service = TimeoutEmbedding::new(MockEmbedding::new(), Duration::from_secs(5));
        let direct = MockEmbedding::new().embed("pass").await.unwrap();
        assert_eq!(service.embed("pass").await.unwrap(), direct);
        assert_eq!(EmbeddingService::dimensions(&service), 384);
    }

    #[tokio::test]
    async fn test_default_batch_keeps_order() {
        let service = MockEmbedding::with_dimensions(8);
        let batch = service.embed_batch(&["first", "second"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], service.embed("first").await.unwrap());
        assert_eq!(batch[1], service.embed("second").await.unwrap());
    }

    #[tokio::test]
    async fn test_default_batch_stops_at_first_failure() {
        let service = MockEmbedding::with_dimensions(8);
        let err = service.embed_batch(&["ok", " ", "never"]).await.unwrap_err();
        assert!(matches!(err, JournalError::EmbeddingProvider(_)));
    }

    #[tokio::test]
    async fn test_timeout_embedding_bounds_batches() {
        let service = TimeoutEmbedding::new(SlowEmbedding, Duration::from_millis(10));
        let err = service.embed_batch(&["a", "b"]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_mean_pool_ignores_padding() {
        // Two real tokens and one pad token of width 2.
        let tokens = [1.0, 0.0, 3.0, 0.0, 100.0, 100.0];
        let pooled = mean_pool(&tokens, [1i64, 1, 0].into_iter(), 2);
        assert_eq!(pooled, vec![1.0, 0.0]);
    }

    #[test]
    fn test_mean_pool_all_masked() {
        let pooled = mean_pool(&[5.0, 5.0], [0i64].into_iter(), 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn test_onnx_missing_model() {
        let result = OnnxEmbeddingService::from_directory(Path::new("/nonexistent"));
        assert!(matches!(result, Err(JournalError::EmbeddingProvider(_))));
    }
}
