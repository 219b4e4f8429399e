//! Embedding providers and the shared, lazily-initialized embedder handle.
//!
//! One embedding model serves every stage of a pipeline (cache lookup, cache
//! write, and retrieval must agree on the vector space). [`SharedEmbedder`]
//! wraps the provider in an async once-cell so the model is loaded at most
//! once per process, on first use, without a process-global.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::OnceCell;

/// Dimensionality of the embedding space shared by the cache and the index.
pub const EMBEDDING_DIM: usize = 384;

/// Errors from embedding providers.
#[derive(Debug, Error, Diagnostic)]
pub enum EmbeddingError {
    /// The provider could not be reached or initialized.
    #[error("embedding provider unavailable: {0}")]
    #[diagnostic(
        code(ragline::embeddings::unavailable),
        help("Check that the embedding backend is running and reachable.")
    )]
    Unavailable(String),

    /// The provider responded but the response was unusable.
    #[error("embedding request failed: {0}")]
    #[diagnostic(code(ragline::embeddings::backend))]
    Backend(String),

    /// The provider returned a vector of the wrong dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(ragline::embeddings::dimension_mismatch),
        help("The cache and index only accept vectors of the configured dimension.")
    )]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A model that maps text to fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Dimensionality of the vectors this provider produces.
    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

type ProviderFactory =
    dyn Fn() -> BoxFuture<'static, Result<Arc<dyn EmbeddingProvider>, EmbeddingError>>
        + Send
        + Sync;

/// Cheaply cloneable handle to a lazily-initialized [`EmbeddingProvider`].
///
/// The first `embed` call runs the factory under mutual exclusion; concurrent
/// callers wait for that single initialization rather than racing their own.
/// Subsequent calls reuse the cached provider.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ragline::embeddings::{MockEmbeddingProvider, SharedEmbedder};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let embedder = SharedEmbedder::from_provider(Arc::new(MockEmbeddingProvider::default()));
/// let vector = embedder.embed("refund policy").await.unwrap();
/// assert_eq!(vector.len(), 384);
/// # });
/// ```
#[derive(Clone)]
pub struct SharedEmbedder {
    inner: Arc<SharedEmbedderInner>,
}

struct SharedEmbedderInner {
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
    factory: Box<ProviderFactory>,
}

impl SharedEmbedder {
    /// Handle that initializes the provider on first use via `factory`.
    pub fn lazy<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn EmbeddingProvider>, EmbeddingError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(SharedEmbedderInner {
                cell: OnceCell::new(),
                factory: Box::new(move || factory().boxed()),
            }),
        }
    }

    /// Handle around an already-constructed provider.
    pub fn from_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner: Arc::new(SharedEmbedderInner {
                cell: OnceCell::new_with(Some(provider)),
                // Never invoked: the cell is already populated.
                factory: Box::new(|| {
                    std::future::ready(Err(EmbeddingError::Unavailable(
                        "no embedding provider factory configured".into(),
                    )))
                    .boxed()
                }),
            }),
        }
    }

    /// Embed `text`, initializing the underlying provider if needed.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let provider = self
            .inner
            .cell
            .get_or_try_init(|| (self.inner.factory)())
            .await?;
        provider.embed(text).await
    }

    /// Dimensionality of the configured provider, if it is initialized yet.
    pub fn dimensions(&self) -> Option<usize> {
        self.inner.cell.get().map(|p| p.dimensions())
    }
}

impl std::fmt::Debug for SharedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEmbedder")
            .field("initialized", &self.inner.cell.initialized())
            .finish()
    }
}

/// Cosine similarity in `[-1, 1]`; `0.0` for mismatched lengths or zero
/// vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

/// Deterministic, dependency-free embedding provider for tests and demos.
///
/// Hashes each whitespace/punctuation-delimited token into one of the 384
/// components (bag-of-words style) and L2-normalizes, so identical texts embed
/// identically (cosine similarity 1.0) while unrelated texts land far apart.
/// Not a real semantic model; do not use in production.
#[derive(Clone, Debug, Default)]
pub struct MockEmbeddingProvider {
    _private: (),
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous embedding, usable from non-async test helpers.
    #[must_use]
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = rustc_hash::FxHasher::default();
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let slot = (h % EMBEDDING_DIM as u64) as usize;
            let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Empty input gets a fixed unit vector so lookups stay well-defined.
            vector[0] = 1.0;
        } else {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cosine_similarity_basics() {
        let a = [1.0, 0.0, 0.0];
        let b = [0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &[-1.0, 0.0, 0.0]), -1.0);
        // degenerate inputs
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("What is your refund policy?").await.unwrap();
        let b = provider.embed("What is your refund policy?").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn mock_provider_separates_unrelated_texts() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("What is your refund policy?").await.unwrap();
        let b = provider
            .embed("zebra quantum umbrella nineteen")
            .await
            .unwrap();
        assert!(cosine_similarity(&a, &b) < 0.5);
    }

    #[test]
    fn mock_provider_handles_empty_text() {
        let v = MockEmbeddingProvider::new().embed_sync("");
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn shared_embedder_initializes_factory_once() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let embedder = SharedEmbedder::lazy(|| async {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockEmbeddingProvider::new()) as Arc<dyn EmbeddingProvider>)
        });
        assert_eq!(embedder.dimensions(), None);

        embedder.embed("first").await.unwrap();
        embedder.embed("second").await.unwrap();
        embedder.clone().embed("third").await.unwrap();

        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.dimensions(), Some(EMBEDDING_DIM));
    }

    #[tokio::test]
    async fn shared_embedder_retries_failed_initialization() {
        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

        let embedder = SharedEmbedder::lazy(|| async {
            if ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EmbeddingError::Unavailable("cold start".into()))
            } else {
                Ok(Arc::new(MockEmbeddingProvider::new()) as Arc<dyn EmbeddingProvider>)
            }
        });

        assert!(embedder.embed("first").await.is_err());
        assert!(embedder.embed("second").await.is_ok());
        assert_eq!(ATTEMPTS.load(Ordering::SeqCst), 2);
    }
}
