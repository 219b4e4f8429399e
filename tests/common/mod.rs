//! Shared fixtures for the pipeline integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use ragline::cache::{CacheError, CacheMatch, MemorySemanticCache, SemanticCacheStore};
use ragline::embeddings::{
    EmbeddingError, EmbeddingProvider, MockEmbeddingProvider, SharedEmbedder,
};
use ragline::events::ChatEvent;
use ragline::index::{DocumentChunk, MemoryDocumentIndex};
use ragline::llm::{ChatModel, LlmError, StaticChatModel, TokenStream};
use ragline::pipeline::Pipeline;

/// Chat model that serves a fixed reply and counts invocations per role.
pub struct CountingChatModel {
    inner: StaticChatModel,
    pub complete_calls: Arc<AtomicUsize>,
    pub stream_calls: Arc<AtomicUsize>,
}

impl CountingChatModel {
    pub fn new(reply: &str) -> Self {
        Self {
            inner: StaticChatModel::new(reply),
            complete_calls: Arc::new(AtomicUsize::new(0)),
            stream_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn completions(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for CountingChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.complete(prompt).await
    }

    async fn stream_complete(&self, prompt: &str) -> Result<TokenStream, LlmError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.stream_complete(prompt).await
    }
}

/// Cache store whose every operation fails.
pub struct FailingCache;

#[async_trait]
impl SemanticCacheStore for FailingCache {
    async fn query_nearest(
        &self,
        _tenant_id: &str,
        _embedding: &[f32],
    ) -> Result<Option<CacheMatch>, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn insert(
        &self,
        _tenant_id: &str,
        _embedding: Vec<f32>,
        _query_text: &str,
        _response_text: &str,
        _ttl: Duration,
    ) -> Result<String, CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }
}

/// Embedding provider whose every call fails.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("model not loaded".into()))
    }
}

/// Mock-backed shared embedder.
pub fn mock_embedder() -> SharedEmbedder {
    SharedEmbedder::from_provider(Arc::new(MockEmbeddingProvider::new()))
}

/// Index seeded with one chunk per text, all owned by `tenant`.
pub fn seeded_index(tenant: &str, texts: &[&str]) -> Arc<MemoryDocumentIndex> {
    let index = Arc::new(MemoryDocumentIndex::new());
    let mock = MockEmbeddingProvider::new();
    for (i, text) in texts.iter().enumerate() {
        index.insert(
            DocumentChunk::new(tenant, format!("file-{i}"), *text, mock.embed_sync(text))
                .with_metadata(serde_json::json!({"file": format!("file-{i}")})),
        );
    }
    index
}

/// Standard test pipeline: mock embedder, in-memory cache and checkpoints,
/// the given index, and counting models for both roles.
pub struct TestRig {
    pub pipeline: Pipeline,
    pub cache: Arc<MemorySemanticCache>,
    pub rephraser: Arc<CountingChatModel>,
    pub generator: Arc<CountingChatModel>,
}

pub fn test_rig(index: Arc<MemoryDocumentIndex>, answer: &str) -> TestRig {
    let cache = Arc::new(MemorySemanticCache::new());
    let rephraser = Arc::new(CountingChatModel::new("standalone question"));
    let generator = Arc::new(CountingChatModel::new(answer));

    let pipeline = Pipeline::builder()
        .with_embedder(mock_embedder())
        .with_cache(cache.clone())
        .with_document_index(index)
        .with_rephraser(rephraser.clone())
        .with_generator(generator.clone())
        .build()
        .unwrap();

    TestRig {
        pipeline,
        cache,
        rephraser,
        generator,
    }
}

/// Concatenation of all token events, in order.
pub fn streamed_text(events: &[ChatEvent]) -> String {
    events
        .iter()
        .filter_map(|e| e.as_token().map(str::to_string))
        .collect()
}

/// Assert the universal stream contract: exactly one end event, positioned
/// last.
pub fn assert_terminated(events: &[ChatEvent]) {
    let ends = events.iter().filter(|e| e.is_end()).count();
    assert_eq!(ends, 1, "expected exactly one end event, got {events:?}");
    assert!(
        events.last().is_some_and(ChatEvent::is_end),
        "end event must come last: {events:?}"
    );
}
