//! Tenant-partitioned vector search over ingested document chunks.
//!
//! The pipeline only reads from the index; ingestion (chunking, PDF
//! extraction, file storage) happens elsewhere and lands rows behind the
//! [`DocumentIndex`] seam. Every query is scoped to a tenant; there is no
//! unfiltered search entry point.

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embeddings::cosine_similarity;

/// Errors from the document index backend.
#[derive(Debug, Error, Diagnostic)]
pub enum IndexError {
    /// The index has not been initialized or cannot be reached.
    #[error("document index unavailable: {0}")]
    #[diagnostic(
        code(ragline::index::unavailable),
        help("Check that the vector store is initialized before serving traffic.")
    )]
    Unavailable(String),

    /// The backend failed while executing a query.
    #[error("document index query failed: {0}")]
    #[diagnostic(code(ragline::index::backend))]
    Backend(String),
}

/// An ingested chunk as stored in the index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Owning tenant; search never crosses this boundary.
    pub tenant_id: String,
    /// Source file this chunk was extracted from.
    pub file_id: String,
    /// Chunk text.
    pub content: String,
    /// Embedding of `content`.
    pub embedding: Vec<f32>,
    /// Source metadata (filename, page, ...).
    pub metadata: serde_json::Value,
}

impl DocumentChunk {
    pub fn new(
        tenant_id: impl Into<String>,
        file_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            file_id: file_id.into(),
            content: content.into(),
            embedding,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attach source metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A search result handed to the generation stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Chunk text.
    pub content: String,
    /// Source metadata carried through from the stored chunk.
    pub metadata: serde_json::Value,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
}

/// Read-side seam over the vector store.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Top-`top_k` chunks for `tenant_id` by similarity to `embedding`,
    /// most similar first. An empty result is a valid answer, not an error.
    async fn search(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError>;
}

/// In-memory index for tests, demos, and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryDocumentIndex {
    chunks: RwLock<Vec<DocumentChunk>>,
}

impl MemoryDocumentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk to the index.
    pub fn insert(&self, chunk: DocumentChunk) {
        self.chunks.write().push(chunk);
    }

    /// Add several chunks at once.
    pub fn insert_all(&self, chunks: impl IntoIterator<Item = DocumentChunk>) {
        self.chunks.write().extend(chunks);
    }

    /// Number of stored chunks across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

#[async_trait]
impl DocumentIndex for MemoryDocumentIndex {
    async fn search(
        &self,
        tenant_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, IndexError> {
        let chunks = self.chunks.read();
        let mut scored: Vec<RetrievedChunk> = chunks
            .iter()
            .filter(|chunk| chunk.tenant_id == tenant_id)
            .map(|chunk| RetrievedChunk {
                content: chunk.content.clone(),
                metadata: chunk.metadata.clone(),
                score: cosine_similarity(&chunk.embedding, embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;

    fn chunk(tenant: &str, content: &str) -> DocumentChunk {
        let embedding = MockEmbeddingProvider::new().embed_sync(content);
        DocumentChunk::new(tenant, "file-1", content, embedding)
    }

    #[tokio::test]
    async fn search_is_tenant_scoped() {
        let index = MemoryDocumentIndex::new();
        index.insert(chunk("tenant-a", "refunds are processed in 5 days"));
        index.insert(chunk("tenant-b", "refunds are processed in 5 days"));

        let query = MockEmbeddingProvider::new().embed_sync("refunds");
        let results = index.search("tenant-a", &query, 4).await.unwrap();
        assert_eq!(results.len(), 1);

        let results = index.search("tenant-c", &query, 4).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_orders_by_similarity_and_truncates() {
        let index = MemoryDocumentIndex::new();
        index.insert_all([
            chunk("t", "shipping times and delivery estimates"),
            chunk("t", "refund policy and return windows"),
            chunk("t", "office parking instructions"),
        ]);

        let query = MockEmbeddingProvider::new().embed_sync("refund policy");
        let results = index.search("t", &query, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert!(results[0].content.contains("refund policy"));
    }

    #[tokio::test]
    async fn empty_index_returns_empty_not_error() {
        let index = MemoryDocumentIndex::new();
        let query = MockEmbeddingProvider::new().embed_sync("anything");
        let results = index.search("t", &query, 4).await.unwrap();
        assert!(results.is_empty());
    }
}
