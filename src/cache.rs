//! Tenant-tagged semantic response cache.
//!
//! The cache maps question embeddings to previously generated answers so that
//! a semantically-equivalent question can be answered without touching the
//! retrieval or generation models. Entries are immutable once written and
//! expire after a TTL; a logical update is a new entry that outscores the old
//! one. The pipeline treats every cache failure as a miss, so implementations
//! should report errors rather than block.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use miette::Diagnostic;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::embeddings::cosine_similarity;

/// Errors from the cache backend.
#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    /// The cache store could not be reached.
    #[error("semantic cache unavailable: {0}")]
    #[diagnostic(
        code(ragline::cache::unavailable),
        help("The pipeline degrades to a cache miss; check the cache backend.")
    )]
    Unavailable(String),

    /// The backend failed while executing an operation.
    #[error("semantic cache operation failed: {0}")]
    #[diagnostic(code(ragline::cache::backend))]
    Backend(String),
}

/// A stored question/answer pair with its embedding and lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Backend key, a fresh v4 UUID per write.
    pub key: String,
    /// Owning tenant; lookups never cross this boundary.
    pub tenant_id: String,
    /// The raw question that produced the answer.
    pub query_text: String,
    /// The full generated answer.
    pub response_text: String,
    /// Embedding of `query_text`.
    pub embedding: Vec<f32>,
    /// Write time.
    pub created_at: DateTime<Utc>,
    /// Expiry time; entries at or past this instant are ignored and pruned.
    pub expires_at: DateTime<Utc>,
}

/// The nearest stored entry for a lookup, before thresholding.
///
/// The store reports the best candidate and its similarity; deciding whether
/// that counts as a hit is the caller's policy.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheMatch {
    /// Cosine similarity between the lookup embedding and the stored entry.
    pub similarity: f32,
    /// The stored question.
    pub query_text: String,
    /// The stored answer.
    pub response_text: String,
}

/// Storage seam for the semantic cache.
#[async_trait]
pub trait SemanticCacheStore: Send + Sync {
    /// The most similar unexpired entry for `tenant_id`, or `None` when the
    /// tenant has no live entries.
    async fn query_nearest(
        &self,
        tenant_id: &str,
        embedding: &[f32],
    ) -> Result<Option<CacheMatch>, CacheError>;

    /// Write a new entry; returns the backend key.
    async fn insert(
        &self,
        tenant_id: &str,
        embedding: Vec<f32>,
        query_text: &str,
        response_text: &str,
        ttl: Duration,
    ) -> Result<String, CacheError>;
}

/// In-memory cache store for tests, demos, and single-process deployments.
///
/// Linear scan over the tenant's entries; fine for the entry counts a single
/// process holds. Expired entries are pruned opportunistically on access.
#[derive(Debug, Default)]
pub struct MemorySemanticCache {
    entries: RwLock<Vec<CacheEntry>>,
}

impl MemorySemanticCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries across all tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.read().iter().filter(|e| e.expires_at > now).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_expired(entries: &mut Vec<CacheEntry>) {
        let now = Utc::now();
        entries.retain(|e| e.expires_at > now);
    }
}

#[async_trait]
impl SemanticCacheStore for MemorySemanticCache {
    async fn query_nearest(
        &self,
        tenant_id: &str,
        embedding: &[f32],
    ) -> Result<Option<CacheMatch>, CacheError> {
        let mut entries = self.entries.write();
        Self::prune_expired(&mut entries);

        let best = entries
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| CacheMatch {
                similarity: cosine_similarity(&entry.embedding, embedding),
                query_text: entry.query_text.clone(),
                response_text: entry.response_text.clone(),
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));
        Ok(best)
    }

    async fn insert(
        &self,
        tenant_id: &str,
        embedding: Vec<f32>,
        query_text: &str,
        response_text: &str,
        ttl: Duration,
    ) -> Result<String, CacheError> {
        let key = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let entry = CacheEntry {
            key: key.clone(),
            tenant_id: tenant_id.to_string(),
            query_text: query_text.to_string(),
            response_text: response_text.to_string(),
            embedding,
            created_at: now,
            expires_at,
        };

        let mut entries = self.entries.write();
        Self::prune_expired(&mut entries);
        entries.push(entry);
        Ok(key)
    }
}
