//! Semantic cache lookup, the first stage of every invocation.
//!
//! Embeds the raw question and asks the cache store for the tenant's nearest
//! entry. A similarity at or above the configured threshold is a hit: the
//! stage records the cached answer as the assistant turn and the orchestrator
//! short-circuits the rest of the pipeline. The cache is an optimization, so
//! this stage never fails the invocation; any error (embedding, store,
//! timeout, malformed state) degrades to a miss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheError, CacheMatch, SemanticCacheStore};
use crate::embeddings::{EmbeddingError, SharedEmbedder};
use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError, StagePartial};
use crate::state::StateSnapshot;

/// First stage: answer from the semantic cache when possible.
pub struct CacheCheckStage {
    embedder: SharedEmbedder,
    cache: Arc<dyn SemanticCacheStore>,
    similarity_threshold: f32,
    timeout: Duration,
}

#[derive(Debug, Error)]
enum LookupError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("cache lookup timed out after {0:?}")]
    Timeout(Duration),
}

struct Lookup {
    embedding: Vec<f32>,
    nearest: Option<CacheMatch>,
}

impl CacheCheckStage {
    pub fn new(
        embedder: SharedEmbedder,
        cache: Arc<dyn SemanticCacheStore>,
        similarity_threshold: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            cache,
            similarity_threshold,
            timeout,
        }
    }

    async fn lookup(&self, tenant_id: &str, question: &str) -> Result<Lookup, LookupError> {
        let embedding = tokio::time::timeout(self.timeout, self.embedder.embed(question))
            .await
            .map_err(|_| LookupError::Timeout(self.timeout))??;

        let nearest = tokio::time::timeout(
            self.timeout,
            self.cache.query_nearest(tenant_id, &embedding),
        )
        .await
        .map_err(|_| LookupError::Timeout(self.timeout))??;

        Ok(Lookup { embedding, nearest })
    }
}

#[async_trait]
impl Stage for CacheCheckStage {
    #[instrument(skip(self, snapshot, _ctx), fields(tenant = %snapshot.tenant_id, thread = %snapshot.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StageContext,
    ) -> Result<StagePartial, StageError> {
        // A missing user turn is malformed state, but the contract here is
        // "never fail": treat it as an uncacheable empty question.
        let question = snapshot.latest_user_question().unwrap_or_default().to_string();

        match self.lookup(&snapshot.tenant_id, &question).await {
            Ok(Lookup {
                embedding,
                nearest: Some(found),
            }) if found.similarity >= self.similarity_threshold => {
                debug!(
                    similarity = found.similarity,
                    cached_query = %found.query_text,
                    "semantic cache hit"
                );
                Ok(StagePartial::new()
                    .with_is_cache_hit(true)
                    .with_rephrased_question(question)
                    .with_query_embedding(embedding)
                    .with_documents(Vec::new())
                    .with_messages(vec![Message::assistant(&found.response_text)]))
            }
            Ok(Lookup { embedding, nearest }) => {
                debug!(
                    best_similarity = nearest.map(|m| m.similarity),
                    "semantic cache miss"
                );
                Ok(StagePartial::new()
                    .with_is_cache_hit(false)
                    .with_query_embedding(embedding))
            }
            Err(err) => {
                warn!(error = %err, "cache lookup failed; treating as miss");
                // Record the raw question so downstream stages still have a
                // standalone-question fallback if they too degrade.
                Ok(StagePartial::new()
                    .with_is_cache_hit(false)
                    .with_rephrased_question(question))
            }
        }
    }
}
