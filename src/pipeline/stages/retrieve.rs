//! Tenant-scoped document retrieval for the standalone question.
//!
//! Embeds the standalone question (reusing the cache-check embedding when the
//! question was not rephrased) and pulls the top-k most similar chunks from
//! the tenant's slice of the document index. Unlike the cache and rephrase
//! stages there is no fallback here: answering without retrieval would invite
//! hallucinated support answers, so failures are fatal for the invocation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::embeddings::SharedEmbedder;
use crate::index::DocumentIndex;
use crate::stage::{Stage, StageContext, StageError, StagePartial};
use crate::state::StateSnapshot;

/// Third stage: fetch grounding context for generation.
pub struct RetrieveStage {
    index: Arc<dyn DocumentIndex>,
    embedder: SharedEmbedder,
    top_k: usize,
}

impl RetrieveStage {
    pub fn new(index: Arc<dyn DocumentIndex>, embedder: SharedEmbedder, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            top_k,
        }
    }
}

#[async_trait]
impl Stage for RetrieveStage {
    #[instrument(skip(self, snapshot, _ctx), fields(tenant = %snapshot.tenant_id, thread = %snapshot.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StageContext,
    ) -> Result<StagePartial, StageError> {
        let question = snapshot
            .rephrased_question
            .clone()
            .ok_or(StageError::MissingInput {
                what: "standalone question",
            })?;

        // The cache-check embedding is of the raw question; it is only valid
        // here when rephrasing left the question unchanged.
        let raw_question = snapshot.latest_user_question().unwrap_or_default();
        let embedding = match &snapshot.query_embedding {
            Some(existing) if question == raw_question => {
                debug!("reusing cache-check embedding for retrieval");
                existing.clone()
            }
            _ => self.embedder.embed(&question).await?,
        };

        let documents = self
            .index
            .search(&snapshot.tenant_id, &embedding, self.top_k)
            .await?;
        debug!(count = documents.len(), "retrieved document chunks");

        Ok(StagePartial::new().with_documents(documents))
    }
}
