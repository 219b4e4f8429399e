//! Streaming answer generation and the best-effort cache write.
//!
//! Builds the answer prompt from the retrieved context and the standalone
//! question, streams the model's reply to the client fragment by fragment,
//! and appends the assembled answer to the thread history. After a successful
//! generation on a cache miss, the full answer is written back to the
//! semantic cache keyed by the raw question's embedding; that write is
//! best-effort and never fails the invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, instrument, warn};

use crate::cache::SemanticCacheStore;
use crate::llm::{ChatModel, answer_prompt, format_context};
use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError, StagePartial};
use crate::state::StateSnapshot;

/// Final stage: stream the answer and persist it.
pub struct GenerateStage {
    model: Arc<dyn ChatModel>,
    cache: Arc<dyn SemanticCacheStore>,
    cache_ttl: Duration,
    max_context_chars: usize,
}

impl GenerateStage {
    pub fn new(
        model: Arc<dyn ChatModel>,
        cache: Arc<dyn SemanticCacheStore>,
        cache_ttl: Duration,
        max_context_chars: usize,
    ) -> Self {
        Self {
            model,
            cache,
            cache_ttl,
            max_context_chars,
        }
    }

    async fn write_back(&self, snapshot: &StateSnapshot, raw_question: &str, response: &str) {
        let Some(embedding) = snapshot.query_embedding.clone() else {
            debug!("no query embedding captured this invocation; skipping cache write");
            return;
        };
        match self
            .cache
            .insert(
                &snapshot.tenant_id,
                embedding,
                raw_question,
                response,
                self.cache_ttl,
            )
            .await
        {
            Ok(key) => debug!(%key, "response cached"),
            Err(err) => warn!(error = %err, "cache write failed; response served anyway"),
        }
    }
}

#[async_trait]
impl Stage for GenerateStage {
    #[instrument(skip(self, snapshot, ctx), fields(tenant = %snapshot.tenant_id, thread = %snapshot.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: StageContext,
    ) -> Result<StagePartial, StageError> {
        let raw_question = snapshot
            .latest_user_question()
            .ok_or(StageError::MissingInput {
                what: "user question",
            })?
            .to_string();
        let question = snapshot
            .rephrased_question
            .clone()
            .unwrap_or_else(|| raw_question.clone());

        let context = format_context(&snapshot.documents, self.max_context_chars);
        let prompt = answer_prompt(&context, &question);

        let mut stream =
            self.model
                .stream_complete(&prompt)
                .await
                .map_err(|err| StageError::Provider {
                    provider: "chat-model",
                    message: err.to_string(),
                })?;

        let mut response = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|err| StageError::Provider {
                provider: "chat-model",
                message: err.to_string(),
            })?;
            if fragment.is_empty() {
                continue;
            }
            ctx.emit_token(&fragment)?;
            response.push_str(&fragment);
        }
        debug!(chars = response.len(), "generation complete");

        // Routing already ends hit invocations before this stage; the guard
        // stays because a hit must never overwrite its own cache entry.
        if !snapshot.is_cache_hit {
            self.write_back(&snapshot, &raw_question, &response).await;
        }

        Ok(StagePartial::new().with_messages(vec![Message::assistant(&response)]))
    }
}
