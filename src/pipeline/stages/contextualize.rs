//! Question rephrasing against recent chat history.
//!
//! Follow-up questions ("how long does *that* take?") cannot be embedded or
//! retrieved against on their own. This stage asks the rephrase model for a
//! standalone formulation using a bounded window of prior turns. Rephrasing
//! is best-effort: with no history the raw question passes through untouched,
//! and any model failure or timeout falls back to the raw question.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::llm::{ChatModel, rephrase_prompt};
use crate::stage::{Stage, StageContext, StageError, StagePartial};
use crate::state::StateSnapshot;

/// Second stage: produce the standalone question used for retrieval.
pub struct ContextualizeStage {
    model: Arc<dyn ChatModel>,
    max_history_turns: usize,
    timeout: Duration,
}

impl ContextualizeStage {
    pub fn new(model: Arc<dyn ChatModel>, max_history_turns: usize, timeout: Duration) -> Self {
        Self {
            model,
            max_history_turns,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for ContextualizeStage {
    #[instrument(skip(self, snapshot, _ctx), fields(tenant = %snapshot.tenant_id, thread = %snapshot.thread_id))]
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: StageContext,
    ) -> Result<StagePartial, StageError> {
        let question = snapshot.latest_user_question().unwrap_or_default().to_string();
        let history = snapshot.history_window(self.max_history_turns);

        if history.is_empty() {
            debug!("no prior turns; passing raw question through");
            return Ok(StagePartial::new().with_rephrased_question(question));
        }

        let prompt = rephrase_prompt(history, &question);
        let standalone = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await
        {
            Ok(Ok(reply)) => {
                let reply = reply.trim();
                if reply.is_empty() {
                    warn!("rephrase model returned empty reply; keeping raw question");
                    question
                } else {
                    debug!(standalone = %reply, "question rephrased");
                    reply.to_string()
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "rephrase failed; keeping raw question");
                question
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "rephrase timed out; keeping raw question");
                question
            }
        };

        Ok(StagePartial::new().with_rephrased_question(standalone))
    }
}
