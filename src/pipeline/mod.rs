//! The invocation orchestrator.
//!
//! [`Pipeline`] wires the four stages to their collaborators and drives one
//! invocation per call to [`Pipeline::stream`]: load the thread checkpoint,
//! append the user turn, walk the stage state machine, and emit
//! [`ChatEvent`]s to the returned [`EventStream`]. The walk itself is the
//! pure [`next_stage`] function so routing is testable without any I/O.
//!
//! ```text
//!  START ──► CHECK_CACHE ──hit──► END
//!                │ miss
//!                ▼
//!          CONTEXTUALIZE ──► RETRIEVE ──► GENERATE ──► END
//! ```

pub mod stages;

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use crate::cache::SemanticCacheStore;
use crate::checkpoint::{Checkpointer, CheckpointerError, InMemoryCheckpointer, PersistedConversation};
use crate::config::PipelineConfig;
use crate::embeddings::SharedEmbedder;
use crate::events::{ChatEvent, EventStream};
use crate::index::DocumentIndex;
use crate::llm::ChatModel;
use crate::message::Message;
use crate::stage::{Stage, StageContext, StageError};
use crate::state::ConversationState;

use stages::{CacheCheckStage, ContextualizeStage, GenerateStage, RetrieveStage};

/// What the client sees when an invocation fails; detail stays in tracing.
const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// Progress notice emitted at the start of every invocation.
const WORKING_STATUS: &str = "Retrieving documents...";

/// The stages of the invocation state machine, in routing order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    CheckCache,
    Contextualize,
    Retrieve,
    Generate,
}

impl StageKind {
    /// Stable name used in tracing fields and error reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::CheckCache => "check_cache",
            StageKind::Contextualize => "contextualize",
            StageKind::Retrieve => "retrieve",
            StageKind::Generate => "generate",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure routing function of the state machine: the stage after `current`,
/// or `None` when the invocation ends. `cache_hit` is the merged flag after
/// applying `current`'s partial.
#[must_use]
pub fn next_stage(current: StageKind, cache_hit: bool) -> Option<StageKind> {
    match current {
        StageKind::CheckCache if cache_hit => None,
        StageKind::CheckCache => Some(StageKind::Contextualize),
        StageKind::Contextualize => Some(StageKind::Retrieve),
        StageKind::Retrieve => Some(StageKind::Generate),
        StageKind::Generate => None,
    }
}

/// Fatal invocation errors. These end the stream with a generic error event;
/// the typed detail is logged server-side only.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    /// The thread's checkpoint could not be loaded.
    #[error("checkpoint load failed for thread {thread_id}: {source}")]
    #[diagnostic(
        code(ragline::pipeline::checkpoint_load),
        help("Serving without stored history could leak context across a corrupt row; failing instead.")
    )]
    CheckpointLoad {
        thread_id: String,
        source: CheckpointerError,
    },

    /// The caller's tenant does not own the requested thread.
    #[error("thread {thread_id} belongs to a different tenant")]
    #[diagnostic(
        code(ragline::pipeline::tenant_mismatch),
        help("Thread tenancy is immutable; use a new thread_id for this tenant.")
    )]
    TenantMismatch { thread_id: String },

    /// A stage failed fatally.
    #[error("stage {stage} failed: {source}")]
    #[diagnostic(code(ragline::pipeline::stage))]
    Stage {
        stage: &'static str,
        source: StageError,
    },
}

/// A component required by [`PipelineBuilder::build`] was not provided.
#[derive(Debug, Error, Diagnostic)]
#[error("pipeline is missing a required component: {what}")]
#[diagnostic(
    code(ragline::pipeline::incomplete),
    help("Provide the component on the builder before calling build().")
)]
pub struct PipelineBuildError {
    what: &'static str,
}

/// The assembled chat pipeline. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    checkpointer: Arc<dyn Checkpointer>,
    check_cache: Arc<dyn Stage>,
    contextualize: Arc<dyn Stage>,
    retrieve: Arc<dyn Stage>,
    generate: Arc<dyn Stage>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish()
    }
}

impl Pipeline {
    /// Start assembling a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Serve one user message on a conversation thread.
    ///
    /// Spawns the invocation onto the runtime and returns immediately; the
    /// caller consumes progress through the returned [`EventStream`], which
    /// always terminates with exactly one [`ChatEvent::End`]. Failures after
    /// this point surface as a single generic [`ChatEvent::Error`] before the
    /// end sentinel, never as a panic or a hung stream.
    pub fn stream(
        &self,
        message: impl Into<String>,
        tenant_id: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> EventStream {
        let (tx, rx) = flume::unbounded();
        let pipeline = self.clone();
        let message = message.into();
        let tenant_id = tenant_id.into();
        let thread_id = thread_id.into();

        tokio::spawn(async move {
            if let Err(err) = pipeline
                .run_invocation(&message, &tenant_id, &thread_id, &tx)
                .await
            {
                error!(
                    tenant = %tenant_id,
                    thread = %thread_id,
                    error = %err,
                    "invocation failed"
                );
                let _ = tx.send(ChatEvent::error(GENERIC_ERROR_MESSAGE));
            }
            // Unconditional: the consumer can always rely on the sentinel.
            let _ = tx.send(ChatEvent::end());
        });

        EventStream::new(rx)
    }

    #[instrument(skip(self, message, events), fields(tenant = %tenant_id, thread = %thread_id))]
    async fn run_invocation(
        &self,
        message: &str,
        tenant_id: &str,
        thread_id: &str,
        events: &flume::Sender<ChatEvent>,
    ) -> Result<(), PipelineError> {
        let mut state = self.load_state(message, tenant_id, thread_id).await?;
        let _ = events.send(ChatEvent::status(WORKING_STATUS));

        let mut current = Some(StageKind::CheckCache);
        while let Some(kind) = current {
            let ctx = StageContext {
                stage_id: kind.as_str().to_string(),
                thread_id: thread_id.to_string(),
                tenant_id: tenant_id.to_string(),
                events: events.clone(),
            };
            let partial = self
                .stage(kind)
                .run(state.snapshot(), ctx)
                .await
                .map_err(|source| PipelineError::Stage {
                    stage: kind.as_str(),
                    source,
                })?;
            state.apply(partial);

            // On a hit the cached answer was recorded as the assistant turn;
            // replay it to the client as the one token of this invocation.
            if kind == StageKind::CheckCache && state.is_cache_hit {
                if let Some(answer) = state.messages.last().filter(|m| m.has_role(Message::ASSISTANT))
                {
                    let _ = events.send(ChatEvent::token(&answer.content));
                }
            }

            self.save_checkpoint(&state).await;
            current = next_stage(kind, state.is_cache_hit);
            debug!(stage = %kind, next = ?current, cache_hit = state.is_cache_hit, "stage complete");
        }
        Ok(())
    }

    async fn load_state(
        &self,
        message: &str,
        tenant_id: &str,
        thread_id: &str,
    ) -> Result<ConversationState, PipelineError> {
        let stored = self.checkpointer.load(thread_id).await.map_err(|source| {
            PipelineError::CheckpointLoad {
                thread_id: thread_id.to_string(),
                source,
            }
        })?;

        let mut state = match stored {
            Some(checkpoint) => {
                if checkpoint.tenant_id != tenant_id {
                    return Err(PipelineError::TenantMismatch {
                        thread_id: thread_id.to_string(),
                    });
                }
                ConversationState::from_checkpoint(checkpoint)
            }
            None => ConversationState::new(tenant_id, thread_id),
        };
        state.begin_invocation(message);
        Ok(state)
    }

    /// Autosave after each stage. Failures are logged and swallowed; losing a
    /// checkpoint must not fail an invocation that already did its work.
    async fn save_checkpoint(&self, state: &ConversationState) {
        let checkpoint = PersistedConversation::from_state(state);
        if let Err(err) = self.checkpointer.save(checkpoint).await {
            warn!(
                thread = %state.thread_id,
                error = %err,
                "checkpoint save failed; continuing"
            );
        }
    }

    fn stage(&self, kind: StageKind) -> &Arc<dyn Stage> {
        match kind {
            StageKind::CheckCache => &self.check_cache,
            StageKind::Contextualize => &self.contextualize,
            StageKind::Retrieve => &self.retrieve,
            StageKind::Generate => &self.generate,
        }
    }
}

/// Builder for [`Pipeline`].
///
/// The embedder, cache store, document index, and chat model(s) are required;
/// the checkpointer defaults to [`InMemoryCheckpointer`] and the config to
/// [`PipelineConfig::default`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use ragline::cache::MemorySemanticCache;
/// use ragline::embeddings::{MockEmbeddingProvider, SharedEmbedder};
/// use ragline::index::MemoryDocumentIndex;
/// use ragline::llm::StaticChatModel;
/// use ragline::pipeline::Pipeline;
///
/// let pipeline = Pipeline::builder()
///     .with_embedder(SharedEmbedder::from_provider(Arc::new(MockEmbeddingProvider::new())))
///     .with_cache(Arc::new(MemorySemanticCache::new()))
///     .with_document_index(Arc::new(MemoryDocumentIndex::new()))
///     .with_chat_model(Arc::new(StaticChatModel::new("Hello!")))
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    embedder: Option<SharedEmbedder>,
    cache: Option<Arc<dyn SemanticCacheStore>>,
    index: Option<Arc<dyn DocumentIndex>>,
    rephraser: Option<Arc<dyn ChatModel>>,
    generator: Option<Arc<dyn ChatModel>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl PipelineBuilder {
    /// Override the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the shared embedding handle (required).
    #[must_use]
    pub fn with_embedder(mut self, embedder: SharedEmbedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the semantic cache store (required).
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn SemanticCacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the document index (required).
    #[must_use]
    pub fn with_document_index(mut self, index: Arc<dyn DocumentIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set one model for both rephrasing and generation. Later
    /// [`with_rephraser`](Self::with_rephraser) /
    /// [`with_generator`](Self::with_generator) calls override per role.
    #[must_use]
    pub fn with_chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.rephraser = Some(model.clone());
        self.generator = Some(model);
        self
    }

    /// Set the rephrase model.
    #[must_use]
    pub fn with_rephraser(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.rephraser = Some(model);
        self
    }

    /// Set the answer-generation model.
    #[must_use]
    pub fn with_generator(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.generator = Some(model);
        self
    }

    /// Set the checkpoint store (defaults to in-memory).
    #[must_use]
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Assemble the pipeline.
    pub fn build(self) -> Result<Pipeline, PipelineBuildError> {
        let config = self.config.unwrap_or_default();
        let embedder = self
            .embedder
            .ok_or(PipelineBuildError { what: "embedder" })?;
        let cache = self
            .cache
            .ok_or(PipelineBuildError { what: "cache store" })?;
        let index = self.index.ok_or(PipelineBuildError {
            what: "document index",
        })?;
        let rephraser = self.rephraser.ok_or(PipelineBuildError {
            what: "rephrase model",
        })?;
        let generator = self.generator.ok_or(PipelineBuildError {
            what: "generation model",
        })?;
        let checkpointer = self
            .checkpointer
            .unwrap_or_else(|| Arc::new(InMemoryCheckpointer::new()));

        Ok(Pipeline {
            check_cache: Arc::new(CacheCheckStage::new(
                embedder.clone(),
                cache.clone(),
                config.similarity_threshold,
                config.request_timeout,
            )),
            contextualize: Arc::new(ContextualizeStage::new(
                rephraser,
                config.max_history_turns,
                config.request_timeout,
            )),
            retrieve: Arc::new(RetrieveStage::new(index, embedder, config.top_k_documents)),
            generate: Arc::new(GenerateStage::new(
                generator,
                cache,
                config.cache_ttl,
                config.max_context_chars,
            )),
            checkpointer,
            config,
        })
    }
}
