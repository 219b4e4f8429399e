//! Stage execution framework for the chat pipeline.
//!
//! A [`Stage`] is one unit of the invocation state machine: it reads an
//! immutable [`StateSnapshot`], may emit events to the client through its
//! [`StageContext`], and returns a [`StagePartial`] describing the state it
//! wants changed. Stages never mutate state directly and never talk to each
//! other except through the merged state.
//!
//! # Error handling
//!
//! Returning `Err(StageError)` is fatal for the invocation: the orchestrator
//! stops, reports a generic error event, and terminates the stream. Stages
//! with a documented fallback (cache-check, contextualize) catch their own
//! provider failures and return `Ok` with degraded output instead.

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::embeddings::EmbeddingError;
use crate::events::ChatEvent;
use crate::index::{IndexError, RetrievedChunk};
use crate::message::Message;
use crate::state::StateSnapshot;

/// Core trait for pipeline stages.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Execute this stage against the given snapshot.
    async fn run(
        &self,
        snapshot: StateSnapshot,
        ctx: StageContext,
    ) -> Result<StagePartial, StageError>;
}

/// Execution context handed to a stage: identity for tracing plus the
/// client-facing event channel.
#[derive(Clone, Debug)]
pub struct StageContext {
    /// Name of the running stage.
    pub stage_id: String,
    /// Conversation thread being served.
    pub thread_id: String,
    /// Tenant being served.
    pub tenant_id: String,
    /// Sending half of the invocation's event stream.
    pub events: flume::Sender<ChatEvent>,
}

impl StageContext {
    /// Emit a progress notice to the client.
    pub fn emit_status(&self, message: impl Into<String>) -> Result<(), StageContextError> {
        self.events
            .send(ChatEvent::status(message))
            .map_err(|_| StageContextError::StreamClosed)
    }

    /// Emit one answer fragment to the client.
    pub fn emit_token(&self, fragment: impl Into<String>) -> Result<(), StageContextError> {
        self.events
            .send(ChatEvent::token(fragment))
            .map_err(|_| StageContextError::StreamClosed)
    }
}

/// Partial state update returned by a stage.
///
/// All fields are optional so a stage only states what it changed; the
/// orchestrator merges partials via
/// [`ConversationState::apply`](crate::state::ConversationState::apply).
#[derive(Clone, Debug, Default)]
pub struct StagePartial {
    /// Messages to append to the thread history.
    pub messages: Option<Vec<Message>>,
    /// Standalone question to record.
    pub rephrased_question: Option<String>,
    /// Query embedding to record.
    pub query_embedding: Option<Vec<f32>>,
    /// Retrieved chunks to replace the current set with.
    pub documents: Option<Vec<RetrievedChunk>>,
    /// Cache-hit flag to set.
    pub is_cache_hit: Option<bool>,
}

impl StagePartial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one or more messages.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Record the standalone question.
    #[must_use]
    pub fn with_rephrased_question(mut self, question: impl Into<String>) -> Self {
        self.rephrased_question = Some(question.into());
        self
    }

    /// Record the query embedding.
    #[must_use]
    pub fn with_query_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    /// Replace the retrieved document set.
    #[must_use]
    pub fn with_documents(mut self, documents: Vec<RetrievedChunk>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Set the cache-hit flag.
    #[must_use]
    pub fn with_is_cache_hit(mut self, hit: bool) -> Self {
        self.is_cache_hit = Some(hit);
        self
    }
}

/// Errors from [`StageContext`] methods.
#[derive(Debug, Error, Diagnostic)]
pub enum StageContextError {
    /// The client-facing event channel is closed.
    #[error("event stream closed by consumer")]
    #[diagnostic(
        code(ragline::stage::stream_closed),
        help("The client disconnected; the invocation cannot deliver further events.")
    )]
    StreamClosed,
}

/// Fatal errors from stage execution.
#[derive(Debug, Error, Diagnostic)]
pub enum StageError {
    /// Expected input data is missing from the snapshot.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(ragline::stage::missing_input),
        help("Check that the preceding stage produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// External provider or service error.
    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(ragline::stage::provider))]
    Provider {
        provider: &'static str,
        message: String,
    },

    /// Embedding provider failure on a path with no fallback.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Document index failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Index(#[from] IndexError),

    /// JSON serialization error.
    #[error(transparent)]
    #[diagnostic(code(ragline::stage::serde_json))]
    Serde(#[from] serde_json::Error),

    /// The client-facing event channel failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Events(#[from] StageContextError),
}
