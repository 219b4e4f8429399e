//! Per-thread conversation state and the snapshot/partial update cycle.
//!
//! The orchestrator owns one [`ConversationState`] per invocation. Each stage
//! receives an immutable [`StateSnapshot`], returns a
//! [`StagePartial`](crate::stage::StagePartial), and the orchestrator merges
//! it back in. Message history is append-only; the scratch fields
//! (rephrased question, query embedding, documents, hit flag) are reset at
//! the start of every invocation and are never persisted.

use crate::checkpoint::PersistedConversation;
use crate::index::RetrievedChunk;
use crate::message::Message;
use crate::stage::StagePartial;

/// Mutable state of one conversation thread during an invocation.
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    /// Conversation thread identifier.
    pub thread_id: String,
    /// Owning tenant; immutable for the lifetime of the thread.
    pub tenant_id: String,
    /// Full chat history, oldest first. Append-only.
    pub messages: Vec<Message>,
    /// Standalone form of the latest question, set by the contextualize
    /// stage (or by cache-check as the raw question).
    pub rephrased_question: Option<String>,
    /// Embedding of the raw question, computed at most once per invocation.
    pub query_embedding: Option<Vec<f32>>,
    /// Chunks retrieved for the current question.
    pub documents: Vec<RetrievedChunk>,
    /// True when the semantic cache answered this invocation.
    pub is_cache_hit: bool,
}

/// Immutable view of [`ConversationState`] handed to stages.
#[derive(Clone, Debug, Default)]
pub struct StateSnapshot {
    pub thread_id: String,
    pub tenant_id: String,
    pub messages: Vec<Message>,
    pub rephrased_question: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub documents: Vec<RetrievedChunk>,
    pub is_cache_hit: bool,
}

impl StateSnapshot {
    /// Content of the latest user turn, if any.
    #[must_use]
    pub fn latest_user_question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.has_role(Message::USER))
            .map(|m| m.content.as_str())
    }

    /// The prior turns offered to the rephrase model: everything before the
    /// latest message, limited to the trailing `max_turns`.
    #[must_use]
    pub fn history_window(&self, max_turns: usize) -> &[Message] {
        let history = &self.messages[..self.messages.len().saturating_sub(1)];
        let start = history.len().saturating_sub(max_turns);
        &history[start..]
    }
}

impl ConversationState {
    /// Fresh state for a thread with no stored history.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    /// Rehydrate state from a stored checkpoint. Scratch fields start empty;
    /// only identity and history survive persistence.
    #[must_use]
    pub fn from_checkpoint(checkpoint: PersistedConversation) -> Self {
        Self {
            thread_id: checkpoint.thread_id,
            tenant_id: checkpoint.tenant_id,
            messages: checkpoint.messages,
            ..Default::default()
        }
    }

    /// Start a new invocation: append the user turn and clear the scratch
    /// fields left over from any previous invocation.
    pub fn begin_invocation(&mut self, user_text: &str) {
        self.messages.push(Message::user(user_text));
        self.rephrased_question = None;
        self.query_embedding = None;
        self.documents.clear();
        self.is_cache_hit = false;
    }

    /// Immutable copy for a stage to read.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            thread_id: self.thread_id.clone(),
            tenant_id: self.tenant_id.clone(),
            messages: self.messages.clone(),
            rephrased_question: self.rephrased_question.clone(),
            query_embedding: self.query_embedding.clone(),
            documents: self.documents.clone(),
            is_cache_hit: self.is_cache_hit,
        }
    }

    /// Merge a stage's partial update. Messages append; scratch fields
    /// replace when the stage set them.
    pub fn apply(&mut self, partial: StagePartial) {
        if let Some(messages) = partial.messages {
            self.messages.extend(messages);
        }
        if let Some(question) = partial.rephrased_question {
            self.rephrased_question = Some(question);
        }
        if let Some(embedding) = partial.query_embedding {
            self.query_embedding = Some(embedding);
        }
        if let Some(documents) = partial.documents {
            self.documents = documents;
        }
        if let Some(hit) = partial.is_cache_hit {
            self.is_cache_hit = hit;
        }
    }
}
