//! Durable conversation checkpoints.
//!
//! After each stage the orchestrator saves the thread's durable subset —
//! identity plus message history — so a later invocation on the same
//! `thread_id` resumes with full context. Scratch fields are per-invocation
//! and deliberately absent from [`PersistedConversation`].
//!
//! Two backends ship with the crate: [`InMemoryCheckpointer`] for tests and
//! ephemeral deployments, and [`SqliteCheckpointer`] (behind the default-on
//! `sqlite` feature) for durable single-node storage.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::Utc;
use miette::Diagnostic;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::Message;
use crate::state::ConversationState;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointer;

/// The durable subset of a conversation thread.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConversation {
    /// Thread identifier, the storage key.
    pub thread_id: String,
    /// Owning tenant, immutable once the thread exists.
    pub tenant_id: String,
    /// Full chat history, oldest first.
    pub messages: Vec<Message>,
    /// RFC3339 timestamp of the last save.
    pub updated_at: String,
}

impl PersistedConversation {
    /// Capture the durable subset of `state`, stamped with the current time.
    #[must_use]
    pub fn from_state(state: &ConversationState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            tenant_id: state.tenant_id.clone(),
            messages: state.messages.clone(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Errors from checkpoint backends.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    /// The backend failed to execute the operation.
    #[error("checkpoint backend error: {0}")]
    #[diagnostic(code(ragline::checkpoint::backend))]
    Backend(String),

    /// A stored checkpoint could not be decoded.
    #[error("stored checkpoint is corrupt: {source}")]
    #[diagnostic(
        code(ragline::checkpoint::corrupt),
        help("The stored row does not decode as a conversation; inspect the backing store.")
    )]
    Corrupt {
        #[from]
        source: serde_json::Error,
    },
}

/// Storage seam for conversation checkpoints.
///
/// Implementations must be read-your-writes within a process: a `load` that
/// follows a completed `save` observes that save.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Load the checkpoint for `thread_id`, or `None` for an unknown thread.
    async fn load(&self, thread_id: &str)
        -> Result<Option<PersistedConversation>, CheckpointerError>;

    /// Save (insert or overwrite) a checkpoint.
    async fn save(&self, checkpoint: PersistedConversation) -> Result<(), CheckpointerError>;
}

/// Process-local checkpointer backed by a hash map.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    threads: RwLock<FxHashMap<String, PersistedConversation>>,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.read().len()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn load(
        &self,
        thread_id: &str,
    ) -> Result<Option<PersistedConversation>, CheckpointerError> {
        Ok(self.threads.read().get(thread_id).cloned())
    }

    async fn save(&self, checkpoint: PersistedConversation) -> Result<(), CheckpointerError> {
        self.threads
            .write()
            .insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(())
    }
}
