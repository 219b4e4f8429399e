//! SQLite-backed conversation checkpointer.
//!
//! One row per thread; saves overwrite in place. Message history is stored as
//! a JSON column so the schema stays a single self-initializing table and the
//! row shape matches [`PersistedConversation`] exactly.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::instrument;

use super::{Checkpointer, CheckpointerError, PersistedConversation};
use crate::message::Message;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    thread_id  TEXT PRIMARY KEY,
    tenant_id  TEXT NOT NULL,
    messages   TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// Durable single-node checkpoint storage.
///
/// # Examples
///
/// ```rust,ignore
/// let checkpointer = SqliteCheckpointer::connect("sqlite://conversations.db").await?;
/// ```
pub struct SqliteCheckpointer {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connect to (or create) the database at `database_url` and ensure the
    /// schema exists. Example URL: `sqlite://conversations.db`.
    #[must_use = "checkpointer must be used to persist conversations"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, CheckpointerError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CheckpointerError::Backend(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CheckpointerError::Backend(format!("connect error: {e}")))?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| CheckpointerError::Backend(format!("schema init: {e}")))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self), err)]
    async fn load(
        &self,
        thread_id: &str,
    ) -> Result<Option<PersistedConversation>, CheckpointerError> {
        let row = sqlx::query(
            "SELECT thread_id, tenant_id, messages, updated_at \
             FROM conversations WHERE thread_id = ?1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend(format!("load: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let messages_json: String = row
            .try_get("messages")
            .map_err(|e| CheckpointerError::Backend(format!("load column: {e}")))?;
        let messages: Vec<Message> = serde_json::from_str(&messages_json)?;

        Ok(Some(PersistedConversation {
            thread_id: row
                .try_get("thread_id")
                .map_err(|e| CheckpointerError::Backend(format!("load column: {e}")))?,
            tenant_id: row
                .try_get("tenant_id")
                .map_err(|e| CheckpointerError::Backend(format!("load column: {e}")))?,
            messages,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| CheckpointerError::Backend(format!("load column: {e}")))?,
        }))
    }

    #[instrument(skip(self, checkpoint), err)]
    async fn save(&self, checkpoint: PersistedConversation) -> Result<(), CheckpointerError> {
        let messages_json = serde_json::to_string(&checkpoint.messages)?;

        sqlx::query(
            r#"
            INSERT INTO conversations (thread_id, tenant_id, messages, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(thread_id) DO UPDATE SET
                tenant_id  = excluded.tenant_id,
                messages   = excluded.messages,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&checkpoint.thread_id)
        .bind(&checkpoint.tenant_id)
        .bind(&messages_json)
        .bind(&checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointerError::Backend(format!("save: {e}")))?;

        Ok(())
    }
}
