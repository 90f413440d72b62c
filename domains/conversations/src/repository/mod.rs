//! Storage port for the Conversations domain
//!
//! `ChatStorage` hands out short-lived transactions; `ChatTransaction` is the
//! set of primitive operations allowed inside one. Each `begin()` ends in
//! exactly one `commit()` or `rollback()`: both consume the handle, and a
//! handle dropped without either rolls back.

pub mod postgres;
pub(crate) mod rows;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use uuid::Uuid;

use threadline_common::{DatabaseConfig, RepositoryError, StorageBackend};

use crate::domain::entities::{
    Conversation, ConversationStatus, Message, NewConversation, NewMessage,
};

pub use postgres::PostgresChatStorage;
pub use sqlite::SqliteChatStorage;

/// Partial update of a conversation. `Some(None)` clears a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationUpdate {
    pub title: Option<Option<String>>,
    pub summary: Option<Option<String>>,
    pub status: Option<ConversationStatus>,
}

/// Factory for storage transactions
#[async_trait]
pub trait ChatStorage: Send + Sync {
    /// Open a transaction. Fails with `Unavailable` when the backend cannot be reached.
    async fn begin(&self) -> Result<Box<dyn ChatTransaction>, RepositoryError>;

    /// Apply the embedded schema migrations
    async fn migrate(&self) -> Result<(), RepositoryError>;

    /// Close the underlying pool; later `begin()` calls fail with `Unavailable`
    async fn close(&self);

    fn backend(&self) -> StorageBackend;

    /// Begin and immediately roll back a transaction
    async fn health_check(&self) -> bool {
        match self.begin().await {
            Ok(tx) => tx.rollback().await.is_ok(),
            Err(_) => false,
        }
    }
}

/// Primitive operations inside a single storage transaction
#[async_trait]
pub trait ChatTransaction: Send {
    /// Fails with `AlreadyExists` if the id is taken
    async fn insert_conversation(
        &mut self,
        new: NewConversation,
    ) -> Result<Conversation, RepositoryError>;

    async fn get_conversation(&mut self, id: Uuid) -> Result<Conversation, RepositoryError>;

    async fn update_conversation(
        &mut self,
        id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, RepositoryError>;

    /// Insert a message, or return the stored one when its idempotency token
    /// already exists in the same conversation. A token owned by another
    /// conversation fails with `AlreadyExists`.
    async fn insert_message(&mut self, new: NewMessage) -> Result<Message, RepositoryError>;

    async fn find_message_by_token(
        &mut self,
        token: &str,
    ) -> Result<Option<Message>, RepositoryError>;

    /// Messages in ascending creation order, optionally only those created after `after`
    fn list_messages(
        &mut self,
        conversation_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Message, RepositoryError>>;

    /// The newest `limit` messages, returned in ascending creation order
    async fn latest_messages(
        &mut self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Run `op` inside one transaction: commit on `Ok`, roll back on `Err`.
pub async fn in_transaction<T, F>(storage: &dyn ChatStorage, op: F) -> Result<T, RepositoryError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn ChatTransaction) -> BoxFuture<'t, Result<T, RepositoryError>>
        + Send,
{
    let mut tx = storage.begin().await?;

    match op(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Build the configured storage adapter and apply its migrations
pub async fn connect_storage(
    config: &DatabaseConfig,
) -> Result<Arc<dyn ChatStorage>, RepositoryError> {
    let storage: Arc<dyn ChatStorage> = match config.backend {
        StorageBackend::Postgres => {
            Arc::new(PostgresChatStorage::connect(&config.url, config.max_connections).await?)
        }
        StorageBackend::Sqlite => Arc::new(SqliteChatStorage::connect(&config.url).await?),
    };

    storage.migrate().await?;
    tracing::info!(backend = %config.backend, "Conversation storage ready");

    Ok(storage)
}
