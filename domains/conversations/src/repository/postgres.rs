//! PostgreSQL storage adapter

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use threadline_common::{RepositoryError, StorageBackend};

use super::rows::{next_created_at, now, resolve_token_hit, ConversationRow, MessageRow};
use super::{ChatStorage, ChatTransaction, ConversationUpdate};
use crate::domain::entities::{Conversation, Message, NewConversation, NewMessage};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_CONVERSATION: &str = r#"
    SELECT id, owner_id, title, summary, status, metadata, created_at, updated_at
    FROM conversations
    WHERE id = $1
"#;

const LOCK_CONVERSATION: &str = "SELECT id FROM conversations WHERE id = $1 FOR UPDATE";

const INSERT_CONVERSATION: &str = r#"
    INSERT INTO conversations (id, owner_id, title, status, metadata, created_at, updated_at)
    VALUES ($1, $2, $3, 'active', $4, $5, $5)
    RETURNING id, owner_id, title, summary, status, metadata, created_at, updated_at
"#;

const UPDATE_CONVERSATION: &str = r#"
    UPDATE conversations SET
        title = CASE WHEN $2 THEN $3 ELSE title END,
        summary = CASE WHEN $4 THEN $5 ELSE summary END,
        status = COALESCE($6, status),
        updated_at = GREATEST(updated_at, $7)
    WHERE id = $1
    RETURNING id, owner_id, title, summary, status, metadata, created_at, updated_at
"#;

const TOUCH_CONVERSATION: &str =
    "UPDATE conversations SET updated_at = GREATEST(updated_at, $2) WHERE id = $1";

const SELECT_MESSAGE_BY_TOKEN: &str = r#"
    SELECT id, conversation_id, role, content, content_type,
           idempotency_token, metadata, created_at
    FROM messages
    WHERE idempotency_token = $1
"#;

const LATEST_CREATED_AT: &str = r#"
    SELECT created_at FROM messages
    WHERE conversation_id = $1
    ORDER BY created_at DESC
    LIMIT 1
"#;

const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (
        id, conversation_id, role, content, content_type,
        idempotency_token, metadata, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (idempotency_token) WHERE idempotency_token IS NOT NULL DO NOTHING
    RETURNING id, conversation_id, role, content, content_type,
              idempotency_token, metadata, created_at
"#;

const LIST_MESSAGES: &str = r#"
    SELECT id, conversation_id, role, content, content_type,
           idempotency_token, metadata, created_at
    FROM messages
    WHERE conversation_id = $1
      AND ($2::timestamptz IS NULL OR created_at > $2)
    ORDER BY created_at ASC, id ASC
"#;

const LATEST_MESSAGES: &str = r#"
    SELECT id, conversation_id, role, content, content_type,
           idempotency_token, metadata, created_at
    FROM messages
    WHERE conversation_id = $1
    ORDER BY created_at DESC, id DESC
    LIMIT $2
"#;

/// Conversation storage backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PostgresChatStorage {
    pool: PgPool,
}

impl PostgresChatStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ChatStorage for PostgresChatStorage {
    async fn begin(&self) -> Result<Box<dyn ChatTransaction>, RepositoryError> {
        let tx = self.pool.begin().await?;
        tracing::debug!("Transaction started");
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations/postgres")
            .run(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL migration failed");
                RepositoryError::Persistence("schema migration failed".to_string())
            })
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Postgres
    }
}

/// One open PostgreSQL transaction
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn message_by_token(&mut self, token: &str) -> Result<Option<Message>, RepositoryError> {
        sqlx::query_as::<_, MessageRow>(SELECT_MESSAGE_BY_TOKEN)
            .bind(token)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Message::try_from)
            .transpose()
    }
}

#[async_trait]
impl ChatTransaction for PostgresTransaction {
    async fn insert_conversation(
        &mut self,
        new: NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        let row = sqlx::query_as::<_, ConversationRow>(INSERT_CONVERSATION)
            .bind(new.id)
            .bind(new.owner_id)
            .bind(&new.title)
            .bind(new.metadata.map(Json))
            .bind(now())
            .fetch_one(&mut *self.tx)
            .await?;

        row.try_into()
    }

    async fn get_conversation(&mut self, id: Uuid) -> Result<Conversation, RepositoryError> {
        sqlx::query_as::<_, ConversationRow>(SELECT_CONVERSATION)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(RepositoryError::NotFound)?
            .try_into()
    }

    async fn update_conversation(
        &mut self,
        id: Uuid,
        update: ConversationUpdate,
    ) -> Result<Conversation, RepositoryError> {
        sqlx::query_as::<_, ConversationRow>(UPDATE_CONVERSATION)
            .bind(id)
            .bind(update.title.is_some())
            .bind(update.title.flatten())
            .bind(update.summary.is_some())
            .bind(update.summary.flatten())
            .bind(update.status.map(|s| s.as_str()))
            .bind(now())
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(RepositoryError::NotFound)?
            .try_into()
    }

    async fn insert_message(&mut self, new: NewMessage) -> Result<Message, RepositoryError> {
        // Row lock serializes writers to one conversation across processes
        sqlx::query_scalar::<_, Uuid>(LOCK_CONVERSATION)
            .bind(new.conversation_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        if let Some(ref token) = new.idempotency_token {
            if let Some(existing) = self.message_by_token(token).await? {
                return resolve_token_hit(existing, new.conversation_id);
            }
        }

        let latest = sqlx::query_scalar::<_, DateTime<Utc>>(LATEST_CREATED_AT)
            .bind(new.conversation_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        let created_at = next_created_at(latest);

        let inserted = sqlx::query_as::<_, MessageRow>(INSERT_MESSAGE)
            .bind(new.id)
            .bind(new.conversation_id)
            .bind(new.role.as_str())
            .bind(&new.content)
            .bind(&new.content_type)
            .bind(&new.idempotency_token)
            .bind(new.metadata.clone().map(Json))
            .bind(created_at)
            .fetch_optional(&mut *self.tx)
            .await?;

        let message = match inserted {
            Some(row) => Message::try_from(row)?,
            None => {
                // A concurrent transaction committed the same token first
                let token = new.idempotency_token.as_deref().unwrap_or_default();
                let existing = self
                    .message_by_token(token)
                    .await?
                    .ok_or_else(|| {
                        RepositoryError::Persistence("deduplicated message vanished".to_string())
                    })?;
                return resolve_token_hit(existing, new.conversation_id);
            }
        };

        sqlx::query(TOUCH_CONVERSATION)
            .bind(message.conversation_id)
            .bind(message.created_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(message)
    }

    async fn find_message_by_token(
        &mut self,
        token: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        self.message_by_token(token).await
    }

    fn list_messages(
        &mut self,
        conversation_id: Uuid,
        after: Option<DateTime<Utc>>,
    ) -> BoxStream<'_, Result<Message, RepositoryError>> {
        sqlx::query_as::<_, MessageRow>(LIST_MESSAGES)
            .bind(conversation_id)
            .bind(after)
            .fetch(&mut *self.tx)
            .map(|row| row.map_err(RepositoryError::from).and_then(Message::try_from))
            .boxed()
    }

    async fn latest_messages(
        &mut self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query_as::<_, MessageRow>(LATEST_MESSAGES)
            .bind(conversation_id)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await?;

        let mut messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        tracing::debug!("Transaction committed successfully");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }
}
