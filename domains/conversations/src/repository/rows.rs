//! Row mappings shared by the storage adapters

use chrono::{DateTime, SubsecRound, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use threadline_common::RepositoryError;

use crate::domain::entities::{Conversation, Message};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ConversationRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: String,
    pub metadata: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = RepositoryError;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|_| RepositoryError::InvalidData(format!("status {:?}", row.status)))?;

        Ok(Conversation {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            summary: row.summary,
            status,
            metadata: row.metadata.map(|j| j.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub content_type: String,
    pub idempotency_token: Option<String>,
    pub metadata: Option<Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = RepositoryError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|_| RepositoryError::InvalidData(format!("role {:?}", row.role)))?;

        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            content_type: row.content_type,
            idempotency_token: row.idempotency_token,
            metadata: row.metadata.map(|j| j.0),
            created_at: row.created_at,
        })
    }
}

/// Current time at the microsecond precision both backends store
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Creation time for the next message in a conversation. Strictly after the
/// newest stored message so ordering by `created_at` is total.
pub(crate) fn next_created_at(latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = now();
    match latest {
        Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
        _ => now,
    }
}

/// Resolve a token hit: same conversation returns the stored message,
/// another conversation is a conflict.
pub(crate) fn resolve_token_hit(
    existing: Message,
    conversation_id: Uuid,
) -> Result<Message, RepositoryError> {
    if existing.conversation_id == conversation_id {
        tracing::info!(
            message_id = %existing.id,
            conversation_id = %conversation_id,
            "Idempotency token already stored, returning existing message"
        );
        Ok(existing)
    } else {
        tracing::warn!(
            conversation_id = %conversation_id,
            "Idempotency token belongs to another conversation"
        );
        Err(RepositoryError::AlreadyExists)
    }
}
