//! Message API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use threadline_common::Result;

use crate::api::middleware::ConversationsState;
use crate::domain::entities::{Message, MessageRole};
use crate::service::SendMessage;

fn default_generate() -> bool {
    true
}

/// Request for sending a message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Message content
    pub content: String,

    /// Client retry key; repeated sends return the stored message
    pub idempotency_token: Option<String>,

    /// Generate an assistant reply (streamed to subscribers)
    #[serde(default = "default_generate")]
    pub generate: bool,

    /// Overrides the configured generation deadline
    pub timeout_secs: Option<u64>,
}

/// Request for retrying a reply commit
#[derive(Debug, Deserialize)]
pub struct CommitReplyRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub after: Option<DateTime<Utc>>,
}

/// Message response DTO
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            role: m.role,
            content: m.content,
            content_type: m.content_type,
            metadata: m.metadata,
            created_at: m.created_at,
        }
    }
}

/// Send a message to a conversation. The reply, if any, is delivered
/// to subscribers as frames; the response carries the stored user message.
pub async fn send_message(
    State(state): State<ConversationsState>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let mut request = SendMessage::user(conversation_id, req.content);
    if let Some(token) = req.idempotency_token {
        request = request.with_token(token);
    }
    if req.generate {
        request = request.with_generator(state.generator.clone());
    }
    if let Some(secs) = req.timeout_secs {
        request = request.with_timeout(std::time::Duration::from_secs(secs));
    }

    let message = state.service.send_message(request).await?;
    Ok((StatusCode::CREATED, Json(message.into())))
}

/// Store a reply whose first commit failed
pub async fn commit_reply(
    State(state): State<ConversationsState>,
    Path((conversation_id, message_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CommitReplyRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let message = state
        .service
        .commit_reply(conversation_id, message_id, req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message.into())))
}

/// List messages for a conversation
pub async fn list_messages(
    State(state): State<ConversationsState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessageResponse>>> {
    let messages = state.service.messages(conversation_id, query.after).await?;

    let responses: Vec<MessageResponse> = messages.into_iter().map(Into::into).collect();
    Ok(Json(responses))
}
