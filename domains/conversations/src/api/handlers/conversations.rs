//! Conversation management API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use threadline_common::Result;

use crate::api::handlers::messages::MessageResponse;
use crate::api::middleware::ConversationsState;
use crate::domain::entities::{Conversation, ConversationStatus};
use crate::domain::state::ConversationEvent;
use crate::service::CreateThread;

/// Request for creating a conversation, optionally with its first message
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub owner_id: Uuid,

    /// Optional conversation title
    pub title: Option<String>,

    /// When present, the message is stored and answered in the same call
    pub first_message: Option<String>,

    pub idempotency_token: Option<String>,
}

/// Request for updating a conversation. Empty strings clear a field.
#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub event: ConversationEvent,
}

/// Conversation response DTO
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: ConversationStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            owner_id: c.owner_id,
            title: c.title,
            summary: c.summary,
            status: c.status,
            metadata: c.metadata,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Response for create: the conversation plus the first exchange, if any
#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub conversation: ConversationResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<MessageResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<MessageResponse>,
}

/// Create a new conversation
pub async fn create_conversation(
    State(state): State<ConversationsState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<CreateConversationResponse>)> {
    let Some(first_message) = req.first_message else {
        let conversation = state
            .service
            .create_conversation(req.owner_id, req.title)
            .await?;
        return Ok((
            StatusCode::CREATED,
            Json(CreateConversationResponse {
                conversation: conversation.into(),
                user_message: None,
                assistant_message: None,
            }),
        ));
    };

    let mut request = CreateThread::new(req.owner_id, first_message, state.generator.clone());
    request.title = req.title;
    request.idempotency_token = req.idempotency_token;
    let conversation_id = request.conversation_id;

    let outcome = state
        .service
        .create_thread_with_first_message(request)
        .await?;
    let conversation = state.service.conversation(conversation_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse {
            conversation: conversation.into(),
            user_message: Some(outcome.user_message.into()),
            assistant_message: Some(outcome.assistant_message.into()),
        }),
    ))
}

/// Get a single conversation by ID
pub async fn get_conversation(
    State(state): State<ConversationsState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>> {
    let conversation = state.service.conversation(id).await?;
    Ok(Json(conversation.into()))
}

/// Update a conversation (title, summary)
pub async fn update_conversation(
    State(state): State<ConversationsState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateConversationRequest>,
) -> Result<Json<ConversationResponse>> {
    let mut conversation = state.service.conversation(id).await?;

    if let Some(title) = req.title {
        conversation = state.service.rename_conversation(id, Some(title)).await?;
    }

    if let Some(summary) = req.summary {
        conversation = state.service.set_summary(id, Some(summary)).await?;
    }

    Ok(Json(conversation.into()))
}

/// Apply a lifecycle event (archive, unarchive, delete, restore)
pub async fn transition_conversation(
    State(state): State<ConversationsState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<ConversationResponse>> {
    let conversation = state.service.transition_conversation(id, req.event).await?;
    Ok(Json(conversation.into()))
}

/// Soft-delete a conversation
pub async fn delete_conversation(
    State(state): State<ConversationsState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state
        .service
        .transition_conversation(id, ConversationEvent::Delete)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
