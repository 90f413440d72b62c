//! WebSocket endpoint for live conversation viewers
//!
//! # Connection Flow
//! 1. Client upgrades on `GET /v1/conversations/{id}/ws?user_id=...`
//! 2. The socket is registered as a subscriber of the conversation
//! 3. Client sends `{"type":"message","content":...,"client_msg_id":...}`
//! 4. Each message runs as its own exchange task; frames reach every
//!    subscriber of the conversation, this socket included
//! 5. On close the subscription is removed; running exchanges continue

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use threadline_common::{Error, Result};

use crate::api::middleware::ConversationsState;
use crate::delivery::{ChannelSubscriber, ConnectionId, Frame};
use crate::domain::entities::ConversationStatus;
use crate::service::SendMessage;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    /// Opaque viewer id; when given it must own the conversation
    pub user_id: Option<Uuid>,
}

/// Frames a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        content: String,
        /// Client-generated id, used as the idempotency token
        #[serde(default)]
        client_msg_id: Option<String>,
    },
}

/// Handle WebSocket upgrade for a conversation
pub async fn conversation_ws(
    ws: WebSocketUpgrade,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<WsConnectParams>,
    State(state): State<ConversationsState>,
) -> Result<Response> {
    let conversation = state.service.conversation(conversation_id).await?;

    let not_visible = conversation.status == ConversationStatus::Deleted
        || params.user_id.is_some_and(|user_id| user_id != conversation.owner_id);
    if not_visible {
        return Err(Error::NotFound("Conversation not found".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, conversation_id, state)))
}

async fn handle_socket(socket: WebSocket, conversation_id: Uuid, state: ConversationsState) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = ConnectionId::new();
    let (tx, mut frames) = mpsc::unbounded_channel::<Frame>();
    let subscriber = ChannelSubscriber::new(connection_id, tx.clone());

    if let Err(e) = state
        .service
        .subscribe(conversation_id, Arc::new(subscriber))
        .await
    {
        tracing::warn!(
            conversation_id = %conversation_id,
            error = %e,
            "WebSocket subscription rejected"
        );
        if let Ok(json) = Frame::error(e.client_message(), None).to_json() {
            let _ = sender.send(WsMessage::Text(json.into())).await;
        }
        let _ = sender.close().await;
        return;
    }

    tracing::info!(
        conversation_id = %conversation_id,
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let json = match frame.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::Message {
                    content,
                    client_msg_id,
                }) => {
                    let mut request = SendMessage::user(conversation_id, content)
                        .with_generator(state.generator.clone());
                    if let Some(token) = client_msg_id {
                        request = request.with_token(token);
                    }
                    spawn_exchange(&state, request, tx.clone());
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "Ignoring malformed client frame"
                    );
                    let _ = tx.send(Frame::error("Malformed message", None));
                }
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.service.unsubscribe(connection_id).await;
    drop(tx);
    writer.abort();

    tracing::info!(
        conversation_id = %conversation_id,
        connection_id = %connection_id,
        "WebSocket connection closed"
    );
}

/// Run one exchange detached from the socket, so a disconnect does not
/// cancel it. Errors raised before the reply stream started go back to
/// this connection only; later ones were already published as frames.
fn spawn_exchange(state: &ConversationsState, request: SendMessage, reply: mpsc::UnboundedSender<Frame>) {
    let service = state.service.clone();
    tokio::spawn(async move {
        let conversation_id = request.conversation_id;
        if let Err(e) = service.send_message(request).await {
            tracing::debug!(conversation_id = %conversation_id, error = %e, "Exchange ended with error");
            if !already_published(&e) {
                let _ = reply.send(Frame::error(e.client_message(), None));
            }
        }
    });
}

fn already_published(err: &Error) -> bool {
    matches!(
        err,
        Error::GenerationFailed { .. }
            | Error::Persistence {
                generated: Some(_),
                ..
            }
    )
}
