//! Route definitions for Conversations domain API

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{conversations, messages, ws};
use super::middleware::ConversationsState;

/// Create conversation routes
fn conversation_routes() -> Router<ConversationsState> {
    Router::new()
        .route("/v1/conversations", post(conversations::create_conversation))
        .route(
            "/v1/conversations/{id}",
            get(conversations::get_conversation)
                .patch(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route(
            "/v1/conversations/{id}/status",
            post(conversations::transition_conversation),
        )
}

/// Create message routes
fn message_routes() -> Router<ConversationsState> {
    Router::new()
        .route(
            "/v1/conversations/{conversation_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route(
            "/v1/conversations/{conversation_id}/messages/{message_id}/commit",
            post(messages::commit_reply),
        )
}

/// Create live delivery routes
fn live_routes() -> Router<ConversationsState> {
    Router::new().route("/v1/conversations/{id}/ws", get(ws::conversation_ws))
}

/// Create all Conversations domain API routes
pub fn routes() -> Router<ConversationsState> {
    Router::new()
        .merge(conversation_routes())
        .merge(message_routes())
        .merge(live_routes())
}
