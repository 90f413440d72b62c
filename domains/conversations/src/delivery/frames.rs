//! Wire frames pushed to conversation subscribers
//!
//! Every frame is a JSON object with a `type` discriminator:
//! `message`, `stream_start`, `stream_chunk`, `stream_end` or `error`.
//! A streamed reply is always `stream_start`, zero or more `stream_chunk`,
//! then either `stream_end` (content equals the concatenated chunks) or `error`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::registry::SubscriptionRegistry;
use crate::domain::entities::{Message, MessageRole};

/// One unit of the delivery protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// An already-complete message
    Message {
        id: Uuid,
        conversation_id: Uuid,
        role: MessageRole,
        content: String,
        content_type: String,
        created_at: DateTime<Utc>,
    },
    /// A reply with this id is about to stream
    StreamStart {
        message_id: Uuid,
        conversation_id: Uuid,
    },
    /// Incremental reply text
    StreamChunk { message_id: Uuid, text: String },
    /// The reply was persisted; `content` is the full text
    StreamEnd { message_id: Uuid, content: String },
    /// Something went wrong. Never carries backend detail.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<Uuid>,
    },
}

impl Frame {
    pub fn message(message: &Message) -> Self {
        Frame::Message {
            id: message.id,
            conversation_id: message.conversation_id,
            role: message.role,
            content: message.content.clone(),
            content_type: message.content_type.clone(),
            created_at: message.created_at,
        }
    }

    pub fn error(message: impl Into<String>, message_id: Option<Uuid>) -> Self {
        Frame::Error {
            message: message.into(),
            message_id,
        }
    }

    /// Wire name of the frame type
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Message { .. } => "message",
            Frame::StreamStart { .. } => "stream_start",
            Frame::StreamChunk { .. } => "stream_chunk",
            Frame::StreamEnd { .. } => "stream_end",
            Frame::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// How the final generated text relates to what was already streamed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Streamed text already equals the final text
    Complete,
    /// The final text extends the streamed text by this suffix
    Suffix(String),
    /// The final text does not start with the streamed text
    Diverged,
}

/// Compare streamed text against the generator's final result
pub fn reconcile(streamed: &str, final_text: &str) -> Reconciled {
    match final_text.strip_prefix(streamed) {
        Some("") => Reconciled::Complete,
        Some(suffix) => Reconciled::Suffix(suffix.to_string()),
        None => Reconciled::Diverged,
    }
}

#[derive(Debug, Default)]
struct StreamState {
    streamed: String,
    closed: bool,
}

/// Encoder for one streamed reply
///
/// Publishes frames for a single message id through the registry and keeps
/// the concatenation of every chunk sent, so the closing `stream_end` can be
/// checked against it. Clones share state.
#[derive(Clone)]
pub struct ResponseStream {
    registry: Arc<SubscriptionRegistry>,
    conversation_id: Uuid,
    message_id: Uuid,
    state: Arc<Mutex<StreamState>>,
}

impl ResponseStream {
    /// Publish `stream_start` and return the open stream
    pub async fn start(
        registry: Arc<SubscriptionRegistry>,
        conversation_id: Uuid,
        message_id: Uuid,
    ) -> Self {
        registry
            .publish(
                conversation_id,
                &Frame::StreamStart {
                    message_id,
                    conversation_id,
                },
            )
            .await;

        Self {
            registry,
            conversation_id,
            message_id,
            state: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Publish one chunk. Empty chunks and chunks after close are dropped.
    pub async fn chunk(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        // Held across publish so chunk order matches the accumulated text
        let mut state = self.state.lock().await;
        if state.closed {
            tracing::debug!(message_id = %self.message_id, "Chunk after stream close dropped");
            return false;
        }

        self.registry
            .publish(
                self.conversation_id,
                &Frame::StreamChunk {
                    message_id: self.message_id,
                    text: text.to_string(),
                },
            )
            .await;
        state.streamed.push_str(text);
        true
    }

    /// Text streamed so far
    pub async fn streamed(&self) -> String {
        self.state.lock().await.streamed.clone()
    }

    /// Stop accepting chunks and make sure the streamed text equals
    /// `final_text`, sending the missing suffix as one last chunk.
    /// Returns `false` when the two diverged.
    pub async fn seal(&self, final_text: &str) -> bool {
        let mut state = self.state.lock().await;
        state.closed = true;

        match reconcile(&state.streamed, final_text) {
            Reconciled::Complete => true,
            Reconciled::Suffix(suffix) => {
                self.registry
                    .publish(
                        self.conversation_id,
                        &Frame::StreamChunk {
                            message_id: self.message_id,
                            text: suffix.clone(),
                        },
                    )
                    .await;
                state.streamed.push_str(&suffix);
                true
            }
            Reconciled::Diverged => false,
        }
    }

    /// Stop accepting chunks without completing the stream
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Publish `stream_end` with the persisted text
    pub async fn finish(&self, content: &str) {
        self.state.lock().await.closed = true;
        self.registry
            .publish(
                self.conversation_id,
                &Frame::StreamEnd {
                    message_id: self.message_id,
                    content: content.to_string(),
                },
            )
            .await;
    }

    /// Publish an `error` frame for this stream
    pub async fn fail(&self, message: &str) {
        self.state.lock().await.closed = true;
        self.registry
            .publish(
                self.conversation_id,
                &Frame::error(message, Some(self.message_id)),
            )
            .await;
    }
}
