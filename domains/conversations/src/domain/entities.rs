//! Domain entities for the Conversations domain
//!
//! Conversations own their messages. Messages are immutable once stored; the
//! only mutation a conversation sees is its title, summary, status and
//! `updated_at` timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use threadline_common::{Error, Result};

/// Conversation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Archived => "archived",
            ConversationStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(ConversationStatus::Active),
            "archived" => Ok(ConversationStatus::Archived),
            "deleted" => Ok(ConversationStatus::Deleted),
            other => Err(Error::Validation(format!(
                "Unknown conversation status: {}",
                other
            ))),
        }
    }
}

/// Message sender role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(Error::Validation(format!("Unknown message role: {}", other))),
        }
    }
}

/// Default content type tag for plain text messages
pub const DEFAULT_CONTENT_TYPE: &str = "text";

/// Maximum title string length
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum content type tag length (varchar(50) in the original schema)
const MAX_CONTENT_TYPE_LENGTH: usize = 50;

/// Maximum idempotency token length (varchar(255) in the original schema)
const MAX_TOKEN_LENGTH: usize = 255;

/// Fallback titles are built from this many leading words
const FALLBACK_TITLE_WORDS: usize = 6;

/// Fallback titles longer than this are truncated with an ellipsis
const FALLBACK_TITLE_MAX_CHARS: usize = 50;

/// Conversation entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub status: ConversationStatus,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }

    /// Title derived from the first user message, used when no title is given
    pub fn fallback_title(first_message: &str) -> String {
        let words: Vec<&str> = first_message
            .split_whitespace()
            .take(FALLBACK_TITLE_WORDS)
            .collect();

        if words.is_empty() {
            return "New conversation".to_string();
        }

        let title = words.join(" ");
        if title.chars().count() > FALLBACK_TITLE_MAX_CHARS {
            let truncated: String = title.chars().take(FALLBACK_TITLE_MAX_CHARS - 3).collect();
            format!("{}...", truncated)
        } else {
            title
        }
    }
}

/// Input for `insert_conversation`
#[derive(Debug, Clone, PartialEq)]
pub struct NewConversation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewConversation {
    pub fn new(id: Uuid, owner_id: Uuid, title: Option<String>) -> Result<Self> {
        validate_title(title.as_deref())?;
        Ok(Self {
            id,
            owner_id,
            title,
            metadata: None,
        })
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Validate an optional conversation title
pub fn validate_title(title: Option<&str>) -> Result<()> {
    if let Some(t) = title {
        if t.chars().count() > MAX_TITLE_LENGTH {
            return Err(Error::Validation(format!(
                "Title must be at most {} characters",
                MAX_TITLE_LENGTH
            )));
        }
    }
    Ok(())
}

/// Message entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub idempotency_token: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for `insert_message`. The id is allocated by the caller so a
/// streamed reply can be announced before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub content_type: String,
    pub idempotency_token: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn new(conversation_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            content: content.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            idempotency_token: None,
            metadata: None,
        }
    }

    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::User, content)
    }

    /// Assistant reply with a pre-allocated id
    pub fn assistant(id: Uuid, conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            id,
            ..Self::new(conversation_id, MessageRole::Assistant, content)
        }
    }

    pub fn system(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::System, content)
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.idempotency_token = token;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Validate content, content type and token
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::Validation(
                "Message content cannot be empty or whitespace-only".to_string(),
            ));
        }

        if self.content_type.is_empty() || self.content_type.len() > MAX_CONTENT_TYPE_LENGTH {
            return Err(Error::Validation(format!(
                "Content type must be 1 to {} characters",
                MAX_CONTENT_TYPE_LENGTH
            )));
        }

        if let Some(ref token) = self.idempotency_token {
            if token.is_empty() || token.len() > MAX_TOKEN_LENGTH {
                return Err(Error::Validation(format!(
                    "Idempotency token must be 1 to {} characters",
                    MAX_TOKEN_LENGTH
                )));
            }
        }

        Ok(())
    }
}
