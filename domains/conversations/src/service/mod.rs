//! Conversation service: the two-phase exchange orchestrator
//!
//! An exchange is three steps:
//! 1. persist the user message in one short transaction and commit it;
//! 2. run the generator with no transaction open, streaming its chunks;
//! 3. persist the reply in a second short transaction.
//!
//! A failure in step 2 never touches what step 1 committed. A failure in
//! step 3 is returned as `Error::Persistence` carrying the generated text so
//! the caller can retry with [`ChatService::commit_reply`]. Exchanges on one
//! conversation run one at a time.
//!
//! Steps 2 and 3 run on their own task: a caller that stops waiting does not
//! cancel the exchange, and subscribers still see it complete.

pub mod generator;
pub mod locks;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{FutureExt, TryStreamExt};
use uuid::Uuid;

use threadline_common::{Config, Error, RepositoryError, Result};

use crate::delivery::{ConnectionId, Frame, ResponseStream, Subscriber, SubscriptionRegistry};
use crate::domain::entities::{
    validate_title, Conversation, ConversationStatus, Message, MessageRole, NewConversation,
    NewMessage,
};
use crate::domain::state::{ConversationEvent, ConversationStateMachine};
use crate::repository::{in_transaction, ChatStorage, ConversationUpdate};

pub use generator::{
    ChunkSink, EchoGenerator, FnGenerator, GenerationContext, GenerationError, Generator,
};
pub use locks::{ConversationGuard, ConversationLocks};

/// What to persist when the generator fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationFailurePolicy {
    /// Keep only the user message
    #[default]
    Discard,
    /// Also store a `system` message describing the failure
    RecordSystemNotice,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Deadline for one generator call unless the request overrides it
    pub generation_timeout: Duration,
    /// Number of recent messages handed to the generator
    pub history_limit: usize,
    pub failure_policy: GenerationFailurePolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            history_limit: 10,
            failure_policy: GenerationFailurePolicy::Discard,
        }
    }
}

impl From<&Config> for ServiceConfig {
    fn from(config: &Config) -> Self {
        Self {
            generation_timeout: config.generation_timeout,
            history_limit: config.history_limit,
            ..Self::default()
        }
    }
}

/// Request to append a message to an existing conversation
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub sender_role: MessageRole,
    pub content: String,
    pub idempotency_token: Option<String>,
    /// When set, a reply is generated and streamed after the message commits
    pub generator: Option<Arc<dyn Generator>>,
    pub timeout: Option<Duration>,
}

impl SendMessage {
    pub fn new(conversation_id: Uuid, sender_role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_role,
            content: content.into(),
            idempotency_token: None,
            generator: None,
            timeout: None,
        }
    }

    pub fn user(conversation_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(conversation_id, MessageRole::User, content)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Request to open a conversation and run its first exchange
pub struct CreateThread {
    pub conversation_id: Uuid,
    pub owner_id: Uuid,
    /// Blank or missing titles fall back to the first words of the message
    pub title: Option<String>,
    pub first_message: String,
    pub idempotency_token: Option<String>,
    pub generator: Arc<dyn Generator>,
    pub timeout: Option<Duration>,
}

impl CreateThread {
    pub fn new(owner_id: Uuid, first_message: impl Into<String>, generator: Arc<dyn Generator>) -> Self {
        Self {
            conversation_id: Uuid::new_v4(),
            owner_id,
            title: None,
            first_message: first_message.into(),
            idempotency_token: None,
            generator,
            timeout: None,
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.idempotency_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Both halves of a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
}

#[derive(Clone)]
pub struct ChatService {
    storage: Arc<dyn ChatStorage>,
    registry: Arc<SubscriptionRegistry>,
    locks: ConversationLocks,
    config: ServiceConfig,
}

impl ChatService {
    pub fn new(
        storage: Arc<dyn ChatStorage>,
        registry: Arc<SubscriptionRegistry>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            locks: ConversationLocks::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn ChatStorage> {
        &self.storage
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[mutants::skip] // Delegates to ChatStorage::health_check()
    pub async fn health_check(&self) -> bool {
        self.storage.health_check().await
    }

    /// Create an empty conversation
    pub async fn create_conversation(
        &self,
        owner_id: Uuid,
        title: Option<String>,
    ) -> Result<Conversation> {
        let new = NewConversation::new(Uuid::new_v4(), owner_id, normalize(title))?;

        let conversation = in_transaction(self.storage.as_ref(), move |tx| {
            Box::pin(async move { tx.insert_conversation(new).await })
        })
        .await
        .map_err(|e| match e {
            RepositoryError::AlreadyExists => {
                Error::Conflict("Conversation already exists".to_string())
            }
            other => other.into(),
        })?;

        tracing::info!(
            conversation_id = %conversation.id,
            owner_id = %owner_id,
            "Conversation created"
        );
        Ok(conversation)
    }

    /// Create a conversation with its first user message and generate the reply
    pub async fn create_thread_with_first_message(
        &self,
        request: CreateThread,
    ) -> Result<ExchangeOutcome> {
        let CreateThread {
            conversation_id,
            owner_id,
            title,
            first_message,
            idempotency_token,
            generator,
            timeout,
        } = request;

        let title = normalize(title).unwrap_or_else(|| Conversation::fallback_title(&first_message));
        let new_conversation = NewConversation::new(conversation_id, owner_id, Some(title))?;
        let new_message =
            NewMessage::user(conversation_id, first_message).with_token(idempotency_token);
        new_message.validate()?;

        let guard = self.locks.acquire(conversation_id).await;

        let (conversation, user_message) = in_transaction(self.storage.as_ref(), move |tx| {
            Box::pin(async move {
                let conversation = tx.insert_conversation(new_conversation).await?;
                let message = tx.insert_message(new_message).await?;
                Ok((conversation, message))
            })
        })
        .await
        .map_err(|e| match e {
            RepositoryError::AlreadyExists => Error::Conflict(
                "Conversation id or idempotency token already in use".to_string(),
            ),
            other => other.into(),
        })?;

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %user_message.id,
            "Conversation created with first message"
        );

        self.registry
            .publish(conversation_id, &Frame::message(&user_message))
            .await;

        let assistant_message = self
            .spawn_exchange(guard, conversation, user_message.clone(), generator, timeout)
            .await?;

        Ok(ExchangeOutcome {
            user_message,
            assistant_message,
        })
    }

    /// Append a message; with a generator, also run the reply exchange.
    ///
    /// Returns the persisted sender message. A repeated idempotency token
    /// returns the stored message and skips generation.
    pub async fn send_message(&self, request: SendMessage) -> Result<Message> {
        let SendMessage {
            conversation_id,
            sender_role,
            content,
            idempotency_token,
            generator,
            timeout,
        } = request;

        let new = NewMessage::new(conversation_id, sender_role, content).with_token(idempotency_token);
        new.validate()?;
        let requested_id = new.id;

        let guard = self.locks.acquire(conversation_id).await;

        let (conversation, message) = self.commit_incoming(new).await?;

        if message.id != requested_id {
            tracing::info!(
                conversation_id = %conversation_id,
                message_id = %message.id,
                "Duplicate send, returning stored message"
            );
            return Ok(message);
        }

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            role = %message.role,
            "Message stored"
        );
        self.registry
            .publish(conversation_id, &Frame::message(&message))
            .await;

        if let Some(generator) = generator {
            self.spawn_exchange(guard, conversation, message.clone(), generator, timeout)
                .await?;
        }

        Ok(message)
    }

    /// Retry step 3 of an exchange whose reply failed to persist
    pub async fn commit_reply(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        content: String,
    ) -> Result<Message> {
        let new = NewMessage::assistant(message_id, conversation_id, content.clone());
        new.validate()?;

        let _guard = self.locks.acquire(conversation_id).await;

        let reply = in_transaction(self.storage.as_ref(), move |tx| {
            Box::pin(async move { tx.insert_message(new).await })
        })
        .await
        .map_err(|e| match e {
            RepositoryError::AlreadyExists => Error::Conflict("Reply already stored".to_string()),
            RepositoryError::NotFound => conversation_not_found(),
            other => Error::Persistence {
                reason: other.to_string(),
                message_id: Some(message_id),
                generated: Some(content),
            },
        })?;

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            "Reply committed on retry"
        );
        self.registry
            .publish(conversation_id, &Frame::message(&reply))
            .await;

        Ok(reply)
    }

    pub async fn conversation(&self, id: Uuid) -> Result<Conversation> {
        let mut tx = self.storage.begin().await?;
        let conversation = tx.get_conversation(id).await.map_err(conversation_error)?;
        tx.rollback().await?;
        Ok(conversation)
    }

    /// Messages in creation order, optionally only those after `after`
    pub async fn messages(&self, id: Uuid, after: Option<DateTime<Utc>>) -> Result<Vec<Message>> {
        let mut tx = self.storage.begin().await?;
        tx.get_conversation(id).await.map_err(conversation_error)?;
        let messages = tx
            .list_messages(id, after)
            .try_collect::<Vec<_>>()
            .await?;
        tx.rollback().await?;
        Ok(messages)
    }

    /// Apply a lifecycle event (archive, unarchive, delete, restore)
    pub async fn transition_conversation(
        &self,
        id: Uuid,
        event: ConversationEvent,
    ) -> Result<Conversation> {
        let _guard = self.locks.acquire(id).await;

        let mut tx = self.storage.begin().await?;
        let current = tx.get_conversation(id).await.map_err(conversation_error)?;
        let next = ConversationStateMachine::transition(current.status, event)?;
        let updated = tx
            .update_conversation(
                id,
                ConversationUpdate {
                    status: Some(next),
                    ..Default::default()
                },
            )
            .await?;
        tx.commit().await?;

        tracing::info!(
            conversation_id = %id,
            from = %current.status,
            to = %next,
            "Conversation status changed"
        );
        Ok(updated)
    }

    /// Set or clear the title. Blank titles clear it.
    pub async fn rename_conversation(&self, id: Uuid, title: Option<String>) -> Result<Conversation> {
        let title = normalize(title);
        validate_title(title.as_deref())?;

        self.update_visible(
            id,
            ConversationUpdate {
                title: Some(title),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn set_summary(&self, id: Uuid, summary: Option<String>) -> Result<Conversation> {
        self.update_visible(
            id,
            ConversationUpdate {
                summary: Some(normalize(summary)),
                ..Default::default()
            },
        )
        .await
    }

    /// Register a live viewer for a conversation that is not deleted
    pub async fn subscribe(
        &self,
        conversation_id: Uuid,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<()> {
        let conversation = self.conversation(conversation_id).await?;
        if conversation.status == ConversationStatus::Deleted {
            return Err(conversation_not_found());
        }

        self.registry
            .subscribe(conversation_id, subscriber)
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }

    pub async fn unsubscribe(&self, connection_id: ConnectionId) -> usize {
        self.registry.unsubscribe(connection_id).await
    }

    /// Step 1: validate the target and commit the incoming message
    async fn commit_incoming(&self, new: NewMessage) -> Result<(Conversation, Message)> {
        let mut tx = self.storage.begin().await?;

        let mut conversation = tx
            .get_conversation(new.conversation_id)
            .await
            .map_err(conversation_error)?;
        ensure_writable(&conversation)?;

        let message = tx.insert_message(new).await.map_err(|e| match e {
            RepositoryError::AlreadyExists => Error::Conflict(
                "Idempotency token already used in another conversation".to_string(),
            ),
            other => other.into(),
        })?;
        tx.commit().await?;

        conversation.updated_at = conversation.updated_at.max(message.created_at);
        Ok((conversation, message))
    }

    /// Run steps 2 and 3 on a detached task that keeps the conversation
    /// locked until it ends, and wait for its outcome
    async fn spawn_exchange(
        &self,
        guard: ConversationGuard,
        conversation: Conversation,
        user_message: Message,
        generator: Arc<dyn Generator>,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let conversation_id = conversation.id;
        let service = self.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            service
                .run_exchange(conversation, user_message, generator, timeout)
                .await
        });

        task.await.map_err(|e| {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "Exchange task aborted"
            );
            Error::Internal("exchange task aborted".to_string())
        })?
    }

    /// Steps 2 and 3 for a committed user message; returns the stored reply
    async fn run_exchange(
        &self,
        conversation: Conversation,
        user_message: Message,
        generator: Arc<dyn Generator>,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let conversation_id = conversation.id;

        // Nothing has streamed yet; the caller reports this one
        let history = self.load_history(conversation_id).await?;

        let reply_id = Uuid::new_v4();
        let stream = ResponseStream::start(self.registry.clone(), conversation_id, reply_id).await;
        let deadline = timeout.unwrap_or(self.config.generation_timeout);

        tracing::debug!(
            conversation_id = %conversation_id,
            message_id = %reply_id,
            history = history.len(),
            timeout_ms = deadline.as_millis() as u64,
            "Invoking generator"
        );

        let ctx = GenerationContext {
            conversation,
            history,
            user_message: user_message.clone(),
        };
        let call = AssertUnwindSafe(generator.generate(ctx, ChunkSink::new(stream.clone())))
            .catch_unwind();
        let generated = match tokio::time::timeout(deadline, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GenerationError::Failed("generator panicked".to_string())),
            Err(_) => Err(GenerationError::TimedOut(deadline)),
        };

        let text = match generated {
            Ok(text) if text.trim().is_empty() => Err(GenerationError::Empty),
            Ok(text) => {
                if stream.seal(&text).await {
                    Ok(text)
                } else {
                    Err(GenerationError::StreamMismatch)
                }
            }
            Err(e) => Err(e),
        };

        let text = match text {
            Ok(text) => text,
            Err(e) => return Err(self.generation_failed(&stream, &user_message, e).await),
        };

        let new = NewMessage::assistant(reply_id, conversation_id, text.clone());
        let stored = in_transaction(self.storage.as_ref(), move |tx| {
            Box::pin(async move { tx.insert_message(new).await })
        })
        .await;

        match stored {
            Ok(reply) => {
                stream.finish(&reply.content).await;
                tracing::info!(
                    conversation_id = %conversation_id,
                    message_id = %reply.id,
                    "Reply stored"
                );
                Ok(reply)
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    message_id = %reply_id,
                    error = %e,
                    "Generated reply could not be stored"
                );
                let err = Error::Persistence {
                    reason: e.to_string(),
                    message_id: Some(reply_id),
                    generated: Some(text),
                };
                stream.fail(&err.client_message()).await;
                Err(err)
            }
        }
    }

    /// Context window for the generator, read in its own transaction
    async fn load_history(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let mut tx = self.storage.begin().await?;
        let history = tx
            .latest_messages(conversation_id, self.config.history_limit)
            .await?;
        tx.rollback().await?;
        Ok(history)
    }

    async fn generation_failed(
        &self,
        stream: &ResponseStream,
        user_message: &Message,
        cause: GenerationError,
    ) -> Error {
        let conversation_id = user_message.conversation_id;
        tracing::warn!(
            conversation_id = %conversation_id,
            message_id = %user_message.id,
            error = %cause,
            "Generation failed, user message kept"
        );

        let err = Error::GenerationFailed {
            message_id: user_message.id,
            reason: cause.to_string(),
        };
        stream.fail(&err.client_message()).await;

        if self.config.failure_policy == GenerationFailurePolicy::RecordSystemNotice {
            let text = match cause {
                GenerationError::TimedOut(_) => "The assistant did not respond in time",
                _ => "The assistant could not generate a response",
            };
            let notice = NewMessage::system(conversation_id, text);
            let stored = in_transaction(self.storage.as_ref(), move |tx| {
                Box::pin(async move { tx.insert_message(notice).await })
            })
            .await;

            match stored {
                Ok(notice) => {
                    self.registry
                        .publish(conversation_id, &Frame::message(&notice))
                        .await;
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Failed to record generation failure notice"
                    );
                }
            }
        }

        err
    }

    async fn update_visible(&self, id: Uuid, update: ConversationUpdate) -> Result<Conversation> {
        let mut tx = self.storage.begin().await?;
        let current = tx.get_conversation(id).await.map_err(conversation_error)?;
        if current.status == ConversationStatus::Deleted {
            return Err(conversation_not_found());
        }
        let updated = tx.update_conversation(id, update).await?;
        tx.commit().await?;

        tracing::debug!(conversation_id = %id, "Conversation updated");
        Ok(updated)
    }
}

/// Deleted conversations look missing; archived ones are read-only
fn ensure_writable(conversation: &Conversation) -> Result<()> {
    match conversation.status {
        ConversationStatus::Active => Ok(()),
        ConversationStatus::Deleted => Err(conversation_not_found()),
        ConversationStatus::Archived => Err(Error::Validation(
            "Cannot send messages to an archived conversation".to_string(),
        )),
    }
}

fn conversation_not_found() -> Error {
    Error::NotFound("Conversation not found".to_string())
}

fn conversation_error(err: RepositoryError) -> Error {
    match err {
        RepositoryError::NotFound => conversation_not_found(),
        other => other.into(),
    }
}

/// Trim, mapping blank strings to `None`
fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
