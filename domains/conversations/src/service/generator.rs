//! Generator seam: the slow, fallible step between the two commits
//!
//! A generator receives the conversation context and a `ChunkSink`. It may
//! push partial text through the sink any number of times, then returns the
//! final text. The provider behind it is opaque to this crate.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::delivery::ResponseStream;
use crate::domain::entities::{Conversation, Message};

/// Everything a generator gets to see
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub conversation: Conversation,
    /// Most recent messages in ascending order, ending with `user_message`
    pub history: Vec<Message>,
    pub user_message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("Generator failed: {0}")]
    Failed(String),

    #[error("Generator timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Generator returned an empty response")]
    Empty,

    #[error("Final text does not match the streamed chunks")]
    StreamMismatch,
}

/// Side channel for partial output. Cloneable; chunks pushed after the
/// generator returns are ignored.
#[derive(Clone)]
pub struct ChunkSink {
    stream: ResponseStream,
}

impl ChunkSink {
    pub(crate) fn new(stream: ResponseStream) -> Self {
        Self { stream }
    }

    /// Publish one chunk of the reply to every subscriber
    pub async fn send(&self, text: impl AsRef<str>) {
        self.stream.chunk(text.as_ref()).await;
    }

    /// Id the reply will be stored under
    pub fn message_id(&self) -> uuid::Uuid {
        self.stream.message_id()
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        ctx: GenerationContext,
        sink: ChunkSink,
    ) -> Result<String, GenerationError>;
}

/// Adapts an async closure into a `Generator`
pub struct FnGenerator<F> {
    f: F,
}

impl<F, Fut> FnGenerator<F>
where
    F: Fn(GenerationContext, ChunkSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, GenerationError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Generator for FnGenerator<F>
where
    F: Fn(GenerationContext, ChunkSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, GenerationError>> + Send + 'static,
{
    async fn generate(
        &self,
        ctx: GenerationContext,
        sink: ChunkSink,
    ) -> Result<String, GenerationError> {
        (self.f)(ctx, sink).await
    }
}

/// Replies "Echo: <user text>", streamed word by word
#[derive(Debug, Clone, Default)]
pub struct EchoGenerator {
    delay: Duration,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between chunks, to make streaming visible in a client
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(
        &self,
        ctx: GenerationContext,
        sink: ChunkSink,
    ) -> Result<String, GenerationError> {
        tracing::info!(
            conversation_id = %ctx.conversation.id,
            history = ctx.history.len(),
            "Echo generator processing message"
        );

        let reply = format!("Echo: {}", ctx.user_message.content);
        for word in reply.split_inclusive(' ') {
            sink.send(word).await;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        Ok(reply)
    }
}
