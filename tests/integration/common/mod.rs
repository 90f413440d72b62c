//! Common test utilities and fixtures for integration tests
//!
//! This module provides shared infrastructure for all integration tests:
//! - An in-memory SQLite service wired to a fresh subscription registry
//! - A storage wrapper that can fail a chosen `begin()` call
//! - Frame recorders standing in for live sockets
//! - Scripted generators

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use threadline_common::{RepositoryError, StorageBackend};
use threadline_conversations::{
    ChannelSubscriber, ChatService, ChatStorage, ChatTransaction, ConnectionId, Conversation,
    FnGenerator, Frame, GenerationContext, GenerationError, Generator, ServiceConfig,
    SqliteChatStorage, SubscriptionRegistry,
};

/// Storage decorator that fails one chosen `begin()` with `Unavailable`
pub struct FlakyStorage {
    inner: Arc<dyn ChatStorage>,
    begins: AtomicUsize,
    fail_at: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: Arc<dyn ChatStorage>) -> Self {
        Self {
            inner,
            begins: AtomicUsize::new(0),
            fail_at: AtomicUsize::new(0),
        }
    }

    /// Make the `n`th `begin()` from now fail (1 = the next one)
    pub fn fail_begin(&self, n: usize) {
        let current = self.begins.load(Ordering::SeqCst);
        self.fail_at.store(current + n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatStorage for FlakyStorage {
    async fn begin(&self) -> Result<Box<dyn ChatTransaction>, RepositoryError> {
        let n = self.begins.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_at.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable);
        }
        self.inner.begin().await
    }

    async fn migrate(&self) -> Result<(), RepositoryError> {
        self.inner.migrate().await
    }

    async fn close(&self) {
        self.inner.close().await
    }

    fn backend(&self) -> StorageBackend {
        self.inner.backend()
    }
}

/// Test application: service over in-memory SQLite
pub struct TestApp {
    pub service: Arc<ChatService>,
    pub storage: Arc<FlakyStorage>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(ServiceConfig::default()).await
    }

    pub async fn with_config(config: ServiceConfig) -> Self {
        let sqlite = SqliteChatStorage::in_memory()
            .await
            .expect("in-memory storage");
        let storage = Arc::new(FlakyStorage::new(Arc::new(sqlite)));
        let service = Arc::new(ChatService::new(
            storage.clone(),
            Arc::new(SubscriptionRegistry::new()),
            config,
        ));
        Self { service, storage }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        self.service.registry()
    }

    /// Create an active conversation with a random owner
    pub async fn conversation(&self) -> Conversation {
        self.service
            .create_conversation(Uuid::new_v4(), Some("Test conversation".to_string()))
            .await
            .expect("create conversation")
    }

    /// Subscribe a recording connection to a conversation
    pub async fn subscribe(&self, conversation_id: Uuid) -> Recorder {
        let (subscriber, rx) = ChannelSubscriber::channel();
        let id = threadline_conversations::Subscriber::id(&subscriber);
        self.service
            .subscribe(conversation_id, Arc::new(subscriber))
            .await
            .expect("subscribe");
        Recorder { id, rx }
    }
}

/// Stand-in for a live socket: collects every frame delivered to it
pub struct Recorder {
    pub id: ConnectionId,
    pub rx: UnboundedReceiver<Frame>,
}

impl Recorder {
    /// Frames delivered so far
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub fn kinds(frames: &[Frame]) -> Vec<&'static str> {
    frames.iter().map(Frame::kind).collect()
}

/// Concatenated `stream_chunk` text and the `stream_end` content, if any
pub fn stream_text(frames: &[Frame]) -> (String, Option<String>) {
    let mut chunks = String::new();
    let mut end = None;
    for frame in frames {
        match frame {
            Frame::StreamChunk { text, .. } => chunks.push_str(text),
            Frame::StreamEnd { content, .. } => end = Some(content.clone()),
            _ => {}
        }
    }
    (chunks, end)
}

/// Streams `chunks`, then returns `final_text`
pub fn scripted(chunks: &[&str], final_text: &str) -> Arc<dyn Generator> {
    let chunks: Vec<String> = chunks.iter().map(|c| c.to_string()).collect();
    let final_text = final_text.to_string();
    Arc::new(FnGenerator::new(move |_ctx: GenerationContext, sink| {
        let chunks = chunks.clone();
        let final_text = final_text.clone();
        async move {
            for chunk in &chunks {
                sink.send(chunk).await;
            }
            Ok(final_text)
        }
    }))
}

/// Always fails after streaming one chunk
pub fn failing(reason: &str) -> Arc<dyn Generator> {
    let reason = reason.to_string();
    Arc::new(FnGenerator::new(move |_ctx: GenerationContext, sink| {
        let reason = reason.clone();
        async move {
            sink.send("partial ").await;
            Err::<String, _>(GenerationError::Failed(reason))
        }
    }))
}

/// Sleeps before answering
pub fn slow(delay: Duration, reply: &str) -> Arc<dyn Generator> {
    let reply = reply.to_string();
    Arc::new(FnGenerator::new(move |_ctx: GenerationContext, _sink| {
        let reply = reply.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(reply)
        }
    }))
}

/// Counts invocations and echoes the user message
pub fn counting(calls: Arc<AtomicUsize>) -> Arc<dyn Generator> {
    Arc::new(FnGenerator::new(move |ctx: GenerationContext, _sink| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("re: {}", ctx.user_message.content))
        }
    }))
}
