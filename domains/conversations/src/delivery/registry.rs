//! Subscription registry for live conversation viewers
//!
//! ```text
//! conversation A          conversation B
//! ├── conn-1              └── conn-4
//! ├── conn-2
//! └── conn-3
//! ```
//!
//! A publish to A reaches conn-1..3 only. The lock guards the maps and is
//! released before any frame is delivered, so one slow socket never blocks
//! subscribe/unsubscribe or publishes to other conversations.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::frames::Frame;

/// Unique identifier for a live connection, generated server-side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Connection closed")]
    Closed,

    #[error("Delivery failed: {0}")]
    Failed(String),

    #[error("Subscription registry is shut down")]
    ShutDown,
}

/// A live delivery channel for one conversation viewer
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Deliver one frame. An error marks the handle stale.
    async fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError>;
}

/// Subscriber backed by an unbounded channel; the receiving half is usually
/// drained by a socket writer task.
pub struct ChannelSubscriber {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelSubscriber {
    pub fn new(id: ConnectionId, tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self { id, tx }
    }

    /// Fresh subscriber plus the receiver its frames arrive on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(ConnectionId::new(), tx), rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn deliver(&self, frame: &Frame) -> Result<(), DeliveryError> {
        self.tx.send(frame.clone()).map_err(|_| DeliveryError::Closed)
    }
}

#[derive(Default)]
struct Rooms {
    /// conversation id → connections viewing it
    conversations: HashMap<Uuid, HashMap<ConnectionId, Arc<dyn Subscriber>>>,
    /// connection id → conversations it joined, for O(1) cleanup on disconnect
    connections: HashMap<ConnectionId, HashSet<Uuid>>,
}

impl Rooms {
    fn remove_connection(&mut self, connection_id: ConnectionId) -> usize {
        let Some(conversation_ids) = self.connections.remove(&connection_id) else {
            return 0;
        };

        for conversation_id in &conversation_ids {
            if let Some(room) = self.conversations.get_mut(conversation_id) {
                room.remove(&connection_id);
                if room.is_empty() {
                    self.conversations.remove(conversation_id);
                }
            }
        }

        conversation_ids.len()
    }
}

/// Tracks which connections watch which conversation and fans frames out
#[derive(Default)]
pub struct SubscriptionRegistry {
    rooms: RwLock<Rooms>,
    shut_down: AtomicBool,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a conversation. A connection may watch
    /// several conversations; subscribing twice is a no-op.
    pub async fn subscribe(
        &self,
        conversation_id: Uuid,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<(), DeliveryError> {
        let mut rooms = self.rooms.write().await;
        if self.shut_down.load(Ordering::Acquire) {
            return Err(DeliveryError::ShutDown);
        }

        let connection_id = subscriber.id();
        rooms
            .conversations
            .entry(conversation_id)
            .or_default()
            .insert(connection_id, subscriber);
        rooms
            .connections
            .entry(connection_id)
            .or_default()
            .insert(conversation_id);

        tracing::debug!(
            conversation_id = %conversation_id,
            connection_id = %connection_id,
            "Subscriber registered"
        );
        Ok(())
    }

    /// Remove a connection from every conversation it watches.
    /// Returns how many subscriptions were dropped.
    pub async fn unsubscribe(&self, connection_id: ConnectionId) -> usize {
        let removed = self.rooms.write().await.remove_connection(connection_id);
        if removed > 0 {
            tracing::debug!(connection_id = %connection_id, removed, "Subscriber removed");
        }
        removed
    }

    /// Remove a connection from a single conversation
    pub async fn leave(&self, conversation_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;

        let removed = match rooms.conversations.get_mut(&conversation_id) {
            Some(room) => {
                let removed = room.remove(&connection_id).is_some();
                if room.is_empty() {
                    rooms.conversations.remove(&conversation_id);
                }
                removed
            }
            None => false,
        };

        if let Some(joined) = rooms.connections.get_mut(&connection_id) {
            joined.remove(&conversation_id);
            if joined.is_empty() {
                rooms.connections.remove(&connection_id);
            }
        }

        removed
    }

    /// Deliver `frame` to every subscriber of the conversation.
    /// Stale handles are dropped from the registry; returns the number of
    /// successful deliveries.
    pub async fn publish(&self, conversation_id: Uuid, frame: &Frame) -> usize {
        let targets: Vec<Arc<dyn Subscriber>> = {
            let rooms = self.rooms.read().await;
            match rooms.conversations.get(&conversation_id) {
                Some(room) => room.values().cloned().collect(),
                None => return 0,
            }
        };

        let results = join_all(targets.iter().map(|subscriber| async move {
            (subscriber.id(), subscriber.deliver(frame).await)
        }))
        .await;

        let mut delivered = 0;
        let mut stale = Vec::new();
        for (connection_id, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        connection_id = %connection_id,
                        error = %e,
                        "Dropping stale subscriber"
                    );
                    stale.push(connection_id);
                }
            }
        }

        if !stale.is_empty() {
            let mut rooms = self.rooms.write().await;
            for connection_id in stale {
                rooms.remove_connection(connection_id);
            }
        }

        delivered
    }

    /// Number of subscribers currently watching a conversation
    pub async fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .map_or(0, HashMap::len)
    }

    /// Conversations with at least one subscriber
    pub async fn active_conversations(&self) -> Vec<Uuid> {
        self.rooms.read().await.conversations.keys().copied().collect()
    }

    /// Drop every subscription and refuse new ones. Dropping a
    /// `ChannelSubscriber` closes its channel, which ends the writer task.
    pub async fn shutdown(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        self.shut_down.store(true, Ordering::Release);

        let connections = rooms.connections.len();
        rooms.conversations.clear();
        rooms.connections.clear();

        tracing::info!(connections, "Subscription registry shut down");
        connections
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
