//! Conversations domain state

use std::sync::Arc;

use crate::service::{ChatService, Generator};

/// Application state for the Conversations domain
#[derive(Clone)]
pub struct ConversationsState {
    pub service: Arc<ChatService>,
    /// Generator used for replies to messages arriving over the API
    pub generator: Arc<dyn Generator>,
}

impl ConversationsState {
    pub fn new(service: Arc<ChatService>, generator: Arc<dyn Generator>) -> Self {
        Self { service, generator }
    }
}
