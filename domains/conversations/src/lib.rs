//! Conversations domain: threads, messages, two-phase exchanges, live delivery

pub mod api;
pub mod delivery;
pub mod domain;
pub mod repository;
pub mod service;

// Re-export domain types at the crate root for convenience
pub use domain::entities::{
    Conversation, ConversationStatus, Message, MessageRole, NewConversation, NewMessage,
};
pub use domain::state::{ConversationEvent, ConversationStateMachine, StateError};

// Re-export storage port
pub use repository::{
    connect_storage, in_transaction, ChatStorage, ChatTransaction, ConversationUpdate,
    PostgresChatStorage, SqliteChatStorage,
};

// Re-export delivery and orchestration
pub use delivery::{
    ChannelSubscriber, ConnectionId, DeliveryError, Frame, Subscriber, SubscriptionRegistry,
};
pub use service::{
    ChatService, ChunkSink, CreateThread, EchoGenerator, ExchangeOutcome, FnGenerator,
    GenerationContext, GenerationError, GenerationFailurePolicy, Generator, SendMessage,
    ServiceConfig,
};

// Re-export API types
pub use api::routes;
pub use api::ConversationsState;
