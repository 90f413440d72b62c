//! API layer for the Conversations domain
//!
//! Contains HTTP handlers, the WebSocket endpoint, routes, and domain state.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use middleware::ConversationsState;
pub use routes::routes;
