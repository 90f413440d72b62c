//! Common state machine error types
//!
//! Shared by lifecycle state machines in the domain crates.

use thiserror::Error;

/// Errors that can occur during state transitions
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Invalid transition: cannot {event} a conversation that is {from}")]
    InvalidTransition { from: String, event: String },
}

impl From<StateError> for crate::Error {
    fn from(err: StateError) -> Self {
        crate::Error::Validation(err.to_string())
    }
}
