//! State machine for conversation status transitions
//!
//! Active ↔ Archived, Active | Archived → Deleted, Deleted → Active (restore).
//! Deletion is soft: rows stay in storage and only the status changes.

pub use threadline_common::StateError;
use serde::{Deserialize, Serialize};

use super::entities::ConversationStatus;

impl ConversationStatus {
    /// Get all valid next states from current state
    pub fn valid_transitions(&self) -> &'static [ConversationStatus] {
        match self {
            Self::Active => &[Self::Archived, Self::Deleted],
            Self::Archived => &[Self::Active, Self::Deleted],
            Self::Deleted => &[Self::Active],
        }
    }
}

/// Events that trigger conversation state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationEvent {
    /// Archive the conversation
    Archive,
    /// Unarchive (reactivate) the conversation
    Unarchive,
    /// Soft-delete the conversation
    Delete,
    /// Bring a deleted conversation back
    Restore,
}

impl std::fmt::Display for ConversationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Archive => write!(f, "archive"),
            Self::Unarchive => write!(f, "unarchive"),
            Self::Delete => write!(f, "delete"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// Conversation state machine
pub struct ConversationStateMachine;

impl ConversationStateMachine {
    /// Attempt a state transition
    pub fn transition(
        current: ConversationStatus,
        event: ConversationEvent,
    ) -> Result<ConversationStatus, StateError> {
        use ConversationEvent as E;
        use ConversationStatus as S;

        let next = match (current, event) {
            (S::Active, E::Archive) => S::Archived,
            (S::Archived, E::Unarchive) => S::Active,
            (S::Active | S::Archived, E::Delete) => S::Deleted,
            (S::Deleted, E::Restore) => S::Active,
            _ => {
                return Err(StateError::InvalidTransition {
                    from: current.to_string(),
                    event: event.to_string(),
                });
            }
        };

        Ok(next)
    }
}
