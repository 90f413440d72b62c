//! Conversations domain model

pub mod entities;
pub mod state;
