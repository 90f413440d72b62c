//! Shared utilities, configuration, and error handling for Threadline
//!
//! This crate provides common functionality used across the Threadline workspace:
//! - Configuration management following 12-factor principles
//! - The error taxonomy surfaced to collaborators
//! - Backend-agnostic storage error types
//! - State machine error types

pub mod config;
pub mod db;
pub mod error;
pub mod state;

pub use config::{Config, DatabaseConfig, StorageBackend};
pub use db::RepositoryError;
pub use error::{Error, Result};
pub use state::StateError;
