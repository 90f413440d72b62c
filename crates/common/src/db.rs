//! Shared database types for Threadline
//!
//! `RepositoryError` is the only error type that crosses the storage port.
//! Adapters convert driver errors into it and keep backend detail in the logs.

use crate::error::Error;
use thiserror::Error;

/// Database-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Record already exists")]
    AlreadyExists,

    #[error("Storage backend unavailable")]
    Unavailable,

    #[error("Storage operation failed: {0}")]
    Persistence(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound,
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => {
                tracing::warn!(error = %err, "Storage backend unreachable");
                RepositoryError::Unavailable
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                tracing::debug!(error = %db, "Unique constraint violated");
                RepositoryError::AlreadyExists
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                tracing::debug!(error = %db, "Foreign key constraint violated");
                RepositoryError::NotFound
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                tracing::error!(error = %err, "Failed to decode stored row");
                RepositoryError::InvalidData("stored row could not be decoded".to_string())
            }
            other => {
                tracing::error!(error = %other, "Storage operation failed");
                RepositoryError::Persistence("storage operation failed".to_string())
            }
        }
    }
}

impl From<RepositoryError> for Error {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Error::NotFound("Record not found".to_string()),
            RepositoryError::AlreadyExists => Error::Conflict("Record already exists".to_string()),
            RepositoryError::Unavailable => {
                Error::StorageUnavailable("Storage backend unavailable".to_string())
            }
            RepositoryError::Persistence(msg) => Error::persistence(msg),
            RepositoryError::InvalidData(msg) => Error::Internal(msg),
        }
    }
}
