//! Common error types and handling for Threadline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy surfaced by the conversation core to its collaborators
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A commit failed. When it follows a successful generation, the generated
    /// text and the pre-allocated message id travel with the error so the
    /// caller can retry the commit instead of losing the reply.
    #[error("Persistence error: {reason}")]
    Persistence {
        reason: String,
        message_id: Option<Uuid>,
        generated: Option<String>,
    },

    /// The generator failed or missed its deadline. `message_id` is the
    /// already-committed user message, which stays persisted.
    #[error("Generation failed: {reason}")]
    GenerationFailed { message_id: Uuid, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a persistence failure without a recovery payload
    pub fn persistence(reason: impl Into<String>) -> Self {
        Error::Persistence {
            reason: reason.into(),
            message_id: None,
            generated: None,
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Persistence { .. } | Error::Serialization(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for API responses and error frames
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Error::Conflict(_) => "CONFLICT",
            Error::Persistence { .. } => "PERSISTENCE_ERROR",
            Error::GenerationFailed { .. } => "GENERATION_FAILED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Generated text that was not persisted, if any
    pub fn generated_text(&self) -> Option<&str> {
        match self {
            Error::Persistence { generated, .. } => generated.as_deref(),
            _ => None,
        }
    }

    /// Whether the caller can retry the failed step without re-running generation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Persistence {
                generated: Some(_),
                ..
            }
        )
    }

    /// Message safe to show an end user: no backend or provider internals
    pub fn client_message(&self) -> String {
        match self {
            Error::StorageUnavailable(_) => "The message store is unavailable".to_string(),
            Error::Conflict(msg) | Error::NotFound(msg) | Error::Validation(msg) => msg.clone(),
            Error::GenerationFailed { .. } => "The assistant could not generate a response".to_string(),
            Error::Persistence {
                generated: Some(_), ..
            } => "The response was generated but could not be saved; it can be retried".to_string(),
            Error::Persistence { .. } => "The message could not be saved".to_string(),
            Error::Serialization(_) | Error::Internal(_) => "Internal error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Log internal errors with full context
        if matches!(self.status_code(), StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "Internal server error");
        }

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": self.client_message(),
            }
        });

        if let Error::Persistence {
            message_id,
            generated: Some(generated),
            ..
        } = &self
        {
            body["error"]["recovery"] = json!({
                "message_id": message_id,
                "generated": generated,
            });
        }

        (status, Json(body)).into_response()
    }
}
