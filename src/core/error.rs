use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PalaceError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {message} (conflicting id: {conflicting_id})")]
    Conflict {
        message: String,
        conflicting_id: String,
    },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("Collaborator failed: {0}")]
    CollaboratorFailed(String),
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PalaceError {
    pub fn conflict(message: impl Into<String>, conflicting_id: impl Into<String>) -> Self {
        PalaceError::Conflict {
            message: message.into(),
            conflicting_id: conflicting_id.into(),
        }
    }

    /// Id of the entity that caused a conflict, if this is a conflict error.
    pub fn conflicting_id(&self) -> Option<&str> {
        match self {
            PalaceError::Conflict { conflicting_id, .. } => Some(conflicting_id),
            _ => None,
        }
    }
}
