//! Error types for the sync engine

use thiserror::Error;

/// SQLite primary result code for "database or disk is full".
const SQLITE_FULL: &str = "13";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Local store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Rejected by server ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    #[error("Retry ceiling exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the failure means nothing reached the remote service.
    pub fn is_transport(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        let full = matches!(
            &err,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLITE_FULL)
        );
        if full {
            SyncError::QuotaExceeded(err.to_string())
        } else {
            SyncError::Database(err)
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
