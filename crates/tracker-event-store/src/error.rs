//! Event store error types.

use thiserror::Error;

/// Event store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Payload could not be represented as a flat key/value event
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Stored row could not be decoded
    #[error("Corrupt event {id}: {reason}")]
    Corrupt {
        /// Id of the unreadable row.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
