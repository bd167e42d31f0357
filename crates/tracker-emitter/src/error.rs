//! Emitter error types.

use thiserror::Error;

/// Emitter error type.
#[derive(Error, Debug)]
pub enum EmitterError {
    /// The event store failed to persist or read
    #[error("Persistence error: {0}")]
    Persistence(#[from] tracker_event_store::StoreError),

    /// HTTP client construction error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid endpoint URL
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// `start` was called on a running emitter
    #[error("Emitter already started")]
    AlreadyStarted,

    /// The driver loop is not running
    #[error("Emitter is not running")]
    NotRunning,

    /// A bounded wait expired
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias using EmitterError.
pub type EmitterResult<T> = Result<T, EmitterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_error_from_store() {
        let store_err = tracker_event_store::StoreError::InvalidPayload("nested".to_string());
        let err: EmitterError = store_err.into();
        assert_eq!(err.to_string(), "Persistence error: Invalid payload: nested");
    }

    #[test]
    fn timeout_display() {
        let err = EmitterError::Timeout(std::time::Duration::from_secs(2));
        assert_eq!(err.to_string(), "Timed out after 2s");
    }
}
