//! Error types for Tokenhive.

use thiserror::Error;

/// Main error type for Tokenhive operations.
#[derive(Error, Debug)]
pub enum TokenHiveError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared store errors surfaced outside the limiter façade
    #[error("Store error: {0}")]
    Store(#[from] TransactionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single round trip to the shared store.
///
/// These are never a rejection: a transaction that fails says nothing about
/// the bucket, only that the store could not arbitrate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// The store could not be reached or the connection dropped
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store did not answer within the client timeout
    #[error("store timed out: {0}")]
    Timeout(String),

    /// The store answered with an error
    #[error("store protocol error: {0}")]
    Protocol(String),

    /// The store answered with something the transaction cannot interpret
    #[error("unexpected store reply: {0}")]
    UnexpectedReply(String),
}

impl From<redis::RedisError> for TransactionError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            TransactionError::Timeout(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            TransactionError::Unavailable(err.to_string())
        } else if err.kind() == redis::ErrorKind::TypeError {
            TransactionError::UnexpectedReply(err.to_string())
        } else {
            TransactionError::Protocol(err.to_string())
        }
    }
}

/// Result type alias for Tokenhive operations.
pub type Result<T> = std::result::Result<T, TokenHiveError>;
