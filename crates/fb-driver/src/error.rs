//! Driver error types.

use thiserror::Error;

/// Errors reported by a driver adapter.
///
/// The pool wraps these in its own stage-specific error so callers can tell
/// which step failed; the driver only describes what went wrong.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// The server could not be reached or refused the attachment.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Statement execution failed.
    #[error("query failed: {0}")]
    Query(String),

    /// The connection or pool has already been closed.
    #[error("connection closed")]
    Closed,

    /// The connection was already handed back to its pool.
    #[error("connection already detached")]
    AlreadyDetached,

    /// Transaction control failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The driver does not support the requested feature.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// The pool never retries on its own; this only helps callers decide.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
