//! Pool error types.
//!
//! Every driver failure is wrapped in the variant of the stage it happened
//! in, so callers can decide whether to retry acquisition, retry the
//! statement or give up.

use std::time::Duration;

use fb_driver::{DriverError, IsolationLevel};
use thiserror::Error;

use crate::transaction::TransactionState;

/// Errors that can occur during pool, session and transaction operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Opening the pool or acquiring a connection failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] DriverError),

    /// Statement execution failed.
    #[error("query failed: {0}")]
    Query(#[source] DriverError),

    /// Returning a connection to the pool failed.
    #[error("failed to detach connection: {0}")]
    Detach(#[source] DriverError),

    /// The driver could not start a transaction.
    #[error("failed to start transaction: {0}")]
    TransactionStart(#[source] DriverError),

    /// Commit failed; the transaction is now poisoned.
    #[error("commit failed: {0}")]
    Commit(#[source] DriverError),

    /// Rollback failed.
    #[error("rollback failed: {0}")]
    Rollback(#[source] DriverError),

    /// Tearing down the pool failed.
    #[error("pool teardown failed: {0}")]
    Teardown(#[source] DriverError),

    /// The pool has been destroyed.
    #[error("pool is closed")]
    PoolClosed,

    /// The session no longer owns a connection.
    #[error("session connection already detached")]
    SessionDetached,

    /// The transaction is in a state that does not allow the operation.
    #[error("transaction is {0}")]
    TransactionFinished(TransactionState),

    /// The driver does not support the requested isolation level.
    #[error("isolation level {0} is not supported by the driver")]
    UnsupportedIsolationLevel(IsolationLevel),

    /// The operation did not finish within its timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

/// The stage of work an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Pool construction or connection acquisition.
    Connect,
    /// Statement execution.
    Query,
    /// Connection release.
    Detach,
    /// Transaction start.
    TransactionStart,
    /// Transaction commit.
    Commit,
    /// Transaction rollback.
    Rollback,
    /// Pool teardown.
    Teardown,
    /// Misuse of a handle, configuration or an interrupted call.
    Usage,
}

impl Error {
    /// Get the stage this error belongs to.
    ///
    /// Acquiring from a destroyed pool reports [`Stage::Connect`].
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Connect(_) | Self::PoolClosed => Stage::Connect,
            Self::Query(_) => Stage::Query,
            Self::Detach(_) => Stage::Detach,
            Self::TransactionStart(_) | Self::UnsupportedIsolationLevel(_) => {
                Stage::TransactionStart
            }
            Self::Commit(_) => Stage::Commit,
            Self::Rollback(_) => Stage::Rollback,
            Self::Teardown(_) => Stage::Teardown,
            Self::SessionDetached
            | Self::TransactionFinished(_)
            | Self::Timeout(_)
            | Self::Cancelled
            | Self::Configuration(_) => Stage::Usage,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// The pool performs no retries itself.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Connect(e) | Self::Query(e) | Self::TransactionStart(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Get the underlying driver error, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Connect(e)
            | Self::Query(e)
            | Self::Detach(e)
            | Self::TransactionStart(e)
            | Self::Commit(e)
            | Self::Rollback(e)
            | Self::Teardown(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
