//! Per-call timeouts and cancellation.
//!
//! Any acquire, statement or transaction call can take a [`CallOptions`]
//! carrying a timeout, a [`CancellationToken`], or both. When either fires
//! the in-flight driver future is dropped and the owning handle releases
//! its connection:
//!
//! - a waiting `acquire` gives up its place in the queue,
//! - a Session statement abandons the connection (it is detached, and the
//!   slot is freed),
//! - a Transaction statement poisons the transaction, which then only
//!   accepts `rollback`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_pool::CallOptions;
//! use tokio_util::sync::CancellationToken;
//!
//! let token = CancellationToken::new();
//! let opts = CallOptions::new()
//!     .timeout(Duration::from_secs(5))
//!     .cancel_token(token.clone());
//!
//! let rows = session.query_with("SELECT * FROM big_table", &[], &opts).await?;
//! ```

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Timeout and cancellation settings for a single call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    timeout: Option<Duration>,
    token: Option<CancellationToken>,
}

impl CallOptions {
    /// Options with neither timeout nor cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the call with [`Error::Timeout`] after `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fail the call with [`Error::Cancelled`] once `token` is cancelled.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Get the timeout, if any.
    #[must_use]
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get the cancellation token, if any.
    #[must_use]
    pub fn get_cancel_token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// Use `fallback` when no timeout was set explicitly.
    pub(crate) fn or_timeout(&self, fallback: Option<Duration>) -> Self {
        Self {
            timeout: self.timeout.or(fallback),
            token: self.token.clone(),
        }
    }

    /// Run `fut` under these options.
    ///
    /// Returns `Err` with the interruption if the timeout elapsed or the
    /// token was cancelled first; `fut` is dropped in that case.
    pub(crate) async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let timed = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| Interrupted::TimedOut(limit)),
                None => Ok(fut.await),
            }
        };

        match &self.token {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(Interrupted::Cancelled),
                    out = timed => out,
                }
            }
            None => timed.await,
        }
    }
}

/// Why a guarded call stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupted {
    TimedOut(Duration),
    Cancelled,
}

impl From<Interrupted> for Error {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(limit) => Error::Timeout(limit),
            Interrupted::Cancelled => Error::Cancelled,
        }
    }
}
