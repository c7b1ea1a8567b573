//! Transaction support.
//!
//! A [`Transaction`] mutably borrows the [`Session`] it was started on, so a
//! session runs at most one transaction at a time and cannot be closed
//! while one is alive.
//!
//! ## State Transitions
//!
//! ```text
//! Open -> Committed   (via commit())
//! Open -> RolledBack  (via rollback())
//! Open -> Poisoned    (commit() failed, or a call was interrupted)
//! Poisoned -> RolledBack (via rollback())
//! ```
//!
//! `Committed` and `RolledBack` are terminal. A `Poisoned` transaction is in
//! an unknown server-side state; the only accepted call is `rollback()`.
//! Dropping an open or poisoned transaction queues its rollback on the
//! session.

use std::fmt;

use fb_driver::{DriverTransaction, IsolationLevel, Row, Value};

use crate::cancel::CallOptions;
use crate::error::{Error, Result};
use crate::session::Session;

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Statements can run.
    Open,
    /// Committed; terminal.
    Committed,
    /// Rolled back; terminal.
    RolledBack,
    /// Outcome unknown after a failed commit or an interrupted call.
    Poisoned,
}

impl TransactionState {
    /// Check if no further call is accepted.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Poisoned => "poisoned",
        })
    }
}

/// A transaction running on a [`Session`]'s connection.
///
/// Statements run through [`query`](Transaction::query) and
/// [`execute`](Transaction::execute) never release the connection.
///
/// # Example
///
/// ```rust,ignore
/// let mut session = pool.acquire().await?;
/// let mut tx = session.transaction(IsolationLevel::ReadCommitted).await?;
///
/// tx.execute("INSERT INTO T(x) VALUES (?)", &[5.into()]).await?;
/// tx.commit().await?;
/// drop(tx);
///
/// session.close().await?;
/// ```
///
/// Dropping a transaction that is still open or poisoned rolls it back
/// before the session runs anything else or releases its connection.
pub struct Transaction<'s> {
    session: &'s mut Session,
    inner: Option<Box<dyn DriverTransaction>>,
    isolation_level: IsolationLevel,
    state: TransactionState,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new(
        session: &'s mut Session,
        inner: Box<dyn DriverTransaction>,
        isolation_level: IsolationLevel,
    ) -> Self {
        Self {
            session,
            inner: Some(inner),
            isolation_level,
            state: TransactionState::Open,
        }
    }

    /// Get the isolation level of this transaction.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Check if statements can still run.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Execute a statement inside the transaction.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query_with(sql, params, &CallOptions::default()).await
    }

    /// Execute a statement under timeout and cancellation settings.
    ///
    /// An interrupted statement poisons the transaction.
    pub async fn query_with(
        &mut self,
        sql: &str,
        params: &[Value],
        opts: &CallOptions,
    ) -> Result<Vec<Row>> {
        self.ensure(&[TransactionState::Open])?;
        tracing::debug!(
            session = self.session.id(),
            sql = sql,
            params_count = params.len(),
            "executing query in transaction"
        );

        let inner = self
            .inner
            .as_deref_mut()
            .ok_or(Error::TransactionFinished(self.state))?;

        match opts.guard(inner.query(sql, params)).await {
            Ok(result) => result.map_err(Error::Query),
            Err(interrupted) => {
                self.state = TransactionState::Poisoned;
                Err(interrupted.into())
            }
        }
    }

    /// Execute a statement whose result set is usually discarded.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query(sql, params).await
    }

    /// Execute a statement under timeout and cancellation settings.
    pub async fn execute_with(
        &mut self,
        sql: &str,
        params: &[Value],
        opts: &CallOptions,
    ) -> Result<Vec<Row>> {
        self.query_with(sql, params, opts).await
    }

    /// Commit the transaction.
    ///
    /// On failure the transaction becomes [`TransactionState::Poisoned`]
    /// and must be rolled back or dropped.
    pub async fn commit(&mut self) -> Result<()> {
        self.commit_with(&CallOptions::default()).await
    }

    /// Commit under timeout and cancellation settings.
    pub async fn commit_with(&mut self, opts: &CallOptions) -> Result<()> {
        self.ensure(&[TransactionState::Open])?;
        tracing::debug!(session = self.session.id(), "committing transaction");

        let inner = self
            .inner
            .as_deref_mut()
            .ok_or(Error::TransactionFinished(self.state))?;

        match opts.guard(inner.commit()).await {
            Ok(Ok(())) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = TransactionState::Poisoned;
                Err(Error::Commit(e))
            }
            Err(interrupted) => {
                self.state = TransactionState::Poisoned;
                Err(interrupted.into())
            }
        }
    }

    /// Roll back the transaction.
    ///
    /// Accepted while open or poisoned.
    pub async fn rollback(&mut self) -> Result<()> {
        self.rollback_with(&CallOptions::default()).await
    }

    /// Roll back under timeout and cancellation settings.
    pub async fn rollback_with(&mut self, opts: &CallOptions) -> Result<()> {
        self.ensure(&[TransactionState::Open, TransactionState::Poisoned])?;
        tracing::debug!(session = self.session.id(), "rolling back transaction");

        let inner = self
            .inner
            .as_deref_mut()
            .ok_or(Error::TransactionFinished(self.state))?;

        match opts.guard(inner.rollback()).await {
            Ok(Ok(())) => {
                self.state = TransactionState::RolledBack;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = TransactionState::Poisoned;
                Err(Error::Rollback(e))
            }
            Err(interrupted) => {
                self.state = TransactionState::Poisoned;
                Err(interrupted.into())
            }
        }
    }

    fn ensure(&self, allowed: &[TransactionState]) -> Result<()> {
        self.session.ensure_usable()?;
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::TransactionFinished(self.state))
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state.is_terminal() || self.session.ensure_usable().is_err() {
            return;
        }
        let Some(inner) = self.inner.take() else {
            return;
        };

        tracing::warn!(
            session = self.session.id(),
            state = %self.state,
            "transaction dropped without commit or rollback; rolling back before next use"
        );
        self.session.defer_rollback(inner);
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("session", &self.session.id())
            .field("isolation_level", &self.isolation_level)
            .field("state", &self.state)
            .finish()
    }
}
