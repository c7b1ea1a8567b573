//! Sessions: exclusive use of one pooled connection.

use std::fmt;
use std::sync::Arc;

use fb_driver::{DriverConnection, DriverTransaction, IsolationLevel, Row, Value};
use futures_util::StreamExt;
use tokio::sync::OwnedSemaphorePermit;

use crate::cancel::CallOptions;
use crate::error::{Error, Result};
use crate::pool::PoolShared;
use crate::stream::Rows;
use crate::transaction::Transaction;

/// A connection checked out of a [`Pool`](crate::Pool).
///
/// A session is reusable: any number of statements and transactions can run
/// on it until it is released. Release happens exactly once, through
/// [`close`](Session::close), [`query_once`](Session::query_once), or on
/// drop. Dropping a session that still holds its connection detaches it in
/// a background task on the current Tokio runtime; the pool slot frees up
/// once that detach has finished.
///
/// A [`Transaction`] dropped while still open leaves its rollback with the
/// session. The rollback finishes before the session's next statement and
/// before the connection goes back to the pool.
pub struct Session {
    shared: Arc<PoolShared>,
    connection: Option<Box<dyn DriverConnection>>,
    pending_rollback: Option<Box<dyn DriverTransaction>>,
    permit: Option<OwnedSemaphorePermit>,
    id: u64,
}

impl Session {
    pub(crate) fn new(
        shared: Arc<PoolShared>,
        connection: Box<dyn DriverConnection>,
        permit: OwnedSemaphorePermit,
        id: u64,
    ) -> Self {
        Self {
            shared,
            connection: Some(connection),
            pending_rollback: None,
            permit: Some(permit),
            id,
        }
    }

    /// Pool-unique identifier of this session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check if the session still owns its connection.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.connection.is_some()
    }

    /// Execute a statement and return every row, in order.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query_with(sql, params, &CallOptions::default()).await
    }

    /// Execute a statement under timeout and cancellation settings.
    ///
    /// If the call is interrupted the connection is abandoned: it is
    /// detached, and every later call on this session fails with
    /// [`Error::SessionDetached`].
    pub async fn query_with(
        &mut self,
        sql: &str,
        params: &[Value],
        opts: &CallOptions,
    ) -> Result<Vec<Row>> {
        tracing::debug!(
            session = self.id,
            sql = sql,
            params_count = params.len(),
            "executing query"
        );
        self.finish_pending_rollback().await;

        let outcome = {
            let connection = self.connection()?;
            opts.guard(connection.query(sql, params)).await
        };

        match outcome {
            Ok(result) => result.map_err(Error::Query),
            Err(interrupted) => {
                self.abandon().await;
                Err(interrupted.into())
            }
        }
    }

    /// Execute a statement whose result set is usually discarded.
    ///
    /// Same contract as [`query`](Session::query).
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.execute_with(sql, params, &CallOptions::default()).await
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

    /// Execute one statement, then release the session.
    ///
    /// The connection is detached whether or not the statement succeeded.
    /// A statement error takes precedence over a detach error.
    pub async fn query_once(mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let result = self.query(sql, params).await;
        let released = self.release().await;

        match (result, released) {
            (Ok(rows), Ok(())) => Ok(rows),
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Err(detach_err)) => {
                tracing::warn!(
                    session = self.id,
                    error = %detach_err,
                    "failed to detach connection after query error"
                );
                Err(e)
            }
        }
    }

    /// Stream the rows of a statement one at a time.
    ///
    /// The returned [`Rows`] ends only after the driver signals the end of
    /// the result set, or right after an error.
    pub async fn stream<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> Result<Rows<'a>> {
        tracing::debug!(
            session = self.id,
            sql = sql,
            params_count = params.len(),
            "streaming query"
        );
        self.finish_pending_rollback().await;
        let connection = self.connection()?;
        Ok(Rows::new(connection.stream_rows(sql, params)))
    }

    /// Visit every row of a statement in result order.
    ///
    /// `visit` receives each row with its zero-based index. Returns after
    /// the whole result set has been visited, with the number of rows.
    pub async fn sequentially<F>(&mut self, sql: &str, params: &[Value], visit: F) -> Result<usize>
    where
        F: FnMut(Row, usize) + Send,
    {
        self.sequentially_with(sql, params, visit, &CallOptions::default())
            .await
    }

    /// [`sequentially`](Session::sequentially) under timeout and
    /// cancellation settings covering the whole result set.
    pub async fn sequentially_with<F>(
        &mut self,
        sql: &str,
        params: &[Value],
        mut visit: F,
        opts: &CallOptions,
    ) -> Result<usize>
    where
        F: FnMut(Row, usize) + Send,
    {
        let outcome = {
            let mut rows = self.stream(sql, params).await?;
            opts.guard(async move {
                let mut index = 0;
                while let Some(row) = rows.next().await {
                    visit(row?, index);
                    index += 1;
                }
                Ok::<usize, Error>(index)
            })
            .await
        };

        match outcome {
            Ok(result) => result,
            Err(interrupted) => {
                self.abandon().await;
                Err(interrupted.into())
            }
        }
    }

    /// Start a transaction at the given isolation level.
    ///
    /// On failure the session keeps its connection.
    pub async fn transaction(&mut self, isolation_level: IsolationLevel) -> Result<Transaction<'_>> {
        self.transaction_with(isolation_level, &CallOptions::default())
            .await
    }

    /// Start a transaction under timeout and cancellation settings.
    pub async fn transaction_with(
        &mut self,
        isolation_level: IsolationLevel,
        opts: &CallOptions,
    ) -> Result<Transaction<'_>> {
        if !self.shared.supports(isolation_level) {
            return Err(Error::UnsupportedIsolationLevel(isolation_level));
        }

        tracing::debug!(
            session = self.id,
            isolation_level = %isolation_level,
            "beginning transaction"
        );
        self.finish_pending_rollback().await;

        let outcome = {
            let connection = self.connection()?;
            opts.guard(connection.begin_transaction(isolation_level))
                .await
        };

        match outcome {
            Ok(Ok(inner)) => Ok(Transaction::new(self, inner, isolation_level)),
            Ok(Err(e)) => Err(Error::TransactionStart(e)),
            Err(interrupted) => {
                self.abandon().await;
                Err(interrupted.into())
            }
        }
    }

    /// Detach the connection and release the session.
    ///
    /// Fails with [`Error::Detach`] if the driver could not take the
    /// connection back; the pool slot is freed regardless.
    pub async fn close(mut self) -> Result<()> {
        self.release().await
    }

    /// Fail if the session can no longer reach its connection.
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::PoolClosed);
        }
        if self.connection.is_none() {
            return Err(Error::SessionDetached);
        }
        Ok(())
    }

    /// Hand over a dropped transaction to be rolled back before the
    /// connection is used again.
    pub(crate) fn defer_rollback(&mut self, transaction: Box<dyn DriverTransaction>) {
        self.pending_rollback = Some(transaction);
    }

    fn connection(&mut self) -> Result<&mut (dyn DriverConnection + 'static)> {
        self.ensure_usable()?;
        self.connection
            .as_deref_mut()
            .ok_or(Error::SessionDetached)
    }

    async fn finish_pending_rollback(&mut self) {
        let Some(transaction) = self.pending_rollback.take() else {
            return;
        };
        if self.shared.is_closed() {
            return;
        }
        rollback_dropped(self.id, transaction).await;
    }

    /// Detach the connection and free the slot. Safe to call repeatedly.
    async fn release(&mut self) -> Result<()> {
        self.finish_pending_rollback().await;
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        let result = if self.shared.is_closed() {
            // Teardown already closed the connection on the driver side.
            Ok(())
        } else {
            connection.detach().await.map_err(Error::Detach)
        };

        drop(connection);
        self.permit.take();
        self.shared.record_release();

        match &result {
            Ok(()) => tracing::debug!(session = self.id, "connection released"),
            Err(e) => tracing::warn!(session = self.id, error = %e, "connection released with detach error"),
        }
        result
    }

    async fn abandon(&mut self) {
        tracing::warn!(session = self.id, "abandoning connection after interrupted call");
        // release() already logs the detach error.
        let _ = self.release().await;
    }
}

async fn rollback_dropped(id: u64, mut transaction: Box<dyn DriverTransaction>) {
    match transaction.rollback().await {
        Ok(()) => tracing::debug!(session = id, "dropped transaction rolled back"),
        Err(e) => tracing::warn!(session = id, error = %e, "failed to roll back dropped transaction"),
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let pending_rollback = self.pending_rollback.take();
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        let permit = self.permit.take();
        let shared = Arc::clone(&self.shared);
        let id = self.id;

        if shared.is_closed() {
            shared.record_release();
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(session = id, "detaching dropped session in background");
                handle.spawn(async move {
                    if let Some(transaction) = pending_rollback {
                        rollback_dropped(id, transaction).await;
                    }
                    if let Err(e) = connection.detach().await {
                        tracing::warn!(session = id, error = %e, "failed to detach dropped session");
                    }
                    drop(permit);
                    shared.record_release();
                });
            }
            Err(_) => {
                tracing::warn!(
                    session = id,
                    "session dropped outside a Tokio runtime; connection closed without detach"
                );
                shared.record_release();
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("attached", &self.is_attached())
            .field("pending_rollback", &self.pending_rollback.is_some())
            .finish()
    }
}
