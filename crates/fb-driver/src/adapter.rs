//! Driver adapter traits.
//!
//! These traits are the only way the pool reaches a database. They use
//! `#[async_trait]` because the pool stores every driver object behind a
//! trait object.

use std::pin::Pin;

use futures_core::Stream;

use crate::descriptor::ConnectionDescriptor;
use crate::error::Result;
use crate::isolation::IsolationLevel;
use crate::value::{Row, Value};

/// A lazily produced, single-pass sequence of rows.
///
/// The stream ends after the driver signals end-of-stream, or right after
/// yielding an error.
pub type RowStream<'a> = Pin<Box<dyn Stream<Item = Result<Row>> + Send + 'a>>;

/// Entry point of a driver: opens pools against a descriptor.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Open a driver-level pool of `size` connections.
    ///
    /// Whether connections are opened eagerly or on first acquire is up to
    /// the driver. Rejecting the descriptor (unreachable host, bad
    /// credentials) is reported here.
    async fn open_pool(
        &self,
        size: u32,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DriverPool>>;

    /// Isolation levels this driver can start transactions with.
    fn isolation_levels(&self) -> &[IsolationLevel] {
        &IsolationLevel::ALL
    }
}

/// A driver-level pool of connections.
#[async_trait::async_trait]
pub trait DriverPool: Send + Sync {
    /// Hand out a connection.
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>>;

    /// Close every connection of the pool.
    ///
    /// Implementations attempt to close all connections before reporting
    /// the first failure.
    async fn teardown(&self) -> Result<()>;
}

/// One live connection checked out of a [`DriverPool`].
#[async_trait::async_trait]
pub trait DriverConnection: Send {
    /// Execute a statement and collect the full result set.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a statement and stream its rows in result order.
    fn stream_rows<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> RowStream<'a>;

    /// Hand the connection back to its driver pool.
    ///
    /// A second detach reports [`DriverError::AlreadyDetached`](crate::DriverError::AlreadyDetached).
    async fn detach(&mut self) -> Result<()>;

    /// Start a transaction on this connection.
    async fn begin_transaction(
        &mut self,
        isolation_level: IsolationLevel,
    ) -> Result<Box<dyn DriverTransaction>>;
}

/// A transaction started on a [`DriverConnection`].
#[async_trait::async_trait]
pub trait DriverTransaction: Send {
    /// Execute a statement inside the transaction.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Commit the transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the transaction.
    async fn rollback(&mut self) -> Result<()>;
}
