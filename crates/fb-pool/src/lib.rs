//! # fb-pool
//!
//! Async connection pool for Firebird-style databases, with reusable
//! sessions and explicit transactions.
//!
//! The pool reaches the database only through the [`fb_driver`] adapter
//! traits, so any wire-protocol client can sit underneath it.
//!
//! ## Features
//!
//! - Fixed-size pool; `acquire` waits (FIFO) when every connection is out
//! - Permissive options resolution with Firebird defaults
//! - Reusable [`Session`]s plus single-shot `run_once` / `query_once`
//! - Row streaming that completes only at end of result set
//! - Transactions at any driver-supported [`IsolationLevel`], with a
//!   poisoned state after a failed commit
//! - Per-call timeouts and cancellation tokens that still release the
//!   connection
//! - Errors typed by stage: connect, query, detach, transaction
//!   start/commit/rollback, teardown
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_pool::{IsolationLevel, Pool, Uri};
//!
//! let uri = Uri::new("localhost", 3050, "employee", "SYSDBA", "masterkey").pool(4);
//! let pool = Pool::new(&driver, &uri).await?;
//!
//! // One-shot statement: acquire, run, release.
//! let rows = pool.run_once("SELECT 1 FROM RDB$DATABASE", &[]).await?;
//!
//! // Multi-statement work on one connection.
//! let mut session = pool.acquire().await?;
//! let mut tx = session.transaction(IsolationLevel::ReadCommitted).await?;
//! tx.execute("INSERT INTO T(x) VALUES (?)", &[5.into()]).await?;
//! tx.commit().await?;
//! drop(tx);
//! session.close().await?;
//!
//! pool.destroy().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod config;
pub mod error;
pub mod pool;
pub mod session;
pub mod stream;
pub mod transaction;

pub use cancel::{CallOptions, CancellationToken};
pub use config::{ConnectionOptions, Options, PoolConfig, Uri};
pub use error::{Error, Result, Stage};
pub use fb_driver::{ConnectionDescriptor, Driver, IsolationLevel, Row, Value};
pub use pool::{Pool, PoolStats, PoolStatus};
pub use session::Session;
pub use stream::Rows;
pub use transaction::{Transaction, TransactionState};
