//! # fb-driver
//!
//! The narrow contract between the connection pool and a wire-protocol
//! client.
//!
//! The pool never talks to a database server itself. Everything it needs
//! from a driver is expressed by four traits:
//!
//! ```text
//! Driver            -> open_pool(size, descriptor)
//! DriverPool        -> acquire(), teardown()
//! DriverConnection  -> query(), stream_rows(), detach(), begin_transaction()
//! DriverTransaction -> query(), commit(), rollback()
//! ```
//!
//! The crate also owns the value types that cross that boundary:
//! [`Value`] for positional parameters, [`Row`] for results,
//! [`ConnectionDescriptor`] for the resolved connection target and the
//! closed [`IsolationLevel`] enumeration.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod descriptor;
pub mod error;
pub mod isolation;
pub mod value;

pub use adapter::{Driver, DriverConnection, DriverPool, DriverTransaction, RowStream};
pub use descriptor::ConnectionDescriptor;
pub use error::{DriverError, Result};
pub use isolation::IsolationLevel;
pub use value::{Row, Value};
