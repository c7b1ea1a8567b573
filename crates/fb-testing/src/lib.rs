//! # fb-testing
//!
//! Test infrastructure for fb-pool.
//!
//! This crate provides [`MockDriver`], an implementation of the
//! [`fb_driver`] adapter traits over an in-memory database, so pool,
//! session and transaction behavior can be tested without a server.
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_testing::{Fault, MockDriver};
//!
//! #[tokio::test]
//! async fn commit_failure_poisons() {
//!     let driver = MockDriver::builder().with_fault(Fault::Commit).build();
//!     let pool = Pool::new(&driver, &uri).await.unwrap();
//!     // ...
//! }
//! ```

#![warn(missing_docs)]

pub mod mock_driver;
pub mod sql;

pub use mock_driver::{Fault, MockDriver, MockDriverBuilder, MockResponse, MockStats};
