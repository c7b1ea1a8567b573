//! Connection pool implementation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use fb_driver::{ConnectionDescriptor, Driver, DriverPool, IsolationLevel, Row, Value};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::cancel::CallOptions;
use crate::config::{PoolConfig, Uri};
use crate::error::{Error, Result};
use crate::session::Session;

/// A bounded pool of database connections.
///
/// At most [`PoolConfig::size`] [`Session`]s exist at any time; further
/// [`acquire`](Pool::acquire) calls wait, in FIFO order, until one is
/// released. The pool is cheap to clone and every clone shares the same
/// connections.
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

/// State shared by the pool and every session it handed out.
pub(crate) struct PoolShared {
    config: PoolConfig,
    driver_pool: Box<dyn DriverPool>,
    isolation_levels: Vec<IsolationLevel>,
    slots: Arc<Semaphore>,
    closed: AtomicBool,
    next_session_id: AtomicU64,
    stats: Mutex<PoolStats>,
}

impl Pool {
    /// Resolve `uri` and open a pool through `driver`.
    ///
    /// The pool size is `uri.pool`, or 1 when unset.
    pub async fn new(driver: &dyn Driver, uri: &Uri) -> Result<Self> {
        Self::from_config(driver, PoolConfig::from_uri(uri)).await
    }

    /// Open a pool from an explicit configuration.
    ///
    /// Fails with [`Error::Connect`] if the driver rejects the descriptor.
    pub async fn from_config(driver: &dyn Driver, config: PoolConfig) -> Result<Self> {
        config.validate()?;

        tracing::debug!(
            target_db = %config.descriptor,
            size = config.size,
            "opening connection pool"
        );

        let driver_pool = driver
            .open_pool(config.size, &config.descriptor)
            .await
            .map_err(Error::Connect)?;

        tracing::info!(
            target_db = %config.descriptor,
            size = config.size,
            "connection pool opened"
        );

        let slots = usize::try_from(config.size).unwrap_or(Semaphore::MAX_PERMITS);

        Ok(Self {
            shared: Arc::new(PoolShared {
                driver_pool,
                isolation_levels: driver.isolation_levels().to_vec(),
                slots: Arc::new(Semaphore::new(slots.min(Semaphore::MAX_PERMITS))),
                closed: AtomicBool::new(false),
                next_session_id: AtomicU64::new(1),
                stats: Mutex::new(PoolStats::default()),
                config,
            }),
        })
    }

    /// Get a session, waiting for a free connection if necessary.
    ///
    /// Waits up to [`PoolConfig::acquire_timeout`] when one is configured.
    pub async fn acquire(&self) -> Result<Session> {
        self.acquire_with(&CallOptions::default()).await
    }

    /// Get a session under explicit timeout and cancellation settings.
    ///
    /// A timeout in `opts` overrides [`PoolConfig::acquire_timeout`].
    pub async fn acquire_with(&self, opts: &CallOptions) -> Result<Session> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let opts = opts.or_timeout(self.shared.config.acquire_timeout);
        tracing::trace!("waiting for a free connection slot");

        let permit = match opts.guard(Arc::clone(&self.shared.slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The semaphore is only closed by destroy().
            Ok(Err(_)) => return Err(Error::PoolClosed),
            Err(interrupted) => {
                self.shared.stats.lock().failed_acquisitions += 1;
                return Err(interrupted.into());
            }
        };

        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let connection = match opts.guard(self.shared.driver_pool.acquire()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "driver failed to hand out a connection");
                self.shared.stats.lock().failed_acquisitions += 1;
                return Err(Error::Connect(e));
            }
            Err(interrupted) => {
                self.shared.stats.lock().failed_acquisitions += 1;
                return Err(interrupted.into());
            }
        };

        let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = self.shared.stats.lock();
            stats.acquisitions += 1;
            stats.peak_in_use = stats.peak_in_use.max(self.shared.in_use());
        }
        tracing::debug!(session = id, "connection acquired");

        Ok(Session::new(
            Arc::clone(&self.shared),
            connection,
            permit,
            id,
        ))
    }

    /// Acquire a session, run one statement and release the session.
    ///
    /// The connection is returned to the pool whether or not the
    /// statement succeeds.
    pub async fn run_once(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.acquire().await?.query_once(sql, params).await
    }

    /// Tear down every connection of the pool.
    ///
    /// Waiting and future [`acquire`](Pool::acquire) calls fail with
    /// [`Error::PoolClosed`], and outstanding sessions stop working.
    /// Calling this again is a no-op.
    pub async fn destroy(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("connection pool already destroyed");
            return Ok(());
        }

        self.shared.slots.close();
        let in_use = self.shared.in_use();

        let result = self.shared.driver_pool.teardown().await;
        match &result {
            Ok(()) => tracing::info!(in_use, "connection pool destroyed"),
            Err(e) => tracing::warn!(in_use, error = %e, "connection pool teardown failed"),
        }
        result.map_err(Error::Teardown)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let in_use = self.shared.in_use();
        PoolStatus {
            size: self.shared.config.size,
            in_use,
            available: self.shared.config.size.saturating_sub(in_use),
        }
    }

    /// Get cumulative pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.lock().clone()
    }

    /// Check if the pool has been destroyed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get the resolved connection descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.shared.config.descriptor
    }

    /// Isolation levels the driver accepts.
    #[must_use]
    pub fn isolation_levels(&self) -> &[IsolationLevel] {
        &self.shared.isolation_levels
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.shared.config.descriptor.to_string())
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PoolShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn supports(&self, level: IsolationLevel) -> bool {
        self.isolation_levels.contains(&level)
    }

    pub(crate) fn record_release(&self) {
        self.stats.lock().releases += 1;
    }

    fn in_use(&self) -> u32 {
        let available = u32::try_from(self.slots.available_permits()).unwrap_or(u32::MAX);
        self.config.size.saturating_sub(available)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum number of concurrent sessions.
    pub size: u32,
    /// Sessions currently checked out.
    pub in_use: u32,
    /// Slots free for acquisition.
    pub available: u32,
}

/// Cumulative pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Sessions released back to the pool.
    pub releases: u64,
    /// Acquisitions that failed, timed out or were cancelled.
    pub failed_acquisitions: u64,
    /// Highest number of sessions checked out at once.
    pub peak_in_use: u32,
}
