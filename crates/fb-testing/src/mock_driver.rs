//! In-memory mock driver.
//!
//! Implements every [`fb_driver`] trait against a shared, in-process
//! database so pool behavior can be tested without a server.
//!
//! ## Features
//!
//! - Scripted responses for exact SQL strings
//! - A small table store (see [`crate::sql`]) with real commit/rollback
//! - Fault injection for every driver stage
//! - Artificial latency for timeout and cancellation tests
//! - Detach refused while a transaction is still open, as on a real server
//! - Counters for acquired, detached and concurrently open connections
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_testing::{MockDriver, MockResponse, Fault};
//!
//! let driver = MockDriver::builder()
//!     .with_response("SELECT name FROM users", MockResponse::scalar_text("NAME", "Alice"))
//!     .with_fault(Fault::Commit)
//!     .build();
//!
//! let pool = Pool::new(&driver, &uri).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use fb_driver::{
    ConnectionDescriptor, Driver, DriverConnection, DriverError, DriverPool, DriverTransaction,
    IsolationLevel, Row, RowStream, Value,
};
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;

use crate::sql::{Output, Statement, Tables};

/// A driver stage that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `Driver::open_pool`.
    Open,
    /// `DriverPool::acquire`.
    Acquire,
    /// Every statement, inside or outside transactions.
    Query,
    /// `DriverConnection::detach`.
    Detach,
    /// `DriverConnection::begin_transaction`.
    Begin,
    /// `DriverTransaction::commit`.
    Commit,
    /// `DriverTransaction::rollback`.
    Rollback,
    /// `DriverPool::teardown`.
    Teardown,
}

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row data.
        rows: Vec<Vec<Value>>,
    },

    /// Fail the statement.
    Error(String),

    /// Compute the response from the statement's parameters.
    Custom(Arc<dyn Fn(&[Value]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", rows)
                .finish(),
            Self::Error(message) => f.debug_tuple("Error").field(message).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// A single integer in a single column.
    pub fn scalar_int(column: impl Into<String>, value: i64) -> Self {
        Self::rows(vec![column.into()], vec![vec![Value::Int(value)]])
    }

    /// A single string in a single column.
    pub fn scalar_text(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::rows(vec![column.into()], vec![vec![Value::Text(value.into())]])
    }

    /// An empty result set.
    pub fn empty() -> Self {
        Self::rows(Vec::new(), Vec::new())
    }

    /// A failing statement.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Rows with the given columns.
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self::Rows { columns, rows }
    }

    fn resolve(&self, params: &[Value]) -> Result<Output, DriverError> {
        match self {
            Self::Rows { columns, rows } => Ok(Output {
                columns: columns.clone(),
                rows: rows.clone(),
            }),
            Self::Error(message) => Err(DriverError::Query(message.clone())),
            Self::Custom(f) => f(params).resolve(params),
        }
    }
}

/// Snapshot of the mock driver's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Pools opened.
    pub pools_opened: u64,
    /// Connections handed out.
    pub acquired: u64,
    /// Successful detaches.
    pub detached: u64,
    /// Connections dropped without a successful detach.
    pub dropped_attached: u64,
    /// Connections currently handed out and not yet detached or dropped.
    pub open_connections: u64,
    /// Highest value `open_connections` has reached.
    pub peak_open_connections: u64,
    /// Statements executed.
    pub statements: u64,
    /// Transactions started.
    pub transactions_begun: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back.
    pub rollbacks: u64,
    /// Pool teardowns.
    pub teardowns: u64,
    /// Isolation level of the most recently started transaction.
    pub last_isolation_level: Option<IsolationLevel>,
}

#[derive(Default)]
struct MockConfig {
    responses: HashMap<String, MockResponse>,
    faults: HashSet<Fault>,
    isolation_levels: Vec<IsolationLevel>,
    acquire_delay: Option<Duration>,
    query_delay: Option<Duration>,
    row_delay: Option<Duration>,
}

struct MockState {
    config: Mutex<MockConfig>,
    tables: Mutex<Tables>,
    stats: Mutex<MockStats>,
    torn_down: AtomicBool,
    next_connection_id: AtomicU64,
}

impl MockState {
    fn faulty(&self, fault: Fault) -> bool {
        self.config.lock().faults.contains(&fault)
    }

    fn check_alive(&self) -> Result<(), DriverError> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn connection_closed(&self, detached: bool) {
        let mut stats = self.stats.lock();
        stats.open_connections = stats.open_connections.saturating_sub(1);
        if detached {
            stats.detached += 1;
        } else {
            stats.dropped_attached += 1;
        }
    }

    async fn delay_query(&self) {
        let delay = self.config.lock().query_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Resolve a statement against scripted responses, then `tables`.
    fn run(
        &self,
        tables: &mut Tables,
        sql: &str,
        params: &[Value],
        read_only: bool,
    ) -> Result<Output, DriverError> {
        self.check_alive()?;
        if self.faulty(Fault::Query) {
            return Err(DriverError::Query(format!("injected failure for '{sql}'")));
        }
        self.stats.lock().statements += 1;

        let scripted = self.config.lock().responses.get(sql).cloned();
        if let Some(response) = scripted {
            return response.resolve(params);
        }

        let statement = Statement::parse(sql);
        if read_only && statement.is_write() {
            return Err(DriverError::Query(
                "attempted update during read-only transaction".into(),
            ));
        }
        tables.apply(&statement, params)
    }
}

/// Convert interpreter output into rows using the descriptor's key policy.
fn into_rows(output: Output, descriptor: &ConnectionDescriptor) -> Vec<Row> {
    let columns: Arc<[String]> = output
        .columns
        .iter()
        .map(|c| descriptor.column_key(c))
        .collect();
    output
        .rows
        .into_iter()
        .map(|values| Row::new(Arc::clone(&columns), values))
        .collect()
}

/// Builder for [`MockDriver`].
pub struct MockDriverBuilder {
    config: MockConfig,
}

impl MockDriverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: MockConfig {
                isolation_levels: IsolationLevel::ALL.to_vec(),
                ..MockConfig::default()
            },
        }
    }

    /// Add a response for an exact SQL string.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into(), response);
        self
    }

    /// Make a driver stage fail.
    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.config.faults.insert(fault);
        self
    }

    /// Restrict the advertised isolation levels.
    pub fn with_isolation_levels(mut self, levels: &[IsolationLevel]) -> Self {
        self.config.isolation_levels = levels.to_vec();
        self
    }

    /// Delay every connection handed out by the pool.
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.config.acquire_delay = Some(delay);
        self
    }

    /// Delay every statement.
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.config.query_delay = Some(delay);
        self
    }

    /// Delay every streamed row.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.config.row_delay = Some(delay);
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        let isolation_levels = Arc::from(self.config.isolation_levels.as_slice());
        MockDriver {
            isolation_levels,
            state: Arc::new(MockState {
                config: Mutex::new(self.config),
                tables: Mutex::new(Tables::default()),
                stats: Mutex::new(MockStats::default()),
                torn_down: AtomicBool::new(false),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }
}

impl Default for MockDriverBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A driver backed by an in-memory database.
///
/// Clones share the same database, faults and counters.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
    isolation_levels: Arc<[IsolationLevel]>,
}

impl MockDriver {
    /// Create a driver with no scripted responses or faults.
    pub fn new() -> Self {
        MockDriverBuilder::new().build()
    }

    /// Create a new builder.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Turn a fault on or off at runtime.
    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        let mut config = self.state.config.lock();
        if enabled {
            config.faults.insert(fault);
        } else {
            config.faults.remove(&fault);
        }
    }

    /// Get a snapshot of the counters.
    pub fn stats(&self) -> MockStats {
        self.state.stats.lock().clone()
    }

    /// Committed rows of `table`.
    pub fn committed_rows(&self, table: &str) -> Vec<Vec<Value>> {
        self.state.tables.lock().rows(table)
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    async fn open_pool(
        &self,
        size: u32,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn DriverPool>, DriverError> {
        if self.state.faulty(Fault::Open) {
            return Err(DriverError::Connection(format!(
                "unable to complete network request to host \"{}\"",
                descriptor.host
            )));
        }
        self.state.torn_down.store(false, Ordering::Release);
        self.state.stats.lock().pools_opened += 1;
        tracing::debug!(size, target_db = %descriptor, "mock pool opened");

        Ok(Box::new(MockPool {
            state: Arc::clone(&self.state),
            descriptor: Arc::new(descriptor.clone()),
        }))
    }

    fn isolation_levels(&self) -> &[IsolationLevel] {
        &self.isolation_levels
    }
}

struct MockPool {
    state: Arc<MockState>,
    descriptor: Arc<ConnectionDescriptor>,
}

#[async_trait::async_trait]
impl DriverPool for MockPool {
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        self.state.check_alive()?;
        if self.state.faulty(Fault::Acquire) {
            return Err(DriverError::Connection("connection rejected by remote interface".into()));
        }
        let delay = self.state.config.lock().acquire_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = self.state.next_connection_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = self.state.stats.lock();
            stats.acquired += 1;
            stats.open_connections += 1;
            stats.peak_open_connections = stats.peak_open_connections.max(stats.open_connections);
        }
        tracing::trace!(connection = id, "mock connection acquired");

        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            descriptor: Arc::clone(&self.descriptor),
            id,
            detached: false,
            open_transactions: Arc::new(AtomicU64::new(0)),
        }))
    }

    async fn teardown(&self) -> Result<(), DriverError> {
        self.state.torn_down.store(true, Ordering::Release);
        self.state.stats.lock().teardowns += 1;
        if self.state.faulty(Fault::Teardown) {
            return Err(DriverError::Connection("error while closing connections".into()));
        }
        Ok(())
    }
}

struct MockConnection {
    state: Arc<MockState>,
    descriptor: Arc<ConnectionDescriptor>,
    id: u64,
    detached: bool,
    open_transactions: Arc<AtomicU64>,
}

impl MockConnection {
    fn check_attached(&self) -> Result<(), DriverError> {
        if self.detached {
            return Err(DriverError::AlreadyDetached);
        }
        self.state.check_alive()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.check_attached()?;
        self.state.delay_query().await;
        let output = {
            let mut tables = self.state.tables.lock();
            self.state.run(&mut tables, sql, params, false)?
        };
        Ok(into_rows(output, &self.descriptor))
    }
}

#[async_trait::async_trait]
impl DriverConnection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.execute(sql, params).await
    }

    fn stream_rows<'a>(&'a mut self, sql: &'a str, params: &'a [Value]) -> RowStream<'a> {
        let row_delay = self.state.config.lock().row_delay;
        let this = &*self;

        let rows = async move {
            match this.execute(sql, params).await {
                Ok(rows) => stream::iter(rows.into_iter().map(Ok)).left_stream(),
                Err(e) => stream::once(async move { Err(e) }).right_stream(),
            }
        };

        let stream = stream::once(rows).flatten();
        match row_delay {
            Some(delay) => Box::pin(stream.then(move |row| async move {
                tokio::time::sleep(delay).await;
                row
            })) as RowStream<'a>,
            None => Box::pin(stream),
        }
    }

    async fn detach(&mut self) -> Result<(), DriverError> {
        self.check_attached()?;
        if self.state.faulty(Fault::Detach) {
            return Err(DriverError::Connection("error detaching connection".into()));
        }
        let open = self.open_transactions.load(Ordering::Acquire);
        if open > 0 {
            return Err(DriverError::Connection(format!(
                "cannot disconnect database with open transactions ({open} active)"
            )));
        }
        self.detached = true;
        self.state.connection_closed(true);
        tracing::trace!(connection = self.id, "mock connection detached");
        Ok(())
    }

    async fn begin_transaction(
        &mut self,
        isolation_level: IsolationLevel,
    ) -> Result<Box<dyn DriverTransaction>, DriverError> {
        self.check_attached()?;
        if self.state.faulty(Fault::Begin) {
            return Err(DriverError::Transaction("lock conflict on no wait transaction".into()));
        }

        {
            let mut stats = self.state.stats.lock();
            stats.transactions_begun += 1;
            stats.last_isolation_level = Some(isolation_level);
        }
        self.open_transactions.fetch_add(1, Ordering::AcqRel);

        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            descriptor: Arc::clone(&self.descriptor),
            snapshot: self.state.tables.lock().clone(),
            writes: Vec::new(),
            isolation_level,
            finished: false,
            open_on_connection: Arc::clone(&self.open_transactions),
        }))
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.detached {
            self.state.connection_closed(false);
        }
    }
}

/// Sees the tables as of its start plus its own writes; commit replays the
/// writes onto the shared tables.
struct MockTransaction {
    state: Arc<MockState>,
    descriptor: Arc<ConnectionDescriptor>,
    snapshot: Tables,
    writes: Vec<(String, Vec<Value>)>,
    isolation_level: IsolationLevel,
    finished: bool,
    open_on_connection: Arc<AtomicU64>,
}

impl MockTransaction {
    fn check_active(&self) -> Result<(), DriverError> {
        if self.finished {
            return Err(DriverError::Transaction("invalid transaction handle".into()));
        }
        self.state.check_alive()
    }

    fn finish(&mut self) {
        self.finished = true;
        self.open_on_connection.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait::async_trait]
impl DriverTransaction for MockTransaction {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.check_active()?;
        self.state.delay_query().await;
        let output = self.state.run(
            &mut self.snapshot,
            sql,
            params,
            self.isolation_level.is_read_only(),
        )?;
        if Statement::parse(sql).is_write() {
            self.writes.push((sql.to_owned(), params.to_vec()));
        }
        Ok(into_rows(output, &self.descriptor))
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.check_active()?;
        if self.state.faulty(Fault::Commit) {
            return Err(DriverError::Transaction("deadlock; update conflicts".into()));
        }
        {
            let mut tables = self.state.tables.lock();
            for (sql, params) in self.writes.drain(..) {
                tables.apply(&Statement::parse(&sql), &params)?;
            }
        }
        self.finish();
        self.state.stats.lock().commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.check_active()?;
        if self.state.faulty(Fault::Rollback) {
            return Err(DriverError::Transaction("connection lost during rollback".into()));
        }
        self.writes.clear();
        self.finish();
        self.state.stats.lock().rollbacks += 1;
        Ok(())
    }
}
