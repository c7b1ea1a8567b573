//! Pool and session integration tests.
//!
//! These run against the in-memory mock driver from `fb-testing`, so they
//! need no database server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use fb_pool::{CallOptions, CancellationToken, Error, Pool, PoolConfig, Stage, Uri, Value};
use fb_testing::{Fault, MockDriver, MockResponse};
use futures_util::StreamExt;
use tokio_test::{assert_pending, assert_ready};

const SELECT_ONE: &str = "SELECT 1 FROM RDB$DATABASE";

fn uri(size: i64) -> Uri {
    Uri::new("localhost", 3050, "employee", "SYSDBA", "masterkey").pool(size)
}

/// Let background detach tasks run.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Pool construction
// =============================================================================

#[tokio::test]
async fn test_pool_create_and_destroy() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(5)).await.unwrap();

    assert!(!pool.is_closed());
    let status = pool.status();
    assert_eq!(status.size, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 5);

    pool.destroy().await.unwrap();
    assert!(pool.is_closed());
    assert_eq!(driver.stats().teardowns, 1);
}

#[tokio::test]
async fn test_pool_size_defaults_to_one() {
    let driver = MockDriver::new();
    let uri = Uri::new("localhost", 3050, "employee", "SYSDBA", "masterkey");
    let pool = Pool::new(&driver, &uri).await.unwrap();
    assert_eq!(pool.status().size, 1);

    let uri = Uri::new("localhost", 3050, "employee", "SYSDBA", "masterkey").pool(-3);
    let pool = Pool::new(&driver, &uri).await.unwrap();
    assert_eq!(pool.status().size, 1);
}

#[tokio::test]
async fn test_pool_from_json_uri() {
    let driver = MockDriver::new();
    let uri = Uri::from_json_str(
        r#"{
            "pool": 3,
            "host": "db.internal",
            "port": 3051,
            "database": "/data/app.fdb",
            "user": "APP",
            "password": "secret",
            "options": { "lowercase_keys": "yes", "role": "", "pageSize": 8192 }
        }"#,
    )
    .unwrap();
    let pool = Pool::new(&driver, &uri).await.unwrap();

    let descriptor = pool.descriptor();
    assert_eq!(descriptor.host, "db.internal");
    assert_eq!(descriptor.port, 3051);
    assert!(descriptor.lowercase_keys);
    assert_eq!(descriptor.role, None);
    assert_eq!(descriptor.page_size, 8192);
    assert_eq!(pool.status().size, 3);
}

#[tokio::test]
async fn test_open_failure_is_connect_error() {
    let driver = MockDriver::builder().with_fault(Fault::Open).build();
    let err = Pool::new(&driver, &uri(2)).await.unwrap_err();

    assert!(matches!(err, Error::Connect(_)));
    assert_eq!(err.stage(), Stage::Connect);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let driver = MockDriver::new();
    let config = PoolConfig::from_uri(&uri(1)).size(0);
    let err = Pool::from_config(&driver, config).await.unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(driver.stats().pools_opened, 0);
}

// =============================================================================
// Acquisition
// =============================================================================

#[tokio::test]
async fn test_run_once_select_one() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(2)).await.unwrap();

    let rows = pool.run_once(SELECT_ONE, &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_by_name("constant"), Some(&Value::Int(1)));

    assert_eq!(pool.status().in_use, 0);
    assert_eq!(driver.stats().detached, 1);
    assert_eq!(pool.stats().acquisitions, 1);
    assert_eq!(pool.stats().releases, 1);
}

#[tokio::test]
async fn test_uppercase_keys_when_disabled() {
    let driver = MockDriver::new();
    let uri = uri(1).options(fb_pool::Options::new().lowercase_keys(false));
    let pool = Pool::new(&driver, &uri).await.unwrap();

    let rows = pool.run_once(SELECT_ONE, &[]).await.unwrap();
    assert_eq!(rows[0].columns(), &["CONSTANT".to_owned()]);
}

#[tokio::test]
async fn test_acquire_waits_for_release() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let first = pool.acquire().await.unwrap();
    assert_eq!(pool.status().available, 0);

    let mut waiter = tokio_test::task::spawn(pool.acquire());
    assert_pending!(waiter.poll());
    assert_pending!(waiter.poll());

    first.close().await.unwrap();
    assert!(waiter.is_woken());
    let second = assert_ready!(waiter.poll()).unwrap();

    assert_eq!(pool.status().in_use, 1);
    second.close().await.unwrap();
    assert_eq!(driver.stats().peak_open_connections, 1);
}

#[tokio::test]
async fn test_waiters_served_in_order() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let held = pool.acquire().await.unwrap();

    let mut first = tokio_test::task::spawn(pool.acquire());
    let mut second = tokio_test::task::spawn(pool.acquire());
    assert_pending!(first.poll());
    assert_pending!(second.poll());

    held.close().await.unwrap();
    assert_pending!(second.poll());
    let session = assert_ready!(first.poll()).unwrap();

    session.close().await.unwrap();
    assert_ready!(second.poll()).unwrap().close().await.unwrap();
}

#[tokio::test]
async fn test_concurrency_never_exceeds_size() {
    let driver = MockDriver::builder()
        .with_query_delay(Duration::from_millis(2))
        .build();
    let pool = Pool::new(&driver, &uri(3)).await.unwrap();
    let completed = Arc::new(AtomicU32::new(0));

    let mut handles = Vec::new();
    for _ in 0..12 {
        let pool = pool.clone();
        let completed = Arc::clone(&completed);
        handles.push(tokio::spawn(async move {
            pool.run_once(SELECT_ONE, &[]).await.unwrap();
            completed.fetch_add(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), 12);
    assert!(driver.stats().peak_open_connections <= 3);
    assert!(pool.stats().peak_in_use <= 3);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_driver_acquire_failure_frees_slot() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    driver.set_fault(Fault::Acquire, true);
    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err.stage(), Stage::Connect);
    assert_eq!(pool.status().available, 1);
    assert_eq!(pool.stats().failed_acquisitions, 1);

    driver.set_fault(Fault::Acquire, false);
    pool.acquire().await.unwrap().close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout() {
    let driver = MockDriver::new();
    let config = PoolConfig::from_uri(&uri(1)).acquire_timeout(Duration::from_millis(100));
    let pool = Pool::from_config(&driver, config).await.unwrap();

    let held = pool.acquire().await.unwrap();
    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(100)));
    assert!(err.is_transient());

    held.close().await.unwrap();
    pool.acquire().await.unwrap().close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_driver_acquire_timeout_frees_slot() {
    let driver = MockDriver::builder()
        .with_acquire_delay(Duration::from_secs(1))
        .build();
    let config = PoolConfig::from_uri(&uri(1)).acquire_timeout(Duration::from_millis(100));
    let pool = Pool::from_config(&driver, config).await.unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert_eq!(pool.stats().failed_acquisitions, 1);
    assert_eq!(pool.status().available, 1);
    assert_eq!(driver.stats().acquired, 0);

    let opts = CallOptions::new().timeout(Duration::from_secs(5));
    pool.acquire_with(&opts).await.unwrap().close().await.unwrap();
    assert_eq!(pool.stats().acquisitions, 1);
}

#[tokio::test]
async fn test_acquire_cancelled() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let held = pool.acquire().await.unwrap();

    let token = CancellationToken::new();
    let opts = CallOptions::new().cancel_token(token.clone());
    let mut waiter = tokio_test::task::spawn(pool.acquire_with(&opts));
    assert_pending!(waiter.poll());

    token.cancel();
    assert!(matches!(assert_ready!(waiter.poll()), Err(Error::Cancelled)));
    drop(waiter);

    held.close().await.unwrap();
    assert_eq!(pool.status().available, 1);
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn test_session_is_reusable() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let mut session = pool.acquire().await.unwrap();
    for n in 0..3 {
        session
            .execute("INSERT INTO T(x) VALUES (?)", &[Value::Int(n)])
            .await
            .unwrap();
    }
    let rows = session.query("SELECT COUNT(*) FROM T", &[]).await.unwrap();
    assert_eq!(rows[0].get_by_name("count"), Some(&Value::Int(3)));
    session.close().await.unwrap();

    assert_eq!(driver.stats().acquired, 1);
    assert_eq!(driver.stats().detached, 1);
}

#[tokio::test]
async fn test_query_failure_still_releases() {
    let driver = MockDriver::builder()
        .with_response("SELECT broken", MockResponse::error("Dynamic SQL Error"))
        .build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let err = pool.run_once("SELECT broken", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Query(_)));
    assert_eq!(err.stage(), Stage::Query);
    assert_eq!(pool.status().available, 1);
    assert_eq!(driver.stats().detached, 1);

    // The pool keeps working.
    pool.run_once(SELECT_ONE, &[]).await.unwrap();
}

#[tokio::test]
async fn test_query_error_keeps_session() {
    let driver = MockDriver::builder()
        .with_response("SELECT broken", MockResponse::error("Dynamic SQL Error"))
        .build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let mut session = pool.acquire().await.unwrap();
    assert!(session.query("SELECT broken", &[]).await.is_err());
    assert!(session.is_attached());
    session.query(SELECT_ONE, &[]).await.unwrap();
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_detach_error_surfaced() {
    let driver = MockDriver::builder().with_fault(Fault::Detach).build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let err = pool.run_once(SELECT_ONE, &[]).await.unwrap_err();
    assert!(matches!(err, Error::Detach(_)));
    assert_eq!(err.stage(), Stage::Detach);
    assert_eq!(pool.status().available, 1);
}

#[tokio::test]
async fn test_query_error_wins_over_detach_error() {
    let driver = MockDriver::builder()
        .with_fault(Fault::Query)
        .with_fault(Fault::Detach)
        .build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let err = pool.run_once(SELECT_ONE, &[]).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Query);
}

#[tokio::test]
async fn test_dropped_session_is_released() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let session = pool.acquire().await.unwrap();
    drop(session);
    settle().await;

    assert_eq!(pool.status().available, 1);
    assert_eq!(driver.stats().detached, 1);
    pool.acquire().await.unwrap().close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_query_timeout_abandons_session() {
    let driver = MockDriver::builder()
        .with_query_delay(Duration::from_secs(5))
        .build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let mut session = pool.acquire().await.unwrap();
    let opts = CallOptions::new().timeout(Duration::from_millis(10));
    let err = session.query_with(SELECT_ONE, &[], &opts).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    assert!(!session.is_attached());
    assert!(matches!(
        session.query(SELECT_ONE, &[]).await,
        Err(Error::SessionDetached)
    ));
    assert_eq!(pool.status().available, 1);
    session.close().await.unwrap();
}

// =============================================================================
// Streaming
// =============================================================================

fn numbers_driver(count: i64, row_delay: Option<Duration>) -> MockDriver {
    let rows = (0..count).map(|n| vec![Value::Int(n)]).collect();
    let mut builder = MockDriver::builder().with_response(
        "SELECT N FROM NUMBERS",
        MockResponse::rows(vec!["N".into()], rows),
    );
    if let Some(delay) = row_delay {
        builder = builder.with_row_delay(delay);
    }
    builder.build()
}

#[tokio::test(start_paused = true)]
async fn test_sequentially_visits_every_row() {
    let driver = numbers_driver(5, Some(Duration::from_millis(20)));
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let mut session = pool.acquire().await.unwrap();

    let mut seen = Vec::new();
    let count = session
        .sequentially("SELECT N FROM NUMBERS", &[], |row, index| {
            seen.push((index, row.get(0).and_then(Value::as_i64)));
        })
        .await
        .unwrap();

    assert_eq!(count, 5);
    assert_eq!(
        seen,
        (0..5).map(|n| (n as usize, Some(n))).collect::<Vec<_>>()
    );
    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sequentially_timeout_abandons_session() {
    let driver = numbers_driver(10, Some(Duration::from_millis(20)));
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let mut session = pool.acquire().await.unwrap();

    let opts = CallOptions::new().timeout(Duration::from_millis(50));
    let mut seen = 0;
    let err = session
        .sequentially_with("SELECT N FROM NUMBERS", &[], |_, _| seen += 1, &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(seen < 10);

    assert!(!session.is_attached());
    assert_eq!(pool.status().available, 1);
    assert_eq!(driver.stats().detached, 1);
    pool.acquire().await.unwrap().close().await.unwrap();
}

#[tokio::test]
async fn test_sequentially_empty_result() {
    let driver = numbers_driver(0, None);
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let mut session = pool.acquire().await.unwrap();

    let mut calls = 0;
    let count = session
        .sequentially("SELECT N FROM NUMBERS", &[], |_, _| calls += 1)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(calls, 0);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_rows() {
    let driver = numbers_driver(4, None);
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let mut session = pool.acquire().await.unwrap();

    let mut rows = session.stream("SELECT N FROM NUMBERS", &[]).await.unwrap();
    let mut total = 0;
    while let Some(row) = rows.next().await {
        total += row.unwrap().get_by_name("n").and_then(Value::as_i64).unwrap();
    }
    assert!(rows.is_finished());
    assert_eq!(rows.rows_seen(), 4);
    assert_eq!(total, 6);
    drop(rows);

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_error() {
    let driver = MockDriver::builder().with_fault(Fault::Query).build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let mut session = pool.acquire().await.unwrap();

    let err = session
        .sequentially(SELECT_ONE, &[], |_, _| {})
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Query);
    assert!(session.is_attached());
}

// =============================================================================
// Destroy
// =============================================================================

#[tokio::test]
async fn test_acquire_after_destroy_fails() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(2)).await.unwrap();
    pool.destroy().await.unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed));
    assert_eq!(err.stage(), Stage::Connect);
    assert!(pool.run_once(SELECT_ONE, &[]).await.is_err());
}

#[tokio::test]
async fn test_destroy_wakes_waiters() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();
    let mut held = pool.acquire().await.unwrap();

    let mut waiter = tokio_test::task::spawn(pool.acquire());
    assert_pending!(waiter.poll());

    pool.destroy().await.unwrap();
    assert!(waiter.is_woken());
    assert!(matches!(assert_ready!(waiter.poll()), Err(Error::PoolClosed)));

    assert!(matches!(
        held.query(SELECT_ONE, &[]).await,
        Err(Error::PoolClosed)
    ));
    held.close().await.unwrap();
}

#[tokio::test]
async fn test_destroy_is_idempotent() {
    let driver = MockDriver::new();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    pool.destroy().await.unwrap();
    pool.destroy().await.unwrap();
    assert_eq!(driver.stats().teardowns, 1);
}

#[tokio::test]
async fn test_teardown_failure() {
    let driver = MockDriver::builder().with_fault(Fault::Teardown).build();
    let pool = Pool::new(&driver, &uri(1)).await.unwrap();

    let err = pool.destroy().await.unwrap_err();
    assert!(matches!(err, Error::Teardown(_)));
    assert_eq!(err.stage(), Stage::Teardown);
    assert!(pool.is_closed());
}
