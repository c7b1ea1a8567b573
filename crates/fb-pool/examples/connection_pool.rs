//! Connection pool walkthrough.
//!
//! Runs against the in-memory mock driver, so no database is needed.
//!
//! # Running
//!
//! ```bash
//! cargo run -p fb-pool --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use fb_pool::{CallOptions, Error, IsolationLevel, Pool, Uri, Value};
use fb_testing::MockDriver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let driver = MockDriver::new();

    println!("=== Connection Pool Example ===\n");

    let uri = Uri::from_json_str(
        r#"{
            "pool": 4,
            "host": "localhost",
            "port": 3050,
            "database": "employee",
            "user": "SYSDBA",
            "password": "masterkey",
            "options": { "role": "", "pageSize": 8192 }
        }"#,
    )?;
    println!("Resolved: {uri:?}");

    let pool = Pool::new(&driver, &uri).await?;
    println!("Pool opened: {pool:?}\n");

    // Single-shot statement.
    let rows = pool.run_once("SELECT 1 FROM RDB$DATABASE", &[]).await?;
    println!("SELECT 1 -> {:?}", rows[0].get_by_name("constant"));

    // Concurrent single-shot work, bounded by the pool size.
    let mut handles = Vec::new();
    for i in 0..10_i64 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.run_once("INSERT INTO T(x) VALUES (?)", &[Value::Int(i)])
                .await
        }));
    }
    for handle in handles {
        handle.await??;
    }
    println!("Inserted 10 rows, stats: {:?}", pool.stats());

    // Transaction on a reusable session.
    let mut session = pool.acquire().await?;
    {
        let mut tx = session.transaction(IsolationLevel::ReadCommitted).await?;
        tx.execute("DELETE FROM T", &[]).await?;
        tx.rollback().await?;
    }
    let count = session.query("SELECT COUNT(*) FROM T", &[]).await?;
    println!("After rollback: {:?} rows", count[0].get_by_name("count"));

    // Stream rows one at a time.
    let visited = session
        .sequentially("SELECT * FROM T", &[], |row, index| {
            if index < 3 {
                println!("  row {index}: {row:?}");
            }
        })
        .await?;
    println!("Visited {visited} rows");
    session.close().await?;

    // Acquire with a timeout while the pool is saturated.
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(pool.acquire().await?);
    }
    let opts = CallOptions::new().timeout(Duration::from_millis(50));
    match pool.acquire_with(&opts).await {
        Err(Error::Timeout(after)) => println!("\nPool saturated, gave up after {after:?}"),
        other => println!("\nUnexpected: {other:?}"),
    }
    for session in held {
        session.close().await?;
    }

    println!("Final status: {:?}", pool.status());
    pool.destroy().await?;
    println!("Pool destroyed");

    Ok(())
}
