//! Concurrent stress test for the connection pool.
//!
//! Many tasks doing acquire/use/close cycles must never observe more than
//! `max_size` connections out at once, and must leave the counters
//! consistent when they finish.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{config, eventually, factory};
use reservoir::{Pool, PoolConfig};
use tokio::task::JoinSet;

const TASKS: usize = 32;
const ROUNDS: usize = 50;
const MAX_SIZE: usize = 4;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_borrowers_never_exceed_max_size() {
    let (factory, script) = factory();
    let pool = Pool::new(
        factory,
        PoolConfig {
            acquire_timeout: Duration::from_secs(10),
            ..config(MAX_SIZE)
        },
    )
    .unwrap();
    let out = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for task in 0..TASKS {
        let pool = pool.clone();
        let out = Arc::clone(&out);
        let peak = Arc::clone(&peak);
        set.spawn(async move {
            for round in 0..ROUNDS {
                let mut conn = pool.acquire().await.expect("acquire within budget");
                let now = out.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);

                conn.execute("SELECT 1").await.unwrap();
                if (task + round) % 7 == 0 {
                    tokio::task::yield_now().await;
                }

                out.fetch_sub(1, Ordering::SeqCst);
                if round % 2 == 0 {
                    conn.close().await;
                } else {
                    drop(conn);
                }
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task panicked");
    }

    assert!(peak.load(Ordering::SeqCst) <= MAX_SIZE);
    assert!(eventually(|| pool.stats().borrowed == 0).await);

    let stats = pool.stats();
    assert_eq!(stats.total_acquisitions, (TASKS * ROUNDS) as u64);
    assert_eq!(stats.total_releases, (TASKS * ROUNDS) as u64);
    assert!(stats.live <= MAX_SIZE);
    assert_eq!(stats.idle, stats.live);
    assert_eq!(stats.waiters, 0);
    assert!(script.created() <= MAX_SIZE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shutdown_fails_every_waiter_cleanly() {
    let (factory, _script) = factory();
    let pool = Pool::new(factory, config(2)).unwrap();
    let _a = pool.acquire().await.unwrap();
    let _b = pool.acquire().await.unwrap();

    let mut set = JoinSet::new();
    for _ in 0..16 {
        let pool = pool.clone();
        set.spawn(async move { pool.acquire_timeout(Duration::from_secs(10)).await });
    }
    assert!(eventually(|| pool.stats().waiters == 16).await);

    pool.shutdown().await;

    while let Some(result) = set.join_next().await {
        let err = result.unwrap().unwrap_err();
        assert!(matches!(err, reservoir::Error::PoolClosed { .. }), "got: {err:?}");
    }
}
