// Pool throughput benchmarks.
//
// Measures raw acquire/close overhead with a zero-cost driver (no I/O,
// instant create/validate/destroy), plus the direct-handoff path.

use std::hint::black_box;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use reservoir::{BoxError, Connection, ConnectionFactory, Cursor, Pool, PoolConfig, Statement};

// -- Minimal no-op driver for benchmarking pool overhead only --

struct NoOpFactory;

struct NoOpConnection;

struct NoOpStatement;

struct NoOpCursor;

#[async_trait]
impl ConnectionFactory for NoOpFactory {
    type Connection = NoOpConnection;

    async fn create(&self) -> Result<NoOpConnection, BoxError> {
        Ok(NoOpConnection)
    }
}

#[async_trait]
impl Connection for NoOpConnection {
    type Statement = NoOpStatement;

    async fn execute(&mut self, _sql: &str) -> Result<u64, BoxError> {
        Ok(0)
    }

    async fn prepare(&mut self, _sql: &str) -> Result<NoOpStatement, BoxError> {
        Ok(NoOpStatement)
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn set_auto_commit(&mut self, _enabled: bool) -> Result<(), BoxError> {
        Ok(())
    }
}

#[async_trait]
impl Statement for NoOpStatement {
    type Cursor = NoOpCursor;

    async fn execute(&mut self) -> Result<u64, BoxError> {
        Ok(0)
    }

    async fn query(&mut self) -> Result<NoOpCursor, BoxError> {
        Ok(NoOpCursor)
    }
}

#[async_trait]
impl Cursor for NoOpCursor {
    type Row = ();

    async fn next(&mut self) -> Result<Option<()>, BoxError> {
        Ok(None)
    }
}

fn pool_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        name: "bench".to_string(),
        max_size,
        acquire_timeout: Duration::from_secs(5),
        idle_timeout: Duration::from_secs(3600),
        max_lifetime: Duration::from_secs(3600),
        validation_interval: Duration::from_secs(3600),
        maintenance_interval: None,
        ..Default::default()
    }
}

fn single_thread_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let pool = Pool::new(NoOpFactory, pool_config(64)).expect("failed to create pool");

    // Warm up: create one connection so subsequent acquires reuse it.
    rt.block_on(async {
        drop(pool.acquire().await.unwrap());
    });

    c.bench_function("single_thread_acquire_close", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut conn = pool.acquire().await.unwrap();
                black_box(conn.id());
                conn.close().await;
            });
        });
    });

    c.bench_function("single_thread_acquire_drop", |b| {
        b.iter(|| {
            rt.block_on(async {
                let conn = pool.acquire().await.unwrap();
                drop(black_box(conn));
            });
        });
    });
}

fn multi_thread_throughput(c: &mut Criterion) {
    const TASKS: usize = 16;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let pool = Pool::new(NoOpFactory, pool_config(8)).expect("failed to create pool");

    c.bench_function("multi_thread_contended_acquire_close", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::with_capacity(TASKS);
                for _ in 0..TASKS {
                    let pool = pool.clone();
                    handles.push(tokio::spawn(async move {
                        let mut conn = pool.acquire().await.unwrap();
                        black_box(conn.execute("SELECT 1").await.unwrap());
                        conn.close().await;
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    });
}

fn handoff_latency(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build runtime");
    let pool = Pool::new(NoOpFactory, pool_config(1)).expect("failed to create pool");

    c.bench_function("direct_handoff", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut held = pool.acquire().await.unwrap();
                let waiter = {
                    let pool = pool.clone();
                    tokio::spawn(async move { pool.acquire().await })
                };
                while pool.stats().waiters == 0 {
                    tokio::task::yield_now().await;
                }
                held.close().await;
                let mut received = waiter.await.unwrap().unwrap();
                received.close().await;
            });
        });
    });
}

criterion_group!(
    benches,
    single_thread_throughput,
    multi_thread_throughput,
    handoff_latency
);
criterion_main!(benches);
