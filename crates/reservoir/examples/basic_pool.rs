//! Basic pooling example
//!
//! Runs a handful of tasks against a small pool backed by an in-memory
//! driver, then prints the pool statistics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reservoir::{
    BoxError, Connection, ConnectionFactory, Cursor, Pool, PoolConfig, PoolEvent, Statement,
};
use tracing_subscriber::EnvFilter;

/// Simulates a database server reachable over the network.
struct MemoryDatabase {
    next_session: AtomicU64,
}

struct MemorySession {
    session: u64,
}

struct MemoryStatement {
    sql: String,
}

struct MemoryRows {
    rows: VecDeque<String>,
}

#[async_trait]
impl ConnectionFactory for MemoryDatabase {
    type Connection = MemorySession;

    async fn create(&self) -> Result<MemorySession, BoxError> {
        // connection setup is the expensive part the pool amortizes
        tokio::time::sleep(Duration::from_millis(20)).await;
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        Ok(MemorySession { session })
    }

    async fn validate(&self, conn: &mut MemorySession, _timeout: Duration) -> bool {
        conn.execute("SELECT 1").await.is_ok()
    }
}

#[async_trait]
impl Connection for MemorySession {
    type Statement = MemoryStatement;

    async fn execute(&mut self, sql: &str) -> Result<u64, BoxError> {
        tracing::trace!(session = self.session, sql, "execute");
        Ok(1)
    }

    async fn prepare(&mut self, sql: &str) -> Result<MemoryStatement, BoxError> {
        Ok(MemoryStatement {
            sql: sql.to_string(),
        })
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
impl Statement for MemoryStatement {
    type Cursor = MemoryRows;

    async fn execute(&mut self) -> Result<u64, BoxError> {
        Ok(1)
    }

    async fn query(&mut self) -> Result<MemoryRows, BoxError> {
        let rows = (1..=3).map(|n| format!("{} -> row {n}", self.sql)).collect();
        Ok(MemoryRows { rows })
    }
}

#[async_trait]
impl Cursor for MemoryRows {
    type Row = String;

    async fn next(&mut self) -> Result<Option<String>, BoxError> {
        Ok(self.rows.pop_front())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = PoolConfig {
        name: "orders".to_string(),
        min_idle: 1,
        max_size: 3,
        acquire_timeout: Duration::from_secs(2),
        ..PoolConfig::default()
    };
    let pool = Pool::connect(
        MemoryDatabase {
            next_session: AtomicU64::new(1),
        },
        config,
    )
    .await?;

    let mut events = pool.events();
    let watcher = tokio::spawn(async move {
        let mut handoffs = 0;
        while let Ok(event) = events.recv().await {
            match event {
                PoolEvent::HandedOff { .. } => handoffs += 1,
                PoolEvent::ShutDown => break,
                _ => {}
            }
        }
        handoffs
    });

    let mut workers = Vec::new();
    for worker in 0..8 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            let mut conn = pool.acquire().await?;
            conn.set_auto_commit(false).await?;
            conn.execute("UPDATE orders SET state = 'shipped'").await?;

            let mut statement = conn.prepare("SELECT id FROM orders").await?;
            let mut rows = statement.query().await?;
            while let Some(row) = rows.next().await? {
                tracing::debug!(worker, row, "fetched");
            }
            conn.commit().await?;
            conn.close().await;
            Ok::<_, reservoir::Error>(())
        }));
    }
    for worker in workers {
        worker.await??;
    }

    println!("stats: {:#?}", pool.stats());
    pool.shutdown().await;
    println!("handoffs observed: {}", watcher.await?);
    Ok(())
}
