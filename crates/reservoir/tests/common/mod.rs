//! Scripted in-memory driver shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reservoir::{BoxError, Connection, ConnectionFactory, Cursor, PoolConfig, Statement};

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

/// Knobs and counters shared by a factory and every connection it opens.
#[derive(Debug)]
pub struct Script {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub validations: AtomicUsize,
    /// Number of upcoming `create` calls that fail.
    pub failing_creates: AtomicUsize,
    pub valid: AtomicBool,
    pub create_delay: Mutex<Duration>,
    pub validate_delay: Mutex<Duration>,
    /// Every call that reached a physical object, in order.
    pub log: Mutex<Vec<String>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            validations: AtomicUsize::new(0),
            failing_creates: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
            create_delay: Mutex::new(Duration::ZERO),
            validate_delay: Mutex::new(Duration::ZERO),
            log: Mutex::new(Vec::new()),
        }
    }
}

impl Script {
    fn record(&self, call: impl Into<String>) {
        self.log.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }

    pub fn set_validate_delay(&self, delay: Duration) {
        *self.validate_delay.lock() = delay;
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct MockFactory {
    pub script: Arc<Script>,
}

pub fn factory() -> (MockFactory, Arc<Script>) {
    let script = Arc::new(Script::default());
    (
        MockFactory {
            script: Arc::clone(&script),
        },
        script,
    )
}

/// Pool settings for tests: no background maintenance.
pub fn config(max_size: usize) -> PoolConfig {
    PoolConfig {
        name: "test-pool".to_string(),
        max_size,
        acquire_timeout: Duration::from_secs(2),
        maintenance_interval: None,
        ..PoolConfig::default()
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    async fn create(&self) -> Result<MockConnection, BoxError> {
        let delay = *self.script.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .script
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err("connection refused".into());
        }
        let id = self.script.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            id,
            script: Arc::clone(&self.script),
        })
    }

    async fn validate(&self, conn: &mut MockConnection, _timeout: Duration) -> bool {
        self.script.validations.fetch_add(1, Ordering::SeqCst);
        self.script.record(format!("validate:{}", conn.id));
        let delay = *self.script.validate_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.valid.load(Ordering::SeqCst)
    }

    async fn destroy(&self, conn: MockConnection) -> Result<(), BoxError> {
        self.script.destroyed.fetch_add(1, Ordering::SeqCst);
        self.script.record(format!("destroy:{}", conn.id));
        Ok(())
    }

    fn is_fatal(&self, error: &BoxError) -> bool {
        error.to_string().contains("connection reset")
    }
}

// ---------------------------------------------------------------------------
// Physical objects
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
    script: Arc<Script>,
}

#[async_trait]
impl Connection for MockConnection {
    type Statement = MockStatement;

    async fn execute(&mut self, sql: &str) -> Result<u64, BoxError> {
        self.script.record(format!("execute:{sql}"));
        if sql.contains("FATAL") {
            return Err("connection reset by peer".into());
        }
        if sql.contains("SELEC ") {
            return Err("syntax error".into());
        }
        Ok(1)
    }

    async fn prepare(&mut self, sql: &str) -> Result<MockStatement, BoxError> {
        self.script.record(format!("prepare:{sql}"));
        Ok(MockStatement {
            sql: sql.to_string(),
            script: Arc::clone(&self.script),
        })
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        self.script.record("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        self.script.record("rollback");
        Ok(())
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<(), BoxError> {
        self.script.record(format!("set_auto_commit:{enabled}"));
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockStatement {
    sql: String,
    script: Arc<Script>,
}

#[async_trait]
impl Statement for MockStatement {
    type Cursor = MockCursor;

    async fn execute(&mut self) -> Result<u64, BoxError> {
        self.script.record(format!("statement.execute:{}", self.sql));
        Ok(3)
    }

    async fn query(&mut self) -> Result<MockCursor, BoxError> {
        self.script.record(format!("statement.query:{}", self.sql));
        Ok(MockCursor {
            rows: VecDeque::from(vec![1, 2, 3]),
            script: Arc::clone(&self.script),
        })
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        self.script.record("statement.close");
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockCursor {
    rows: VecDeque<i64>,
    script: Arc<Script>,
}

#[async_trait]
impl Cursor for MockCursor {
    type Row = i64;

    async fn next(&mut self) -> Result<Option<i64>, BoxError> {
        self.script.record("cursor.next");
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), BoxError> {
        self.script.record("cursor.close");
        Ok(())
    }
}
