//! The connection proxy handed out by [`Pool::acquire`](crate::Pool::acquire).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::state::{ProxyNode, release_all};
use super::statement::PooledStatement;
use crate::driver::{Connection, ConnectionFactory};
use crate::error::{BoxError, Error, ProxyKind, Result};
use crate::pool::PoolInner;
use crate::pooled::Pooled;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Per-borrow state shared by a connection proxy and everything derived
/// from it.
pub(crate) struct Session<F: ConnectionFactory> {
    pub(crate) id: u64,
    pub(crate) node: Arc<ProxyNode>,
    pub(crate) pool: Arc<PoolInner<F>>,
    broken: AtomicBool,
    /// Uncommitted writes since the last commit or rollback.
    dirty: AtomicBool,
    auto_commit: AtomicBool,
}

impl<F: ConnectionFactory> Session<F> {
    fn new(id: u64, pool: Arc<PoolInner<F>>) -> Self {
        let auto_commit = pool.config.default_auto_commit;
        Self {
            id,
            node: ProxyNode::root(ProxyKind::Connection),
            pool,
            broken: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            auto_commit: AtomicBool::new(auto_commit),
        }
    }

    /// Wrap a driver error, marking the connection broken if the factory
    /// classifies it as fatal.
    pub(crate) fn fail(&self, error: BoxError) -> Error {
        if self.pool.factory.is_fatal(&error) && !self.broken.swap(true, Ordering::AcqRel) {
            warn!(
                pool = %self.pool.config.name,
                id = self.id,
                error = %error,
                "fatal driver error, connection will be destroyed on return"
            );
        }
        Error::driver(error)
    }

    /// Record a write that is not covered by auto-commit.
    pub(crate) fn wrote(&self) {
        if !self.auto_commit.load(Ordering::Acquire) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn needs_reset(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
            || self.auto_commit.load(Ordering::Acquire) != self.pool.config.default_auto_commit
    }

    /// Roll back pending work and restore the default auto-commit mode.
    ///
    /// Returns `false` if the connection could not be reset.
    async fn reset(&self, conn: &mut F::Connection) -> bool {
        if self.dirty.load(Ordering::Acquire) {
            if let Err(error) = conn.rollback().await {
                warn!(
                    pool = %self.pool.config.name,
                    id = self.id,
                    error = %error,
                    "rollback on return failed"
                );
                return false;
            }
            self.dirty.store(false, Ordering::Release);
        }
        let default = self.pool.config.default_auto_commit;
        if self.auto_commit.load(Ordering::Acquire) != default {
            if let Err(error) = conn.set_auto_commit(default).await {
                warn!(
                    pool = %self.pool.config.name,
                    id = self.id,
                    error = %error,
                    "restoring auto-commit failed"
                );
                return false;
            }
            self.auto_commit.store(default, Ordering::Release);
        }
        debug!(pool = %self.pool.config.name, id = self.id, "connection reset on return");
        true
    }

    /// Reset if needed and hand the connection back to the pool.
    async fn finish(&self, mut pooled: Pooled<F::Connection>, mut broken: bool) {
        if !broken && self.needs_reset() {
            broken = !self.reset(&mut pooled.conn).await;
        }
        self.pool.give_back(pooled, broken).await;
    }
}

// ---------------------------------------------------------------------------
// PooledConnection
// ---------------------------------------------------------------------------

/// A borrowed connection.
///
/// Every call checks that the proxy is still open before it reaches the
/// physical connection. [`close`](Self::close) (or dropping the proxy)
/// closes derived statements and cursors, rolls back uncommitted work and
/// returns the connection to the pool.
pub struct PooledConnection<F: ConnectionFactory> {
    pooled: Option<Pooled<F::Connection>>,
    session: Arc<Session<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    pub(crate) fn new(pool: Arc<PoolInner<F>>, pooled: Pooled<F::Connection>) -> Self {
        let session = Arc::new(Session::new(pooled.id(), pool));
        pooled.slot.set_owner(&session.node);
        Self {
            pooled: Some(pooled),
            session,
        }
    }

    fn open(&mut self) -> Result<(&Arc<Session<F>>, &mut F::Connection)> {
        self.session.node.ensure_open()?;
        match self.pooled.as_mut() {
            Some(pooled) => Ok((&self.session, &mut pooled.conn)),
            None => Err(Error::AlreadyClosed {
                kind: ProxyKind::Connection,
            }),
        }
    }

    /// Pool-assigned id of the underlying connection.
    pub fn id(&self) -> u64 {
        self.session.id
    }

    /// Whether this proxy can no longer be used.
    pub fn is_closed(&self) -> bool {
        self.pooled.is_none() || self.session.node.is_closed()
    }

    /// Current auto-commit mode as seen through this proxy.
    pub fn auto_commit(&self) -> bool {
        self.session.auto_commit.load(Ordering::Acquire)
    }

    /// Time since the connection was handed out.
    pub fn held_for(&self) -> Duration {
        self.pooled
            .as_ref()
            .map_or(Duration::ZERO, |pooled| pooled.slot.held_for())
    }

    /// Execute a statement that returns no rows.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        let (session, conn) = self.open()?;
        let rows = conn.execute(sql).await.map_err(|e| session.fail(e))?;
        session.wrote();
        Ok(rows)
    }

    /// Prepare a statement owned by this connection.
    pub async fn prepare(&mut self, sql: &str) -> Result<PooledStatement<F>> {
        let (session, conn) = self.open()?;
        let statement = conn.prepare(sql).await.map_err(|e| session.fail(e))?;
        let session = Arc::clone(session);
        PooledStatement::adopt(session, statement).await
    }

    /// Commit the current transaction.
    pub async fn commit(&mut self) -> Result<()> {
        let (session, conn) = self.open()?;
        conn.commit().await.map_err(|e| session.fail(e))?;
        session.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Roll back the current transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        let (session, conn) = self.open()?;
        conn.rollback().await.map_err(|e| session.fail(e))?;
        session.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Switch auto-commit mode. The pool restores the default on return.
    pub async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        let (session, conn) = self.open()?;
        conn.set_auto_commit(enabled)
            .await
            .map_err(|e| session.fail(e))?;
        session.auto_commit.store(enabled, Ordering::Release);
        if enabled {
            session.dirty.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Destroy the connection on return instead of recycling it.
    pub fn mark_broken(&self) {
        self.session.broken.store(true, Ordering::Release);
    }

    /// Close derived proxies, reset the connection and return it to the pool.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.pooled.is_none() {
            return;
        }
        self.session.node.mark_closed();
        release_all(self.session.node.drain_children()).await;

        let Some(pooled) = self.pooled.take() else {
            return;
        };
        let broken = self.session.is_broken() || pooled.slot.doomed().is_some();
        self.session.finish(pooled, broken).await;
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        let Some(pooled) = self.pooled.take() else {
            return;
        };
        self.session.node.mark_closed();
        let children = self.session.node.drain_children();
        let broken = self.session.is_broken() || pooled.slot.doomed().is_some();

        if children.is_empty() && (broken || !self.session.needs_reset()) {
            self.session.pool.check_in_now(pooled, broken);
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let session = Arc::clone(&self.session);
                handle.spawn(async move {
                    release_all(children).await;
                    session.finish(pooled, broken).await;
                });
            }
            Err(_) => {
                // no runtime to roll back on; the connection cannot be reused
                drop(children);
                self.session.pool.check_in_now(pooled, true);
            }
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.session.id)
            .field("closed", &self.is_closed())
            .field("auto_commit", &self.auto_commit())
            .finish()
    }
}
