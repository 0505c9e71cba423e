//! Statement proxy derived from a borrowed connection.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::connection::Session;
use super::cursor::PooledCursor;
use super::state::{ChildHandle, ProxyNode, release_all};
use crate::driver::{ConnectionFactory, Statement, StatementOf};
use crate::error::{Error, ProxyKind, Result};

pub(crate) struct StatementHandle<F: ConnectionFactory> {
    node: Arc<ProxyNode>,
    session: Arc<Session<F>>,
    physical: Mutex<Option<StatementOf<F>>>,
}

impl<F: ConnectionFactory> StatementHandle<F> {
    /// Lock the physical statement, failing if this proxy or its connection
    /// is closed.
    async fn open(&self) -> Result<MutexGuard<'_, Option<StatementOf<F>>>> {
        self.node.ensure_open()?;
        let guard = self.physical.lock().await;
        // the connection may have closed while this call waited for the lock
        self.node.ensure_open()?;
        Ok(guard)
    }

    fn closed(&self) -> Error {
        Error::AlreadyClosed {
            kind: self.node.kind(),
        }
    }

    async fn release_physical(&self) {
        release_all(self.node.drain_children()).await;
        let physical = self.physical.lock().await.take();
        if let Some(mut statement) = physical {
            if let Err(error) = statement.close().await {
                debug!(id = self.session.id, error = %error, "closing statement failed");
            }
        }
    }
}

impl<F: ConnectionFactory> ChildHandle for StatementHandle<F> {
    fn node(&self) -> &ProxyNode {
        &self.node
    }

    fn release(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.release_physical().await })
    }
}

/// A prepared statement on a borrowed connection.
///
/// Closed automatically when its connection is closed or returned.
pub struct PooledStatement<F: ConnectionFactory> {
    handle: Arc<StatementHandle<F>>,
}

impl<F: ConnectionFactory> PooledStatement<F> {
    pub(crate) async fn adopt(session: Arc<Session<F>>, statement: StatementOf<F>) -> Result<Self> {
        let handle = Arc::new(StatementHandle {
            node: session.node.child(ProxyKind::Statement),
            session: Arc::clone(&session),
            physical: Mutex::new(Some(statement)),
        });
        if let Err(error) = session.node.adopt(Arc::clone(&handle) as Arc<dyn ChildHandle>) {
            handle.release_physical().await;
            return Err(error);
        }
        Ok(Self { handle })
    }

    /// Whether this statement or its connection is closed.
    pub fn is_closed(&self) -> bool {
        self.handle.node.is_closed()
    }

    /// Execute the statement; returns the affected row count.
    pub async fn execute(&mut self) -> Result<u64> {
        let handle = &self.handle;
        let mut guard = handle.open().await?;
        let statement = guard.as_mut().ok_or_else(|| handle.closed())?;
        let rows = statement
            .execute()
            .await
            .map_err(|e| handle.session.fail(e))?;
        handle.session.wrote();
        Ok(rows)
    }

    /// Execute the statement and open a cursor over its rows.
    pub async fn query(&mut self) -> Result<PooledCursor<F>> {
        let handle = &self.handle;
        let cursor = {
            let mut guard = handle.open().await?;
            let statement = guard.as_mut().ok_or_else(|| handle.closed())?;
            statement
                .query()
                .await
                .map_err(|e| handle.session.fail(e))?
        };
        PooledCursor::adopt(&handle.node, Arc::clone(&handle.session), cursor).await
    }

    /// Close the statement and every cursor it opened. Idempotent.
    pub async fn close(&mut self) {
        if !self.handle.node.mark_closed() {
            return;
        }
        self.handle.node.detach_from_parent();
        Arc::clone(&self.handle).release().await;
    }
}

impl<F: ConnectionFactory> Drop for PooledStatement<F> {
    fn drop(&mut self) {
        if !self.handle.node.mark_closed() {
            return;
        }
        self.handle.node.detach_from_parent();
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(Arc::clone(&self.handle).release());
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledStatement<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledStatement")
            .field("connection", &self.handle.session.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
