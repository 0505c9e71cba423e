//! Cursor proxy derived from a statement.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::debug;

use super::connection::Session;
use super::state::{ChildHandle, ProxyNode};
use crate::driver::{ConnectionFactory, Cursor, CursorOf, RowOf};
use crate::error::{Error, ProxyKind, Result};

pub(crate) struct CursorHandle<F: ConnectionFactory> {
    node: Arc<ProxyNode>,
    session: Arc<Session<F>>,
    physical: Mutex<Option<CursorOf<F>>>,
}

impl<F: ConnectionFactory> CursorHandle<F> {
    async fn release_physical(&self) {
        let physical = self.physical.lock().await.take();
        if let Some(mut cursor) = physical {
            if let Err(error) = cursor.close().await {
                debug!(id = self.session.id, error = %error, "closing cursor failed");
            }
        }
    }
}

impl<F: ConnectionFactory> ChildHandle for CursorHandle<F> {
    fn node(&self) -> &ProxyNode {
        &self.node
    }

    fn release(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move { self.release_physical().await })
    }
}

/// Forward-only iteration over the rows of a statement.
pub struct PooledCursor<F: ConnectionFactory> {
    handle: Arc<CursorHandle<F>>,
}

impl<F: ConnectionFactory> PooledCursor<F> {
    pub(crate) async fn adopt(
        parent: &Arc<ProxyNode>,
        session: Arc<Session<F>>,
        cursor: CursorOf<F>,
    ) -> Result<Self> {
        let handle = Arc::new(CursorHandle {
            node: parent.child(ProxyKind::Cursor),
            session,
            physical: Mutex::new(Some(cursor)),
        });
        if let Err(error) = parent.adopt(Arc::clone(&handle) as Arc<dyn ChildHandle>) {
            handle.release_physical().await;
            return Err(error);
        }
        Ok(Self { handle })
    }

    /// Whether this cursor, its statement or its connection is closed.
    pub fn is_closed(&self) -> bool {
        self.handle.node.is_closed()
    }

    /// Fetch the next row, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> Result<Option<RowOf<F>>> {
        let handle = &self.handle;
        handle.node.ensure_open()?;
        let mut guard = handle.physical.lock().await;
        handle.node.ensure_open()?;
        let cursor = guard.as_mut().ok_or(Error::AlreadyClosed {
            kind: ProxyKind::Cursor,
        })?;
        cursor.next().await.map_err(|e| handle.session.fail(e))
    }

    /// Close the cursor. Idempotent.
    pub async fn close(&mut self) {
        if !self.handle.node.mark_closed() {
            return;
        }
        self.handle.node.detach_from_parent();
        self.handle.release_physical().await;
    }
}

impl<F: ConnectionFactory> Drop for PooledCursor<F> {
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

impl<F: ConnectionFactory> fmt::Debug for PooledCursor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledCursor")
            .field("connection", &self.handle.session.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
