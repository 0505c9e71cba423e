//! Open/closed lifecycle shared by connection, statement and cursor proxies.
//!
//! Every proxy owns a [`ProxyNode`]. Derived proxies point at their
//! parent's node, so a closed ancestor is observed by every descendant
//! even before the cascade reaches it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::error::{Error, ProxyKind, Result};

/// A derived proxy tracked by its parent so the parent can close it.
pub(crate) trait ChildHandle: Send + Sync {
    fn node(&self) -> &ProxyNode;

    /// Close the child and release its physical handle.
    fn release(self: Arc<Self>) -> BoxFuture<'static, ()>;
}

/// Closed flag plus parent/child links of one proxy.
pub(crate) struct ProxyNode {
    kind: ProxyKind,
    closed: AtomicBool,
    parent: Option<Arc<ProxyNode>>,
    children: Mutex<Vec<Arc<dyn ChildHandle>>>,
}

impl ProxyNode {
    pub(crate) fn root(kind: ProxyKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            closed: AtomicBool::new(false),
            parent: None,
            children: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn child(self: &Arc<Self>, kind: ProxyKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            closed: AtomicBool::new(false),
            parent: Some(Arc::clone(self)),
            children: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// Fail if this proxy or any ancestor is closed.
    ///
    /// A closed ancestor takes precedence, so a child closed by its parent's
    /// cascade reports [`Error::ParentClosed`].
    pub(crate) fn ensure_open(&self) -> Result<()> {
        let mut ancestor = self.parent.as_deref();
        while let Some(node) = ancestor {
            if node.closed.load(Ordering::Acquire) {
                return Err(Error::ParentClosed { kind: self.kind });
            }
            ancestor = node.parent.as_deref();
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed { kind: self.kind });
        }
        Ok(())
    }

    /// True if this proxy or any ancestor is closed.
    pub(crate) fn is_closed(&self) -> bool {
        self.ensure_open().is_err()
    }

    /// Flip the closed flag; returns `true` only for the call that closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Start tracking `child`. Fails if this proxy closed in the meantime.
    pub(crate) fn adopt(&self, child: Arc<dyn ChildHandle>) -> Result<()> {
        let mut children = self.children.lock();
        self.ensure_open()?;
        children.push(child);
        Ok(())
    }

    /// Stop tracking the child owning `node`.
    pub(crate) fn detach(&self, node: &ProxyNode) {
        self.children
            .lock()
            .retain(|child| !std::ptr::eq(child.node(), node));
    }

    pub(crate) fn detach_from_parent(&self) {
        if let Some(parent) = &self.parent {
            parent.detach(self);
        }
    }

    /// Take every tracked child, marking each one closed.
    pub(crate) fn drain_children(&self) -> Vec<Arc<dyn ChildHandle>> {
        let children = std::mem::take(&mut *self.children.lock());
        for child in &children {
            child.node().mark_closed();
        }
        children
    }

    pub(crate) fn open_children(&self) -> usize {
        self.children.lock().len()
    }
}

/// Release every child in order.
pub(crate) async fn release_all(children: Vec<Arc<dyn ChildHandle>>) {
    for child in children {
        child.release().await;
    }
}

impl fmt::Debug for ProxyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyNode")
            .field("kind", &self.kind)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .field("children", &self.open_children())
            .finish()
    }
}
