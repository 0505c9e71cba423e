//! Event broadcasting for pool lifecycle observability.
//!
//! Provides [`PoolEvent`] variants emitted by the pool and an [`EventBus`]
//! backed by `tokio::sync::broadcast`.

use std::fmt;
use std::time::Duration;

use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted during connection lifecycle operations.
///
/// Connection-level variants carry the pool-assigned connection `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A physical connection was opened.
    Created {
        /// The connection id.
        id: u64,
    },
    /// A connection was handed to a caller.
    Acquired {
        /// The connection id.
        id: u64,
        /// How long the caller waited.
        waited: Duration,
    },
    /// A returning connection went straight to a waiting caller.
    HandedOff {
        /// The connection id.
        id: u64,
    },
    /// A caller returned a connection.
    Released {
        /// The connection id.
        id: u64,
        /// How long the caller held it.
        held: Duration,
    },
    /// A connection was permanently removed from the pool.
    Destroyed {
        /// The connection id.
        id: u64,
        /// Why it was removed.
        reason: DestroyReason,
    },
    /// A caller gave up waiting for a connection.
    Exhausted {
        /// Number of callers still waiting.
        waiters: usize,
    },
    /// The pool was shut down.
    ShutDown,
}

// ---------------------------------------------------------------------------
// DestroyReason
// ---------------------------------------------------------------------------

/// Reason a connection was permanently removed from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestroyReason {
    /// Idle longer than `idle_timeout`.
    IdleTimeout,
    /// Older than `max_lifetime`.
    Expired,
    /// Re-validation before hand-out failed.
    ValidationFailed,
    /// The borrower hit a fatal error or the reset on return failed.
    Broken,
    /// Removed by [`Pool::clear`](crate::Pool::clear).
    Cleared,
    /// The pool is shutting down.
    Shutdown,
}

impl fmt::Display for DestroyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IdleTimeout => "idle timeout",
            Self::Expired => "max lifetime exceeded",
            Self::ValidationFailed => "validation failed",
            Self::Broken => "broken",
            Self::Cleared => "cleared",
            Self::Shutdown => "shutdown",
        })
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool lifecycle events.
///
/// Emission is fire-and-forget: if no subscribers are listening or a
/// subscriber lags, events are dropped (no backpressure on the pool).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // No receivers is not an error for the pool.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
