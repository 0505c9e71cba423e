//! Pool-private wrapper around one physical connection.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::events::DestroyReason;
use crate::proxy::state::ProxyNode;

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SlotState {
    /// Parked in the idle set or in flight to a waiter.
    Idle = 0,
    /// Handed out to a caller.
    Borrowed = 1,
    /// Being re-validated before hand-out.
    Validating = 2,
    /// Removed from the pool; the physical connection is being destroyed.
    Closed = 3,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Borrowed,
            2 => Self::Validating,
            _ => Self::Closed,
        }
    }
}

/// Bookkeeping shared between the pool's registry and the connection.
///
/// Maintenance inspects slots of borrowed connections through the registry
/// without touching the connections themselves.
pub(crate) struct Slot {
    pub(crate) id: u64,
    state: AtomicU8,
    created_at: Instant,
    last_access: Mutex<Instant>,
    last_active: Mutex<Instant>,
    doomed: AtomicBool,
    doom_reason: Mutex<Option<DestroyReason>>,
    owner: Mutex<Weak<ProxyNode>>,
}

impl Slot {
    fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: AtomicU8::new(SlotState::Idle as u8),
            created_at: now,
            last_access: Mutex::new(now),
            last_active: Mutex::new(now),
            doomed: AtomicBool::new(false),
            doom_reason: Mutex::new(None),
            owner: Mutex::new(Weak::new()),
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; fails if another actor changed the state first.
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Force the slot to `Closed`, returning the state it had.
    pub(crate) fn close(&self) -> SlotState {
        SlotState::from_u8(self.state.swap(SlotState::Closed as u8, Ordering::AcqRel))
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last returned (or created).
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    pub(crate) fn held_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub(crate) fn touch_access(&self) {
        *self.last_access.lock() = Instant::now();
    }

    pub(crate) fn touch_active(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Destroy instead of recycling on the next return.
    pub(crate) fn doom(&self, reason: DestroyReason) {
        let mut slot = self.doom_reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.doomed.store(true, Ordering::Release);
    }

    pub(crate) fn doomed(&self) -> Option<DestroyReason> {
        if self.doomed.load(Ordering::Acquire) {
            Some((*self.doom_reason.lock()).unwrap_or(DestroyReason::Cleared))
        } else {
            None
        }
    }

    pub(crate) fn set_owner(&self, node: &Arc<ProxyNode>) {
        *self.owner.lock() = Arc::downgrade(node);
    }

    pub(crate) fn clear_owner(&self) {
        *self.owner.lock() = Weak::new();
    }

    /// Close the proxy currently holding this connection, if any.
    pub(crate) fn invalidate_owner(&self) -> bool {
        match self.owner.lock().upgrade() {
            Some(node) => node.mark_closed(),
            None => false,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("age", &self.age())
            .field("doomed", &self.doomed.load(Ordering::Relaxed))
            .finish()
    }
}

/// A physical connection owned by the pool.
pub(crate) struct Pooled<C> {
    pub(crate) conn: C,
    pub(crate) slot: Arc<Slot>,
}

impl<C> Pooled<C> {
    pub(crate) fn new(id: u64, conn: C) -> Self {
        Self {
            conn,
            slot: Arc::new(Slot::new(id)),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.slot.id
    }
}

impl<C> fmt::Debug for Pooled<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("slot", &self.slot).finish()
    }
}
