//! Connection pool manager.
//!
//! [`Pool<F>`] keeps at most `max_size` physical connections alive, hands
//! them out as [`PooledConnection`] proxies and takes them back when the
//! proxy is closed or dropped. A returning connection goes straight to the
//! oldest waiting borrower through the [`TransferChannel`] when one is
//! parked, and into the idle set otherwise.
//!
//! Factory I/O never runs while the pool lock is held.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PoolConfig, QueueStrategy, ValidationBudget};
use crate::driver::ConnectionFactory;
use crate::error::{Error, Result};
use crate::events::{DestroyReason, EventBus, PoolEvent};
use crate::maintenance;
use crate::pooled::{Pooled, Slot, SlotState};
use crate::proxy::PooledConnection;
use crate::transfer::{PollError, Ticket, TransferChannel};

// ---------------------------------------------------------------------------
// PoolStats
// ---------------------------------------------------------------------------

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections counted against `max_size`, including creations in flight.
    pub live: usize,
    /// Connections parked in the idle set.
    pub idle: usize,
    /// Connections currently handed out.
    pub borrowed: usize,
    /// Callers parked waiting for a connection.
    pub waiters: usize,
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total returns.
    pub total_releases: u64,
    /// Physical connections ever opened.
    pub created: u64,
    /// Physical connections ever destroyed.
    pub destroyed: u64,
    /// Returns handed directly to a waiting caller.
    pub handoffs: u64,
    /// Acquisitions that gave up waiting.
    pub timeouts: u64,
    /// Re-validations that found a dead connection.
    pub validation_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_acquisitions: AtomicU64,
    total_releases: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    handoffs: AtomicU64,
    timeouts: AtomicU64,
    validation_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

struct PoolState<C> {
    idle: VecDeque<Pooled<C>>,
    /// Idle + borrowed + validating + in flight + creations in progress.
    live: usize,
    borrowed: usize,
}

/// Outcome of a non-blocking attempt to get a connection.
enum Claim<C> {
    Idle(Pooled<C>),
    /// Capacity was reserved; the caller must create a connection.
    Create,
    Full,
}

/// Deadlines of one `acquire` call.
#[derive(Debug, Clone, Copy)]
struct Budget {
    started: Instant,
    /// Until when the caller may park waiting for a returned connection.
    wait: Instant,
    /// Until when creation and re-validation may run.
    work: Instant,
}

impl Budget {
    /// A zero timeout rules out parking only; creation and validation
    /// still get the configured `acquire_timeout`.
    fn new(timeout: Duration, configured: Duration) -> Self {
        let started = Instant::now();
        let work = if timeout.is_zero() { configured } else { timeout };
        Self {
            started,
            wait: started + timeout,
            work: started + work,
        }
    }

    fn extend(&mut self, by: Duration) {
        self.wait += by;
        self.work += by;
    }
}

enum Handout<C> {
    Ready(Pooled<C>),
    /// Doomed or expired; does not count as a validation retry.
    Skipped,
    /// Failed re-validation.
    Rejected,
}

pub(crate) struct PoolInner<F: ConnectionFactory> {
    pub(crate) factory: F,
    pub(crate) config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    transfer: TransferChannel<Pooled<F::Connection>>,
    /// Every live connection's bookkeeping, borrowed ones included.
    registry: DashMap<u64, Arc<Slot>>,
    counters: Counters,
    events: EventBus,
    closed: AtomicBool,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> Error {
        Error::PoolClosed {
            pool: self.config.name.clone(),
        }
    }

    fn timeout_error(&self, started: Instant) -> Error {
        bump(&self.counters.timeouts);
        let waiters = self.transfer.waiter_count();
        self.events.emit(PoolEvent::Exhausted { waiters });
        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(pool = %self.config.name, waited_ms, waiters, "acquire timed out");
        Error::BorrowTimeout {
            pool: self.config.name.clone(),
            waited_ms,
            max_size: self.config.max_size,
            waiters,
        }
    }

    fn pop_idle(&self, state: &mut PoolState<F::Connection>) -> Option<Pooled<F::Connection>> {
        match self.config.strategy {
            QueueStrategy::Fifo => state.idle.pop_front(),
            QueueStrategy::Lifo => state.idle.pop_back(),
        }
    }

    fn claim(&self) -> Result<Claim<F::Connection>> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if let Some(pooled) = self.pop_idle(&mut state) {
            return Ok(Claim::Idle(pooled));
        }
        if state.live < self.config.max_size {
            state.live += 1;
            return Ok(Claim::Create);
        }
        Ok(Claim::Full)
    }

    /// Reserve capacity without claiming idle connections.
    fn reserve(&self) -> bool {
        let mut state = self.state.lock();
        if self.is_closed() || state.live >= self.config.max_size {
            return false;
        }
        state.live += 1;
        true
    }

    fn unreserve(&self) {
        let mut state = self.state.lock();
        state.live = state.live.saturating_sub(1);
    }

    fn register(&self, conn: F::Connection) -> Pooled<F::Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pooled = Pooled::new(id, conn);
        self.registry.insert(id, Arc::clone(&pooled.slot));
        bump(&self.counters.created);
        self.events.emit(PoolEvent::Created { id });
        debug!(pool = %self.config.name, id, "connection created");
        pooled
    }

    // -- acquire ------------------------------------------------------------

    async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<PooledConnection<F>> {
        let mut budget = Budget::new(timeout, self.config.acquire_timeout);
        let mut rejected = 0u32;
        loop {
            let candidate = self.next_candidate(&budget).await?;
            let checked = Instant::now();
            match self.prepare_for_handout(candidate, &budget).await? {
                Handout::Ready(pooled) => {
                    return Ok(self.issue(pooled, budget.started.elapsed()));
                }
                Handout::Skipped => {}
                Handout::Rejected => {
                    rejected += 1;
                    if rejected > self.config.max_validation_retries {
                        return Err(self.timeout_error(budget.started));
                    }
                    if self.config.validation_budget == ValidationBudget::Extended {
                        budget.extend(checked.elapsed());
                    }
                    if Instant::now() >= budget.work {
                        return Err(self.timeout_error(budget.started));
                    }
                }
            }
        }
    }

    /// Idle fast path, then creation, then waiting on the transfer channel.
    async fn next_candidate(self: &Arc<Self>, budget: &Budget) -> Result<Pooled<F::Connection>> {
        match self.claim()? {
            Claim::Idle(pooled) => return Ok(pooled),
            Claim::Create => return self.create_reserved(budget).await,
            Claim::Full => {}
        }
        if Instant::now() >= budget.wait {
            return Err(self.timeout_error(budget.started));
        }

        let mut waiting = Waiting::register(self)?;
        // a connection may have been parked between the claim and registering
        match self.claim()? {
            Claim::Idle(pooled) => return Ok(pooled),
            Claim::Create => {
                drop(waiting);
                return self.create_reserved(budget).await;
            }
            Claim::Full => {}
        }
        match waiting.ticket.wait_until(budget.wait).await {
            Ok(pooled) => Ok(pooled),
            Err(PollError::Closed) => Err(self.closed_error()),
            Err(PollError::TimedOut) => Err(self.timeout_error(budget.started)),
        }
    }

    async fn create_reserved(self: &Arc<Self>, budget: &Budget) -> Result<Pooled<F::Connection>> {
        let mut reservation = Reservation {
            pool: self,
            committed: false,
        };
        match tokio::time::timeout_at(budget.work, self.factory.create()).await {
            Ok(Ok(conn)) => {
                reservation.committed = true;
                Ok(self.register(conn))
            }
            Ok(Err(source)) => {
                warn!(pool = %self.config.name, error = %source, "failed to create connection");
                Err(Error::Creation {
                    pool: self.config.name.clone(),
                    source,
                })
            }
            Err(_) => Err(self.timeout_error(budget.started)),
        }
    }

    /// Reject doomed, expired and dead connections before they are issued.
    async fn prepare_for_handout(
        self: &Arc<Self>,
        pooled: Pooled<F::Connection>,
        budget: &Budget,
    ) -> Result<Handout<F::Connection>> {
        if self.is_closed() {
            self.retire(pooled, DestroyReason::Shutdown);
            return Err(self.closed_error());
        }
        if let Some(reason) = pooled.slot.doomed() {
            self.retire(pooled, reason);
            return Ok(Handout::Skipped);
        }
        if pooled.slot.age() >= self.config.max_lifetime {
            self.retire(pooled, DestroyReason::Expired);
            return Ok(Handout::Skipped);
        }
        if pooled.slot.idle_for() < self.config.validation_interval {
            if !pooled.slot.transition(SlotState::Idle, SlotState::Borrowed) {
                self.retire(pooled, DestroyReason::Cleared);
                return Ok(Handout::Skipped);
            }
            return Ok(Handout::Ready(pooled));
        }

        let configured = self.config.validation_timeout;
        let (limit, cut_short) = match self.config.validation_budget {
            ValidationBudget::Extended => (configured, false),
            ValidationBudget::Shared => {
                let remaining = budget.work.saturating_duration_since(Instant::now());
                (remaining.min(configured), remaining < configured)
            }
        };
        if limit.is_zero() {
            // out of budget before the check could start; the connection is untouched
            self.recycle(pooled);
            return Err(self.timeout_error(budget.started));
        }

        if !pooled
            .slot
            .transition(SlotState::Idle, SlotState::Validating)
        {
            self.retire(pooled, DestroyReason::Cleared);
            return Ok(Handout::Skipped);
        }
        let mut held = Held {
            pool: self,
            pooled: Some(pooled),
        };
        let checked = match held.pooled.as_mut() {
            Some(pooled) => {
                let check = self.factory.validate(&mut pooled.conn, limit);
                tokio::time::timeout(limit, check).await.ok()
            }
            None => None,
        };
        let Some(pooled) = held.pooled.take() else {
            return Ok(Handout::Skipped);
        };
        if checked.is_none() && cut_short {
            // the caller's budget ran out mid-check; the connection state is unknown
            self.retire(pooled, DestroyReason::Broken);
            return Err(self.timeout_error(budget.started));
        }
        if checked != Some(true) {
            bump(&self.counters.validation_failures);
            warn!(pool = %self.config.name, id = pooled.id(), "connection failed validation");
            self.retire(pooled, DestroyReason::ValidationFailed);
            return Ok(Handout::Rejected);
        }
        if !pooled
            .slot
            .transition(SlotState::Validating, SlotState::Borrowed)
        {
            self.retire(pooled, DestroyReason::Cleared);
            return Ok(Handout::Skipped);
        }
        Ok(Handout::Ready(pooled))
    }

    fn issue(
        self: &Arc<Self>,
        pooled: Pooled<F::Connection>,
        waited: Duration,
    ) -> PooledConnection<F> {
        self.state.lock().borrowed += 1;
        bump(&self.counters.total_acquisitions);
        pooled.slot.touch_access();
        let id = pooled.id();
        self.events.emit(PoolEvent::Acquired { id, waited });
        PooledConnection::new(Arc::clone(self), pooled)
    }

    // -- release ------------------------------------------------------------

    /// Account for a returned connection. Returns it if it may be reused.
    fn check_in(
        self: &Arc<Self>,
        pooled: Pooled<F::Connection>,
        broken: bool,
    ) -> Option<Pooled<F::Connection>> {
        {
            let mut state = self.state.lock();
            state.borrowed = state.borrowed.saturating_sub(1);
        }
        bump(&self.counters.total_releases);
        pooled.slot.clear_owner();
        self.events.emit(PoolEvent::Released {
            id: pooled.id(),
            held: pooled.slot.held_for(),
        });

        let reason = if broken {
            Some(DestroyReason::Broken)
        } else if self.is_closed() {
            Some(DestroyReason::Shutdown)
        } else if let Some(reason) = pooled.slot.doomed() {
            Some(reason)
        } else if pooled.slot.age() >= self.config.max_lifetime {
            Some(DestroyReason::Expired)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.retire(pooled, reason);
            return None;
        }

        pooled.slot.touch_active();
        if !pooled
            .slot
            .transition(SlotState::Borrowed, SlotState::Idle)
        {
            self.retire(pooled, DestroyReason::Cleared);
            return None;
        }
        Some(pooled)
    }

    /// Return a connection without waiting for a borrower.
    pub(crate) fn check_in_now(self: &Arc<Self>, pooled: Pooled<F::Connection>, broken: bool) {
        if let Some(pooled) = self.check_in(pooled, broken) {
            self.recycle(pooled);
        }
    }

    /// Return a connection, waiting up to `handoff_timeout` for a borrower.
    pub(crate) async fn give_back(self: &Arc<Self>, pooled: Pooled<F::Connection>, broken: bool) {
        let Some(pooled) = self.check_in(pooled, broken) else {
            return;
        };
        let handoff = self.config.handoff_timeout;
        if handoff.is_zero() {
            self.recycle(pooled);
            return;
        }

        let deadline = Instant::now() + handoff;
        let mut held = Returning {
            pool: self,
            pooled: Some(pooled),
        };
        loop {
            let Some(pooled) = held.pooled.take() else {
                return;
            };
            let id = pooled.id();
            match self.transfer.offer(pooled) {
                Ok(()) => {
                    self.handed_off(id);
                    return;
                }
                Err(back) => held.pooled = Some(back),
            }
            if !self.transfer.wait_for_consumer(deadline).await {
                break;
            }
        }
        // dropping `held` parks the connection
    }

    fn handed_off(&self, id: u64) {
        bump(&self.counters.handoffs);
        self.events.emit(PoolEvent::HandedOff { id });
        debug!(pool = %self.config.name, id, "connection handed off to waiter");
    }

    /// Hand a reusable connection to a waiter, or park it idle.
    fn recycle(self: &Arc<Self>, mut pooled: Pooled<F::Connection>) {
        loop {
            let id = pooled.id();
            match self.transfer.offer(pooled) {
                Ok(()) => {
                    self.handed_off(id);
                    return;
                }
                Err(back) => pooled = back,
            }

            let mut state = self.state.lock();
            if self.is_closed() {
                drop(state);
                self.retire(pooled, DestroyReason::Shutdown);
                return;
            }
            state.idle.push_back(pooled);
            // a waiter that registered after the offer may have missed the park
            if self.transfer.waiter_count() == 0 {
                return;
            }
            match self.pop_idle(&mut state) {
                Some(next) => pooled = next,
                None => return,
            }
        }
    }

    // -- destruction ----------------------------------------------------------

    /// Remove a connection from every piece of bookkeeping.
    fn discard(&self, pooled: Pooled<F::Connection>, reason: DestroyReason) -> F::Connection {
        let Pooled { conn, slot } = pooled;
        slot.close();
        slot.clear_owner();
        self.registry.remove(&slot.id);
        self.unreserve();
        bump(&self.counters.destroyed);
        self.events.emit(PoolEvent::Destroyed {
            id: slot.id,
            reason,
        });
        debug!(pool = %self.config.name, id = slot.id, %reason, "destroying connection");
        conn
    }

    async fn destroy(&self, conn: F::Connection) {
        if let Err(error) = self.factory.destroy(conn).await {
            warn!(pool = %self.config.name, error = %error, "failed to destroy connection");
        }
    }

    /// Destroy in the background.
    fn retire(self: &Arc<Self>, pooled: Pooled<F::Connection>, reason: DestroyReason) {
        let conn = self.discard(pooled, reason);
        match Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move { inner.destroy(conn).await });
            }
            Err(_) => drop(conn),
        }
        self.capacity_freed();
    }

    async fn retire_now(self: &Arc<Self>, pooled: Pooled<F::Connection>, reason: DestroyReason) {
        let conn = self.discard(pooled, reason);
        self.destroy(conn).await;
        self.capacity_freed();
    }

    /// Replace a destroyed connection in the background while callers wait.
    fn capacity_freed(self: &Arc<Self>) {
        if self.is_closed() || self.transfer.waiter_count() == 0 {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        if !self.reserve() {
            return;
        }
        let inner = Arc::clone(self);
        runtime.spawn(async move {
            match inner.factory.create().await {
                Ok(conn) => {
                    let pooled = inner.register(conn);
                    inner.recycle(pooled);
                }
                Err(error) => {
                    inner.unreserve();
                    warn!(
                        pool = %inner.config.name,
                        error = %error,
                        "background connection creation failed"
                    );
                }
            }
        });
    }

    // -- maintenance ----------------------------------------------------------

    pub(crate) async fn maintain(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let evicted = self.evict_idle();
        for (pooled, reason) in evicted {
            self.retire_now(pooled, reason).await;
        }

        for entry in self.registry.iter() {
            let slot = entry.value();
            if slot.state() == SlotState::Borrowed && slot.age() >= self.config.max_lifetime {
                slot.doom(DestroyReason::Expired);
            }
        }

        if let Err(error) = self.top_up().await {
            warn!(pool = %self.config.name, error = %error, "maintenance could not reach min_idle");
        }
    }

    /// Take idle connections past their lifetime, or idle for too long
    /// while the pool holds more than `min_idle`.
    fn evict_idle(&self) -> Vec<(Pooled<F::Connection>, DestroyReason)> {
        let mut state = self.state.lock();
        let mut surplus = state.live.saturating_sub(self.config.min_idle);
        let mut kept = VecDeque::with_capacity(state.idle.len());
        let mut evicted = Vec::new();
        for pooled in state.idle.drain(..) {
            if pooled.slot.age() >= self.config.max_lifetime {
                surplus = surplus.saturating_sub(1);
                evicted.push((pooled, DestroyReason::Expired));
            } else if surplus > 0 && pooled.slot.idle_for() >= self.config.idle_timeout {
                surplus -= 1;
                evicted.push((pooled, DestroyReason::IdleTimeout));
            } else {
                kept.push_back(pooled);
            }
        }
        state.idle = kept;
        evicted
    }

    /// Create connections until `min_idle` are live.
    async fn top_up(self: &Arc<Self>) -> Result<()> {
        loop {
            let reserved = {
                let mut state = self.state.lock();
                if self.is_closed() || state.live >= self.config.min_idle {
                    false
                } else {
                    state.live += 1;
                    true
                }
            };
            if !reserved {
                return Ok(());
            }
            match self.factory.create().await {
                Ok(conn) => {
                    let pooled = self.register(conn);
                    self.recycle(pooled);
                }
                Err(source) => {
                    self.unreserve();
                    return Err(Error::Creation {
                        pool: self.config.name.clone(),
                        source,
                    });
                }
            }
        }
    }

    async fn clear(self: &Arc<Self>, force: bool) {
        let idle: Vec<_> = self.state.lock().idle.drain(..).collect();
        let cleared = idle.len();
        for pooled in idle {
            self.retire_now(pooled, DestroyReason::Cleared).await;
        }

        let mut invalidated = 0usize;
        if force {
            let slots: Vec<Arc<Slot>> = self
                .registry
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            for slot in slots {
                slot.doom(DestroyReason::Cleared);
                if slot.invalidate_owner() {
                    invalidated += 1;
                }
            }
        }
        info!(pool = %self.config.name, cleared, invalidated, force, "pool cleared");
    }

    async fn shutdown(self: &Arc<Self>) {
        let idle: Vec<_> = {
            let mut state = self.state.lock();
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            state.idle.drain(..).collect()
        };
        self.shutdown.cancel();
        self.transfer.close();
        info!(pool = %self.config.name, idle = idle.len(), "shutting down connection pool");

        for pooled in idle {
            self.retire_now(pooled, DestroyReason::Shutdown).await;
        }
        self.events.emit(PoolEvent::ShutDown);
    }

    fn stats(&self) -> PoolStats {
        let (live, idle, borrowed) = {
            let state = self.state.lock();
            (state.live, state.idle.len(), state.borrowed)
        };
        PoolStats {
            live,
            idle,
            borrowed,
            waiters: self.transfer.waiter_count(),
            total_acquisitions: self.counters.total_acquisitions.load(Ordering::Relaxed),
            total_releases: self.counters.total_releases.load(Ordering::Relaxed),
            created: self.counters.created.load(Ordering::Relaxed),
            destroyed: self.counters.destroyed.load(Ordering::Relaxed),
            handoffs: self.counters.handoffs.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            validation_failures: self.counters.validation_failures.load(Ordering::Relaxed),
        }
    }
}

impl<F: ConnectionFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Drop guards
// ---------------------------------------------------------------------------

/// A creation slot; released unless the creation succeeded.
struct Reservation<'a, F: ConnectionFactory> {
    pool: &'a Arc<PoolInner<F>>,
    committed: bool,
}

impl<F: ConnectionFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.unreserve();
            self.pool.capacity_freed();
        }
    }
}

/// A parked borrower. A connection delivered after the borrower gave up is
/// put back instead of being lost.
struct Waiting<'a, F: ConnectionFactory> {
    pool: &'a Arc<PoolInner<F>>,
    ticket: Ticket<'a, Pooled<F::Connection>>,
}

impl<'a, F: ConnectionFactory> Waiting<'a, F> {
    fn register(pool: &'a Arc<PoolInner<F>>) -> Result<Self> {
        let ticket = pool
            .transfer
            .register()
            .map_err(|_| pool.closed_error())?;
        Ok(Self { pool, ticket })
    }
}

impl<F: ConnectionFactory> Drop for Waiting<'_, F> {
    fn drop(&mut self) {
        if let Some(pooled) = self.ticket.cancel() {
            self.pool.recycle(pooled);
        }
    }
}

/// A connection being validated. Destroyed if the caller goes away midway.
struct Held<'a, F: ConnectionFactory> {
    pool: &'a Arc<PoolInner<F>>,
    pooled: Option<Pooled<F::Connection>>,
}

impl<F: ConnectionFactory> Drop for Held<'_, F> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.retire(pooled, DestroyReason::Broken);
        }
    }
}

/// A returned connection waiting for a borrower; parked when dropped.
struct Returning<'a, F: ConnectionFactory> {
    pool: &'a Arc<PoolInner<F>>,
    pooled: Option<Pooled<F::Connection>>,
}

impl<F: ConnectionFactory> Drop for Returning<'_, F> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            self.pool.recycle(pooled);
        }
    }
}

// ---------------------------------------------------------------------------
// Pool<F>
// ---------------------------------------------------------------------------

/// Bounded pool of physical connections produced by a [`ConnectionFactory`].
///
/// Cheap to clone; clones share the same connections.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("closed", &self.inner.is_closed())
            .field("stats", &self.inner.stats())
            .finish()
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create an empty pool.
    ///
    /// Starts the background maintenance task when
    /// `config.maintenance_interval` is set, which requires a running tokio
    /// runtime.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid or
    /// maintenance is enabled outside a runtime.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let runtime = match config.maintenance_interval {
            Some(_) => Some(Handle::try_current().map_err(|_| {
                Error::configuration("background maintenance requires a running tokio runtime")
            })?),
            None => None,
        };

        let inner = Arc::new(PoolInner {
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max_size),
                live: 0,
                borrowed: 0,
            }),
            transfer: TransferChannel::new(),
            registry: DashMap::new(),
            counters: Counters::default(),
            events: EventBus::default(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
            config,
        });

        if let (Some(runtime), Some(interval)) = (runtime, inner.config.maintenance_interval) {
            maintenance::spawn(&runtime, Arc::downgrade(&inner), inner.shutdown.clone(), interval);
        }
        info!(
            pool = %inner.config.name,
            max_size = inner.config.max_size,
            min_idle = inner.config.min_idle,
            "connection pool started"
        );
        Ok(Self { inner })
    }

    /// Create a pool and open `min_idle` connections before returning.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an invalid config and
    /// [`Error::Creation`] if a connection cannot be opened; the pool is
    /// shut down in that case.
    pub async fn connect(factory: F, config: PoolConfig) -> Result<Self> {
        let pool = Self::new(factory, config)?;
        if let Err(error) = pool.inner.top_up().await {
            pool.inner.shutdown().await;
            return Err(error);
        }
        Ok(pool)
    }

    /// Borrow a connection, waiting up to the configured `acquire_timeout`.
    ///
    /// # Errors
    /// [`Error::BorrowTimeout`] if none becomes available in time,
    /// [`Error::Creation`] if the factory fails, [`Error::PoolClosed`] after
    /// shutdown.
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        self.inner.acquire(self.inner.config.acquire_timeout).await
    }

    /// Borrow a connection, waiting up to `timeout`.
    ///
    /// A zero timeout never parks: it fails immediately when the pool is
    /// saturated.
    ///
    /// # Errors
    /// Same as [`acquire`](Self::acquire).
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<F>> {
        self.inner.acquire(timeout).await
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Run one maintenance pass now.
    pub async fn maintain(&self) {
        self.inner.maintain().await;
    }

    /// Destroy every idle connection.
    ///
    /// With `force`, borrowed connections are invalidated as well: their
    /// proxies fail with [`Error::AlreadyClosed`] and the connections are
    /// destroyed when returned. The pool remains usable.
    pub async fn clear(&self, force: bool) {
        self.inner.clear(force).await;
    }

    /// Close the pool. Idempotent.
    ///
    /// Parked and future borrowers fail with [`Error::PoolClosed`]; idle
    /// connections are destroyed now and borrowed ones when they return.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Subscribe to pool lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// The configuration this pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}
