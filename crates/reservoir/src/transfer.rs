//! Direct handoff from producers to parked consumers.
//!
//! [`TransferChannel`] has no buffer. A producer either hands its item to
//! the oldest registered consumer or gets the item back; consumers are
//! served strictly in arrival order. Each consumer owns a single-use slot
//! (a `oneshot` receiver), so an item is delivered to exactly one consumer.
//!
//! Delivery and deregistration both happen under the waiter-queue lock: a
//! consumer whose deadline expires first tries to remove itself, and if it
//! is already gone the producer has delivered and the consumer takes the
//! item instead of reporting a timeout.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;

/// Why a consumer did not receive an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    /// The deadline passed before a producer offered anything.
    TimedOut,
    /// The channel was closed.
    Closed,
}

struct Waiter<T> {
    ticket: u64,
    tx: oneshot::Sender<T>,
}

/// Rendezvous point between producers and FIFO-ordered consumers.
pub struct TransferChannel<T> {
    waiters: Mutex<VecDeque<Waiter<T>>>,
    next_ticket: AtomicU64,
    arrived: Notify,
    closed: AtomicBool,
}

impl<T> Default for TransferChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TransferChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferChannel")
            .field("waiters", &self.waiter_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> TransferChannel<T> {
    /// Create an open channel with no consumers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(0),
            arrived: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Hand `item` to the oldest parked consumer.
    ///
    /// Returns the item if nobody is waiting.
    pub fn offer(&self, mut item: T) -> Result<(), T> {
        let mut waiters = self.waiters.lock();
        while let Some(waiter) = waiters.pop_front() {
            match waiter.tx.send(item) {
                Ok(()) => return Ok(()),
                // receiver vanished without deregistering; try the next one
                Err(back) => item = back,
            }
        }
        Err(item)
    }

    /// Like [`offer`](Self::offer), but waits up to `timeout` for a consumer
    /// to arrive if none is parked right now.
    ///
    /// Cancelling the returned future drops `item`; callers that must not
    /// lose it combine [`offer`](Self::offer) with
    /// [`wait_for_consumer`](Self::wait_for_consumer) instead.
    pub async fn offer_timeout(&self, mut item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.offer(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }
            if !self.wait_for_consumer(deadline).await {
                return self.offer(item);
            }
        }
    }

    /// Wait until at least one consumer is parked.
    ///
    /// Returns `false` if `deadline` passes or the channel closes first.
    pub async fn wait_for_consumer(&self, deadline: Instant) -> bool {
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if self.is_closed() {
                return false;
            }
            if self.waiter_count() > 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return false;
            }
        }
    }

    /// Park until a producer offers an item or `timeout` elapses.
    pub async fn poll(&self, timeout: Duration) -> Result<T, PollError> {
        let mut ticket = self.register()?;
        ticket.wait_until(Instant::now() + timeout).await
    }

    /// Join the consumer queue without waiting yet.
    ///
    /// Lets a caller re-check other sources after it became visible to
    /// producers; see [`Ticket`].
    pub fn register(&self) -> Result<Ticket<'_, T>, PollError> {
        let (tx, rx) = oneshot::channel();
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        {
            let mut waiters = self.waiters.lock();
            if self.is_closed() {
                return Err(PollError::Closed);
            }
            waiters.push_back(Waiter { ticket, tx });
        }
        self.arrived.notify_waiters();
        Ok(Ticket {
            channel: self,
            ticket,
            rx,
            done: false,
        })
    }

    /// Number of consumers currently parked.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail every parked consumer with [`PollError::Closed`] and reject new
    /// registrations.
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut waiters = self.waiters.lock();
            self.closed.store(true, Ordering::Release);
            waiters.drain(..).collect()
        };
        // dropping the senders wakes the receivers with an error
        drop(drained);
        self.arrived.notify_waiters();
    }

    fn deregister(&self, ticket: u64) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                waiters.remove(index);
                true
            }
            None => false,
        }
    }
}

/// A registered consumer slot.
///
/// Dropping an unfinished ticket deregisters it; an item that was already
/// delivered to it is dropped with it, so callers that must not lose items
/// call [`cancel`](Ticket::cancel) instead.
#[must_use = "a ticket holds a place in the consumer queue"]
pub struct Ticket<'a, T> {
    channel: &'a TransferChannel<T>,
    ticket: u64,
    rx: oneshot::Receiver<T>,
    done: bool,
}

impl<T> Ticket<'_, T> {
    /// Wait for an item until `deadline`.
    ///
    /// An item delivered at the same instant the deadline fires is still
    /// returned.
    pub async fn wait_until(&mut self, deadline: Instant) -> Result<T, PollError> {
        if self.done {
            return Err(PollError::Closed);
        }
        let outcome = tokio::time::timeout_at(deadline, &mut self.rx).await;
        self.done = true;
        match outcome {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(_)) => Err(PollError::Closed),
            Err(_) => {
                if self.channel.deregister(self.ticket) {
                    Err(PollError::TimedOut)
                } else {
                    // lost the race to a producer: the item is already in the slot
                    self.rx.try_recv().map_err(|_| PollError::Closed)
                }
            }
        }
    }

    /// Leave the queue, returning an item if one was delivered meanwhile.
    pub fn cancel(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        self.done = true;
        if self.channel.deregister(self.ticket) {
            None
        } else {
            self.rx.try_recv().ok()
        }
    }

    /// Whether the ticket has completed or been cancelled.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<T> Drop for Ticket<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            self.channel.deregister(self.ticket);
        }
    }
}

impl<T> fmt::Debug for Ticket<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("ticket", &self.ticket)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn wait_for_waiters<T>(channel: &TransferChannel<T>, n: usize) {
        while channel.waiter_count() < n {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn offer_without_consumer_returns_item() {
        let channel = TransferChannel::new();
        assert_eq!(channel.offer(7u32), Err(7));
    }

    #[tokio::test]
    async fn poll_receives_offered_item() {
        let channel = Arc::new(TransferChannel::new());
        let consumer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.poll(Duration::from_secs(5)).await })
        };
        wait_for_waiters(&channel, 1).await;

        assert!(channel.offer("conn").is_ok());
        assert_eq!(consumer.await.unwrap(), Ok("conn"));
        assert_eq!(channel.waiter_count(), 0);
    }

    #[tokio::test]
    async fn consumers_are_served_in_arrival_order() {
        let channel = TransferChannel::new();
        let mut first = channel.register().unwrap();
        let mut second = channel.register().unwrap();
        let mut third = channel.register().unwrap();

        for item in [1, 2, 3] {
            assert!(channel.offer(item).is_ok());
        }

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(first.wait_until(deadline).await, Ok(1));
        assert_eq!(second.wait_until(deadline).await, Ok(2));
        assert_eq!(third.wait_until(deadline).await, Ok(3));
    }

    #[tokio::test]
    async fn poll_times_out_and_deregisters() {
        let channel = TransferChannel::<u32>::new();
        let started = Instant::now();
        let result = channel.poll(Duration::from_millis(30)).await;

        assert_eq!(result, Err(PollError::TimedOut));
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(channel.waiter_count(), 0);
        assert_eq!(channel.offer(1), Err(1), "timed-out consumer must not receive");
    }

    #[tokio::test]
    async fn cancel_returns_item_delivered_before_cancellation() {
        let channel = TransferChannel::new();
        let mut ticket = channel.register().unwrap();
        assert!(channel.offer(42u32).is_ok());

        assert_eq!(ticket.cancel(), Some(42));
        assert!(ticket.is_done());
    }

    #[tokio::test]
    async fn cancel_without_delivery_leaves_queue() {
        let channel = TransferChannel::<u32>::new();
        let mut ticket = channel.register().unwrap();
        assert_eq!(ticket.cancel(), None);
        assert_eq!(channel.waiter_count(), 0);
    }

    #[tokio::test]
    async fn dropped_ticket_is_skipped_by_producers() {
        let channel = TransferChannel::new();
        drop(channel.register().unwrap());
        let mut live = channel.register().unwrap();

        assert!(channel.offer(5u32).is_ok());
        let deadline = Instant::now() + Duration::from_millis(100);
        assert_eq!(live.wait_until(deadline).await, Ok(5));
    }

    #[tokio::test]
    async fn close_fails_parked_and_future_consumers() {
        let channel = Arc::new(TransferChannel::<u32>::new());
        let consumer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.poll(Duration::from_secs(5)).await })
        };
        wait_for_waiters(&channel, 1).await;

        channel.close();
        assert_eq!(consumer.await.unwrap(), Err(PollError::Closed));
        assert!(matches!(channel.register(), Err(PollError::Closed)));
        assert_eq!(channel.offer(1), Err(1));
    }

    #[tokio::test]
    async fn offer_timeout_waits_for_late_consumer() {
        let channel = Arc::new(TransferChannel::new());
        let producer = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.offer_timeout(9u32, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(channel.poll(Duration::from_secs(1)).await, Ok(9));
        assert_eq!(producer.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn offer_timeout_gives_item_back_when_nobody_comes() {
        let channel = TransferChannel::new();
        let result = channel.offer_timeout(3u32, Duration::from_millis(20)).await;
        assert_eq!(result, Err(3));
    }

    #[tokio::test]
    async fn wait_for_consumer_sees_registration() {
        let channel = Arc::new(TransferChannel::<u32>::new());
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(!channel.wait_for_consumer(deadline).await);

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .wait_for_consumer(Instant::now() + Duration::from_secs(2))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ticket = channel.register().unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_receive_each_item_once() {
        const CONSUMERS: usize = 32;
        let channel = Arc::new(TransferChannel::new());

        let mut consumers = Vec::with_capacity(CONSUMERS);
        for _ in 0..CONSUMERS {
            let channel = Arc::clone(&channel);
            consumers.push(tokio::spawn(async move {
                channel.poll(Duration::from_secs(10)).await
            }));
        }

        let mut next = 0usize;
        while next < CONSUMERS {
            match channel.offer(next) {
                Ok(()) => next += 1,
                Err(_) => tokio::task::yield_now().await,
            }
        }

        let mut received = Vec::with_capacity(CONSUMERS);
        for consumer in consumers {
            received.push(consumer.await.unwrap().expect("every consumer gets one item"));
        }
        received.sort_unstable();
        assert_eq!(received, (0..CONSUMERS).collect::<Vec<_>>());
    }
}
