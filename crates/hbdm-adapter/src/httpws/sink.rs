//! Bounded per-symbol delivery queue
//!
//! `EventSink` is a cloneable handle to one bounded queue. The receive loop
//! pushes with the connection's `DeliveryPolicy`; consumers pop with
//! [`EventSink::recv`]. Clones share the queue, so a repeated subscribe for
//! the same symbol hands out the same channel.
//!
//! Closing wakes every waiter on both sides: consumers drain what is left
//! and then see `None`, a producer blocked on a full queue gets
//! `Delivery::Closed`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use tokio::sync::Notify;

use crate::httpws::config::DeliveryPolicy;

/// Outcome of one push
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Queued without loss
    Delivered,
    /// Queued after evicting the oldest event
    DroppedOldest,
    /// Not queued: the bounded wait expired
    TimedOut,
    /// Not queued: the sink is closed
    Closed,
}

struct Shared<T> {
    queue: ArrayQueue<T>,
    closed: AtomicBool,
    dropped: AtomicU64,
    item_ready: Notify,
    space_ready: Notify,
}

/// Read side of a subscription, shared by every clone
pub struct EventSink<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> fmt::Debug for EventSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<T> EventSink<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                // ArrayQueue panics on zero capacity
                queue: ArrayQueue::new(capacity.max(1)),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            }),
        }
    }

    /// Wait for the next event; `None` once closed and drained
    pub async fn recv(&self) -> Option<T> {
        loop {
            let notified = self.shared.item_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    /// Pop an event if one is queued
    pub fn try_recv(&self) -> Option<T> {
        let item = self.shared.queue.pop();
        if item.is_some() {
            self.shared.space_ready.notify_one();
        }
        item
    }

    /// Whether both handles refer to the same queue
    pub fn same_channel(&self, other: &EventSink<T>) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Events queued right now
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.queue.capacity()
    }

    /// Events discarded by the delivery policy so far
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Push under `policy`
    pub(crate) async fn deliver(&self, item: T, policy: DeliveryPolicy) -> Delivery {
        match policy {
            DeliveryPolicy::Block => self.push_blocking(item).await,
            DeliveryPolicy::BlockFor(wait) => self.push_within(item, wait).await,
            DeliveryPolicy::DropOldest => self.push_evicting(item),
        }
    }

    async fn push_within(&self, item: T, wait: Duration) -> Delivery {
        match tokio::time::timeout(wait, self.push_blocking(item)).await {
            Ok(delivery) => delivery,
            Err(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::TimedOut
            }
        }
    }

    async fn push_blocking(&self, mut item: T) -> Delivery {
        loop {
            let notified = self.shared.space_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Delivery::Closed;
            }
            match self.shared.queue.push(item) {
                Ok(()) => {
                    self.shared.item_ready.notify_one();
                    return Delivery::Delivered;
                }
                Err(rejected) => item = rejected,
            }

            notified.await;
        }
    }

    fn push_evicting(&self, item: T) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }

        let evicted = self.shared.queue.force_push(item);
        self.shared.item_ready.notify_one();

        match evicted {
            Some(_) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::DroppedOldest
            }
            None => Delivery::Delivered,
        }
    }

    /// Push without waiting; fails when full or closed
    pub(crate) fn try_push(&self, item: T) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        if self.shared.queue.push(item).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::TimedOut;
        }
        self.shared.item_ready.notify_one();
        Delivery::Delivered
    }

    /// Close the queue and wake every waiter
    pub(crate) fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.item_ready.notify_waiters();
            self.shared.space_ready.notify_waiters();
        }
    }
}
