//! Bounded MPMC queue with op-based blocking
//!
//! All storage is preallocated at construction: `capacity + producers_max`
//! item slots and one waiter entry per allowed producer and consumer.
//! A put onto a full queue still stores the item (in a spare slot) and
//! parks only the producer's op; the next successful get completes the
//! longest-waiting producer.
//!
//! The lock is part of the type: every operation goes through a
//! `QueueGuard`, so a sequence of calls (peek then take, drain then end)
//! can be made atomic by holding one guard.
//!
//! Op callbacks fired by the queue run while the guard is held and must
//! not call back into the same queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::config::QueueConfig;
use super::errors::{QueueError, QueueResult};
use crate::observability::{log_event_with_fields, Event};
use crate::op::{OpError, OpHandle};

/// Destination of a `get`
///
/// The slot is filled before the consumer's op completes, so a consumer
/// that observes its op DONE with an empty slot knows the queue was
/// closed and drained.
pub struct QueueSlot<T> {
    cell: Arc<Mutex<Option<T>>>,
}

impl<T> QueueSlot<T> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(None)),
        }
    }

    /// Takes the delivered item
    pub fn take(&self) -> Option<T> {
        self.lock().take()
    }

    /// Whether an item was delivered and not yet taken
    pub fn is_filled(&self) -> bool {
        self.lock().is_some()
    }

    fn fill(&self, item: T) {
        let mut cell = self.lock();
        debug_assert!(cell.is_none(), "queue slot overwritten");
        *cell = Some(item);
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for QueueSlot<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> Default for QueueSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for QueueSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSlot")
            .field("filled", &self.is_filled())
            .finish()
    }
}

struct GetWaiter<T> {
    op: OpHandle,
    slot: QueueSlot<T>,
}

struct QueueInner<T> {
    config: QueueConfig,
    items: VecDeque<T>,
    put_waiters: VecDeque<OpHandle>,
    get_waiters: VecDeque<GetWaiter<T>>,
    closed: bool,
    enqueued: u64,
    dequeued: u64,
}

impl<T> QueueInner<T> {
    fn check_invariants(&self) {
        debug_assert!(self.enqueued >= self.dequeued);
        debug_assert_eq!((self.enqueued - self.dequeued) as usize, self.items.len());
        debug_assert!(self.items.len() <= self.config.slots());
        debug_assert_eq!(
            self.put_waiters.len(),
            self.items.len().saturating_sub(self.config.capacity)
        );
        debug_assert!(self.get_waiters.is_empty() || self.items.is_empty());
    }

    fn remaining(&self) -> u64 {
        self.enqueued - self.dequeued
    }
}

/// Completes a parked waiter
///
/// A waiter whose owner dropped its op while parked has already been
/// driven through DONE; there is nothing left to complete.
fn complete_waiter(op: &OpHandle) -> QueueResult<()> {
    match op.done() {
        Ok(()) | Err(OpError::StaleHandle(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Bounded multi-producer multi-consumer queue
pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    finalized: bool,
}

impl<T> BoundedQueue<T> {
    /// Create a queue, preallocating all item and waiter storage
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        config.validate()?;

        let mut items = VecDeque::new();
        items
            .try_reserve_exact(config.slots())
            .map_err(|_| QueueError::OutOfMemory {
                slots: config.slots(),
            })?;
        let mut put_waiters = VecDeque::new();
        put_waiters
            .try_reserve_exact(config.producers_max)
            .map_err(|_| QueueError::OutOfMemory {
                slots: config.producers_max,
            })?;
        let mut get_waiters = VecDeque::new();
        get_waiters
            .try_reserve_exact(config.consumers_max)
            .map_err(|_| QueueError::OutOfMemory {
                slots: config.consumers_max,
            })?;

        Ok(Self {
            inner: Mutex::new(QueueInner {
                config,
                items,
                put_waiters,
                get_waiters,
                closed: false,
                enqueued: 0,
                dequeued: 0,
            }),
            finalized: false,
        })
    }

    /// Takes the queue lock
    pub fn lock(&self) -> QueueGuard<'_, T> {
        QueueGuard {
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Configuration the queue was built with
    pub fn config(&self) -> QueueConfig {
        self.lock().inner.config
    }

    /// Number of resident items
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no item is resident
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Finalizes the queue; every enqueued item must have been dequeued
    pub fn fini(mut self) -> QueueResult<()> {
        self.finalized = true;
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.enqueued != inner.dequeued {
            let remaining = inner.remaining();
            log_event_with_fields(
                Event::QueueFiniNotDrained,
                &[
                    ("dequeued", &inner.dequeued.to_string()),
                    ("enqueued", &inner.enqueued.to_string()),
                ],
            );
            return Err(QueueError::NotDrained { remaining });
        }
        Ok(())
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.enqueued != inner.dequeued {
            log_event_with_fields(
                Event::QueueFiniNotDrained,
                &[
                    ("dequeued", &inner.dequeued.to_string()),
                    ("enqueued", &inner.enqueued.to_string()),
                ],
            );
        }
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.lock();
        f.debug_struct("BoundedQueue")
            .field("config", &guard.inner.config)
            .field("len", &guard.len())
            .field("closed", &guard.is_closed())
            .finish()
    }
}

/// Locked access to a `BoundedQueue`
pub struct QueueGuard<'a, T> {
    inner: MutexGuard<'a, QueueInner<T>>,
}

impl<T> QueueGuard<'_, T> {
    /// Stores `item` and activates `op`
    ///
    /// `op` completes immediately unless the queue was full, in which
    /// case it stays ACTIVE until a get frees room. A parked consumer is
    /// handed the oldest item directly.
    pub fn put(&mut self, op: &OpHandle, item: T) -> QueueResult<()> {
        let q = &mut *self.inner;
        if q.closed {
            return Err(QueueError::Closed);
        }
        let was_full = q.items.len() >= q.config.capacity;
        if was_full && q.put_waiters.len() >= q.config.producers_max {
            return Err(QueueError::TooManyProducers(q.config.producers_max));
        }
        op.active()?;

        q.items.push_back(item);
        q.enqueued += 1;
        if was_full {
            q.put_waiters.push_back(op.clone());
        }
        q.check_invariants();
        if !was_full {
            op.done()?;
        }

        if let Some(waiter) = q.get_waiters.pop_front() {
            if let Some(item) = q.items.pop_front() {
                q.dequeued += 1;
                waiter.slot.fill(item);
            }
            q.check_invariants();
            complete_waiter(&waiter.op)?;
        }
        Ok(())
    }

    /// Activates `op` and delivers the oldest item into `slot`
    ///
    /// - item available, nobody parked: delivered, `op` completes
    /// - queue empty and closed: `op` completes, `slot` stays empty
    /// - otherwise: `op` parks until a put or `end`
    pub fn get(&mut self, op: &OpHandle, slot: &QueueSlot<T>) -> QueueResult<()> {
        let q = &mut *self.inner;
        let closed_empty = q.items.is_empty() && q.closed;
        let park = !closed_empty && (q.items.is_empty() || !q.get_waiters.is_empty());
        if park && q.get_waiters.len() >= q.config.consumers_max {
            return Err(QueueError::TooManyConsumers(q.config.consumers_max));
        }
        op.active()?;

        if closed_empty {
            op.done()?;
            return Ok(());
        }
        if park {
            q.get_waiters.push_back(GetWaiter {
                op: op.clone(),
                slot: slot.clone(),
            });
            return Ok(());
        }

        if let Some(item) = q.items.pop_front() {
            q.dequeued += 1;
            slot.fill(item);
        }
        op.done()?;
        self.release_producer()
    }

    /// Oldest item, unless the queue is empty or a consumer is parked
    pub fn peek(&self) -> Option<&T> {
        if !self.inner.get_waiters.is_empty() {
            return None;
        }
        self.inner.items.front()
    }

    /// Takes the oldest item without an op
    ///
    /// Follows the same rules as `peek` and frees a parked producer.
    pub fn try_get(&mut self) -> QueueResult<Option<T>> {
        if self.peek().is_none() {
            return Ok(None);
        }
        let item = self.inner.items.pop_front();
        self.inner.dequeued += 1;
        self.release_producer()?;
        Ok(item)
    }

    /// Takes every resident item, freeing all parked producers
    pub fn drain(&mut self) -> QueueResult<Vec<T>> {
        let mut drained = Vec::with_capacity(self.len());
        while let Some(item) = self.try_get()? {
            drained.push(item);
        }
        Ok(drained)
    }

    /// Closes the queue
    ///
    /// Parked consumers complete with an empty slot. Ending a closed
    /// queue does nothing.
    pub fn end(&mut self) -> QueueResult<()> {
        let q = &mut *self.inner;
        if q.closed {
            return Ok(());
        }
        debug_assert!(
            q.get_waiters.is_empty() || q.items.is_empty(),
            "closing over a parked consumer with items resident"
        );
        q.closed = true;
        while let Some(waiter) = q.get_waiters.pop_front() {
            complete_waiter(&waiter.op)?;
        }
        Ok(())
    }

    fn release_producer(&mut self) -> QueueResult<()> {
        let q = &mut *self.inner;
        let waiter = q.put_waiters.pop_front();
        q.check_invariants();
        match waiter {
            Some(op) => complete_waiter(&op),
            None => Ok(()),
        }
    }

    /// Number of resident items
    pub fn len(&self) -> usize {
        self.inner.items.len()
    }

    /// Whether no item is resident
    pub fn is_empty(&self) -> bool {
        self.inner.items.is_empty()
    }

    /// Whether `end` was called
    pub fn is_closed(&self) -> bool {
        self.inner.closed
    }

    /// Items accepted so far
    pub fn enqueued(&self) -> u64 {
        self.inner.enqueued
    }

    /// Items delivered so far
    pub fn dequeued(&self) -> u64 {
        self.inner.dequeued
    }

    /// Producers parked on a full queue
    pub fn waiting_producers(&self) -> usize {
        self.inner.put_waiters.len()
    }

    /// Consumers parked on an empty queue
    pub fn waiting_consumers(&self) -> usize {
        self.inner.get_waiters.len()
    }
}
