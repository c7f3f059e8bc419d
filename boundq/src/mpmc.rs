//! Lock-free MPMC (multi-producer multi-consumer) bounded queue.
//!
//! # Algorithm
//!
//! Every slot carries a version that says which logical position currently
//! owns it (see [`storage`](crate::storage) for the encoding):
//!
//! - Initial: slot `i` is free for position `i`
//! - Producer reserves position `pos` on the tail once its slot is free for
//!   `pos`, writes, then publishes "written for `pos`"
//! - Consumer reserves `pos` on the head with `fetch_add`, waits for "written
//!   for `pos`", reads, then republishes "free for `pos + capacity`"
//!
//! A consumer only reads once it sees the exact version for its own
//! position, so consumers that raced ahead on the head (even a full lap
//! ahead) can never take a value that belongs to someone else. Positions
//! only recur in a slot one lap later, which rules out ABA on the version.
//!
//! # Close
//!
//! Reserving a tail position and observing the closed mark are one atomic
//! step, and a producer only reserves a slot that is already writable. So a
//! push that got a position before the close always finishes promptly, and
//! a consumer whose position lies past the close seal knows no value will
//! ever arrive and returns `None`.
//!
//! # Ordering
//!
//! Positions are handed out in order, so consumers see values in logical
//! push order per position. Producers racing for adjacent positions may
//! finish their writes in either order.
//!
//! Waiting is a spin with backoff that yields to the scheduler; it trades CPU
//! for latency and suits short waits on machines with spare cores.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::config::{DEFAULT_CAPACITY, QueueConfig};
use crate::error::{CapacityError, ClosedQueueError, TryPopError, TryPushError};
use crate::queue::{Bounded, Pop, Push};
use crate::storage::{HeadCursor, Slots, TailCursor, free_for, holds_value, written_for};
use crate::trace::debug;

/// Bounded lock-free MPMC queue with per-slot versions.
///
/// Share it between threads with [`Arc`](std::sync::Arc); every method takes
/// `&self`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use boundq::{Bounded, MpmcQueue, Pop, Push};
///
/// let queue = Arc::new(MpmcQueue::with_capacity(8));
///
/// let producers: Vec<_> = (0..2)
///     .map(|p| {
///         let q = Arc::clone(&queue);
///         thread::spawn(move || {
///             for i in 0..100 {
///                 q.push(p * 100 + i).unwrap();
///             }
///         })
///     })
///     .collect();
///
/// let q = Arc::clone(&queue);
/// let consumer = thread::spawn(move || q.drain().count());
///
/// for p in producers {
///     p.join().unwrap();
/// }
/// queue.close();
/// assert_eq!(consumer.join().unwrap(), 200);
/// ```
pub struct MpmcQueue<T> {
    slots: Slots<T, AtomicUsize>,
    head: HeadCursor,
    tail: TailCursor,
}

impl<T> MpmcQueue<T> {
    /// Creates an empty queue with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slots::new(capacity, |i| AtomicUsize::new(free_for(i))),
            head: HeadCursor::new(),
            tail: TailCursor::new(),
        }
    }

    /// Fallible variant of [`with_capacity`](Self::with_capacity).
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] if `capacity` is 0.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, CapacityError> {
        QueueConfig::with_capacity(capacity).validate()?;
        Ok(Self::with_capacity(capacity))
    }

    /// Builds a queue from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] if the configured capacity is 0.
    pub fn from_config(config: &QueueConfig) -> Result<Self, CapacityError> {
        Self::try_with_capacity(config.capacity)
    }

    /// Reserves the tail and writes `value` without waiting for space.
    ///
    /// Losing the tail race to another producer is retried internally; only
    /// a slot still owned by the previous lap reports `Full`.
    fn try_push_once(&self, value: T) -> Result<(), TryPushError<T>> {
        loop {
            let Some(pos) = self.tail.open_position() else {
                return Err(TryPushError::Closed(value));
            };
            let slot = self.slots.at(pos);
            let version = slot.state.load(Ordering::Acquire);

            if version == free_for(pos) {
                if self.tail.try_advance(pos) {
                    // SAFETY: the slot is free for `pos` and the tail CAS made
                    // this producer the only owner of `pos`.
                    unsafe { slot.value.write(value) };
                    slot.state.store(written_for(pos), Ordering::Release);
                    return Ok(());
                }
                // Another producer took `pos`, or the queue closed.
                continue;
            }

            if self.tail.open_position() == Some(pos) {
                // The slot still belongs to the previous lap.
                return Err(TryPushError::Full(value));
            }
            // Tail moved on; retry with the fresh position.
        }
    }
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T> fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Bounded for MpmcQueue<T> {
    fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Advisory length from relaxed loads of both cursors.
    ///
    /// Consumers waiting on an empty queue have already advanced the head, so
    /// the raw difference can be negative; it is clamped to `0..=capacity`.
    fn len(&self) -> usize {
        let head = self.head.load();
        let tail = self.tail.load();
        tail.saturating_sub(head).min(self.slots.capacity())
    }

    fn is_closed(&self) -> bool {
        self.tail.is_closed()
    }

    fn close(&self) {
        if self.tail.close() {
            debug!(capacity = self.capacity(), len = self.len(), "mpmc queue closed");
        }
    }
}

impl<T> Push<T> for MpmcQueue<T> {
    /// Enqueues `value`, spinning while the queue is full.
    fn push(&self, mut value: T) -> Result<(), ClosedQueueError<T>> {
        let backoff = Backoff::new();
        loop {
            match self.try_push_once(value) {
                Ok(()) => return Ok(()),
                Err(TryPushError::Closed(returned)) => return Err(ClosedQueueError(returned)),
                Err(TryPushError::Full(returned)) => {
                    value = returned;
                    backoff.snooze();
                }
            }
        }
    }

    fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        self.try_push_once(value)
    }
}

impl<T> Pop<T> for MpmcQueue<T> {
    /// Reserves the next head position and spins until its value arrives or
    /// the close seal shows it never will.
    fn pop(&self) -> Option<T> {
        let pos = self.head.reserve();
        let slot = self.slots.at(pos);
        let backoff = Backoff::new();
        loop {
            if slot.state.load(Ordering::Acquire) == written_for(pos) {
                // SAFETY: the head reservation made this consumer the only
                // owner of `pos`, and the version proves the value is there.
                let value = unsafe { slot.value.take() };
                slot.state
                    .store(free_for(pos.wrapping_add(self.slots.capacity())), Ordering::Release);
                return Some(value);
            }
            if self.tail.is_sealed(pos) {
                return None;
            }
            backoff.snooze();
        }
    }

    fn try_pop(&self) -> Result<T, TryPopError> {
        loop {
            let pos = self.head.load();
            let slot = self.slots.at(pos);

            if slot.state.load(Ordering::Acquire) == written_for(pos) {
                if self.head.try_advance(pos) {
                    // SAFETY: as in `pop`; the head CAS claimed `pos`.
                    let value = unsafe { slot.value.take() };
                    slot.state
                        .store(free_for(pos.wrapping_add(self.slots.capacity())), Ordering::Release);
                    return Ok(value);
                }
                continue;
            }

            if self.head.load() != pos {
                continue;
            }
            return Err(if self.tail.is_sealed(pos) {
                TryPopError::Closed
            } else {
                TryPopError::Empty
            });
        }
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            if holds_value(*slot.state.get_mut()) {
                // SAFETY: an odd version marks a written, unconsumed value.
                unsafe { slot.value.drop_value() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::queue::Timeout;

    #[test]
    fn test_single_producer_single_consumer() {
        let queue = MpmcQueue::with_capacity(8);

        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.try_pop(), Err(TryPopError::Empty));
    }

    #[test]
    fn test_queue_full() {
        let queue = MpmcQueue::with_capacity(4);

        for i in 1..=4 {
            assert!(queue.try_push(i).is_ok());
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.try_push(5), Err(TryPushError::Full(5)));

        assert_eq!(queue.pop(), Some(1));
        assert!(queue.try_push(5).is_ok());
        assert_eq!(queue.try_push(6), Err(TryPushError::Full(6)));
    }

    #[test]
    fn test_wrap_around() {
        let queue = MpmcQueue::with_capacity(8);

        for round in 0..10 {
            for i in 0..8 {
                queue.push(round * 100 + i).unwrap();
            }
            for i in 0..8 {
                assert_eq!(queue.try_pop(), Ok(round * 100 + i));
            }
        }
    }

    #[test]
    fn test_capacity_one_single_thread() {
        let queue = MpmcQueue::with_capacity(1);

        for i in 0..10 {
            queue.push(i).unwrap();
            assert_eq!(queue.try_push(99), Err(TryPushError::Full(99)));
            assert_eq!(queue.pop(), Some(i));
        }
    }

    #[test]
    fn test_close_drains_then_none() {
        let queue = MpmcQueue::with_capacity(4);
        queue.push("a").unwrap();
        queue.push("b").unwrap();
        queue.close();

        assert_eq!(queue.push("c"), Err(ClosedQueueError("c")));
        assert_eq!(queue.try_push("d"), Err(TryPushError::Closed("d")));
        assert_eq!(queue.pop(), Some("a"));
        assert_eq!(queue.try_pop(), Ok("b"));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.try_pop(), Err(TryPopError::Closed));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_close_releases_waiting_consumers() {
        let queue = Arc::new(MpmcQueue::<u32>::with_capacity(2));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&queue);
                thread::spawn(move || q.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for w in waiters {
            assert_eq!(w.join().unwrap(), None);
        }
    }

    #[test]
    fn test_close_releases_waiting_producer() {
        let queue = Arc::new(MpmcQueue::with_capacity(1));
        queue.push(0u32).unwrap();

        let q = Arc::clone(&queue);
        let producer = thread::spawn(move || q.push(1));

        thread::sleep(Duration::from_millis(50));
        queue.close();

        assert_eq!(producer.join().unwrap(), Err(ClosedQueueError(1)));
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_timeout() {
        let queue = MpmcQueue::<u8>::with_capacity(2);
        assert_eq!(
            queue.pop_timeout(Duration::from_millis(10).into()),
            Err(TryPopError::Empty)
        );
        queue.push(3).unwrap();
        assert_eq!(queue.pop_timeout(Timeout::Infinite), Ok(3));
        queue.close();
        assert_eq!(queue.pop_timeout(Timeout::Infinite), Err(TryPopError::Closed));
    }

    #[test]
    fn test_multiple_producers_consumers() {
        let queue = Arc::new(MpmcQueue::with_capacity(16));
        let producers = 4u64;
        let per_producer = 1000u64;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        q.push(p * per_producer + i).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&queue);
                thread::spawn(move || q.drain().collect::<Vec<_>>())
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        queue.close();

        let mut seen = HashSet::new();
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(seen.insert(v), "value {v} delivered twice");
            }
        }
        assert_eq!(seen.len(), (producers * per_producer) as usize);
    }

    #[test]
    fn test_drop_releases_pending_values() {
        let marker = Arc::new(());
        {
            let queue = MpmcQueue::with_capacity(4);
            for _ in 0..3 {
                queue.push(Arc::clone(&marker)).unwrap();
            }
            drop(queue.pop());
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_try_with_capacity() {
        assert!(matches!(
            MpmcQueue::<u8>::try_with_capacity(0),
            Err(CapacityError)
        ));
        assert_eq!(MpmcQueue::<u8>::default().capacity(), DEFAULT_CAPACITY);
    }
}
