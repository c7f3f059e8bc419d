//! Lock-free SPSC (single-producer single-consumer) bounded queue.
//!
//! [`channel`] splits a heap-allocated ring into a [`Producer`] and a
//! [`Consumer`]. Each slot carries a `ready` flag: `true` means the producer
//! may write it, `false` means it holds a value for the consumer. Because one
//! thread owns each end, the cursors need no compare-and-swap to hand out
//! slots; only the flag is published with release/acquire ordering.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (exactly one per queue)
//! - [`Consumer`] - Read end (exactly one per queue)
//! - Waiting is a spin with backoff (yielding to the scheduler after a few
//!   rounds). That trades CPU for latency and suits short waits on machines
//!   with spare cores; prefer [`BlockingQueue`](crate::BlockingQueue) otherwise.
//!
//! # Example
//!
//! ```
//! use boundq::{Bounded, Pop, Push, spsc};
//!
//! let (producer, consumer) = spsc::channel::<u64>(1024);
//!
//! let handle = std::thread::spawn(move || {
//!     for i in 0..10 {
//!         producer.push(i).unwrap();
//!     }
//!     // Dropping the producer closes the queue.
//! });
//!
//! let received: Vec<u64> = consumer.drain().collect();
//! handle.join().unwrap();
//! assert_eq!(received, (0..10).collect::<Vec<_>>());
//! ```

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_utils::Backoff;

use crate::config::QueueConfig;
use crate::error::{CapacityError, ClosedQueueError, TryPopError, TryPushError};
use crate::queue::{Bounded, Pop, Push};
use crate::storage::{HeadCursor, Slots, TailCursor};
use crate::trace::debug;

/// Shared ring: slots with ready flags plus both cursors.
///
/// # Safety
///
/// `push`/`try_push` must only be called by the single producer and
/// `pop`/`try_pop` only by the single consumer. [`Producer`] and [`Consumer`]
/// uphold this by being `Send` but neither `Sync` nor `Clone`.
struct Ring<T> {
    slots: Slots<T, AtomicBool>,
    head: HeadCursor,
    tail: TailCursor,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Slots::new(capacity, |_| AtomicBool::new(true)),
            head: HeadCursor::new(),
            tail: TailCursor::new(),
        }
    }

    /// # Safety
    ///
    /// Caller is the only producer.
    unsafe fn push(&self, value: T) -> Result<(), ClosedQueueError<T>> {
        let backoff = Backoff::new();
        loop {
            let Some(pos) = self.tail.open_position() else {
                return Err(ClosedQueueError(value));
            };
            let slot = self.slots.at(pos);

            // Wait for the consumer to hand the slot back before reserving it,
            // so a reserved position is always filled.
            if !slot.state.load(Ordering::Acquire) {
                backoff.snooze();
                continue;
            }

            // Only a concurrent close can move the tail under a single producer.
            if !self.tail.try_advance(pos) {
                continue;
            }

            // SAFETY: `ready == true` and the reservation give this thread the
            // write token; the consumer won't read until the flag flips.
            unsafe { slot.value.write(value) };
            slot.state.store(false, Ordering::Release);
            return Ok(());
        }
    }

    /// # Safety
    ///
    /// Caller is the only producer.
    unsafe fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let Some(pos) = self.tail.open_position() else {
            return Err(TryPushError::Closed(value));
        };
        let slot = self.slots.at(pos);
        if !slot.state.load(Ordering::Acquire) {
            return Err(TryPushError::Full(value));
        }
        if !self.tail.try_advance(pos) {
            return Err(TryPushError::Closed(value));
        }

        // SAFETY: as in `push`.
        unsafe { slot.value.write(value) };
        slot.state.store(false, Ordering::Release);
        Ok(())
    }

    /// # Safety
    ///
    /// Caller is the only consumer.
    unsafe fn pop(&self) -> Option<T> {
        let pos = self.head.reserve();
        let slot = self.slots.at(pos);
        let backoff = Backoff::new();
        loop {
            if !slot.state.load(Ordering::Acquire) {
                // SAFETY: `ready == false` means the producer published the
                // value for `pos` (positions below it were consumed in order,
                // positions above it cannot be written yet).
                let value = unsafe { slot.value.take() };
                slot.state.store(true, Ordering::Release);
                return Some(value);
            }
            if self.tail.is_sealed(pos) {
                return None;
            }
            backoff.snooze();
        }
    }

    /// # Safety
    ///
    /// Caller is the only consumer.
    unsafe fn try_pop(&self) -> Result<T, TryPopError> {
        let pos = self.head.load();
        let slot = self.slots.at(pos);
        if !slot.state.load(Ordering::Acquire) {
            let advanced = self.head.try_advance(pos);
            debug_assert!(advanced, "SPSC head moved by another consumer");
            // SAFETY: as in `pop`.
            let value = unsafe { slot.value.take() };
            slot.state.store(true, Ordering::Release);
            return Ok(value);
        }
        if self.tail.is_sealed(pos) {
            Err(TryPopError::Closed)
        } else {
            Err(TryPopError::Empty)
        }
    }

    fn len(&self) -> usize {
        let head = self.head.load();
        let tail = self.tail.load();
        tail.saturating_sub(head).min(self.slots.capacity())
    }

    fn close(&self) {
        if self.tail.close() {
            debug!(capacity = self.slots.capacity(), len = self.len(), "spsc queue closed");
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        for slot in self.slots.iter_mut() {
            if !*slot.state.get_mut() {
                // SAFETY: `ready == false` marks a written, unconsumed value.
                unsafe { slot.value.drop_value() };
            }
        }
    }
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`] or [`Clone`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Producer` (no concurrent `push()`)
///
/// Dropping the producer closes the queue.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// Same thread-safety rules as [`Producer`]. Dropping the consumer closes
/// the queue, so a producer waiting for space fails instead of spinning.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Creates an SPSC queue with `capacity` slots.
///
/// Returns a `(Producer, Consumer)` pair that can be moved to different
/// threads.
///
/// # Panics
///
/// Panics if `capacity` is 0.
///
/// # Example
///
/// ```
/// use boundq::{Pop, Push, spsc};
///
/// let (tx, rx) = spsc::channel::<String>(16);
///
/// tx.push("hello".to_string()).unwrap();
/// assert_eq!(rx.pop(), Some("hello".to_string()));
/// ```
#[must_use]
pub fn channel<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(Ring::new(capacity));

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };

    (producer, consumer)
}

/// Fallible variant of [`channel`].
///
/// # Errors
///
/// Returns [`CapacityError`] if `capacity` is 0.
pub fn try_channel<T>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
    QueueConfig::with_capacity(capacity).validate()?;
    Ok(channel(capacity))
}

/// Builds a channel from a configuration.
///
/// # Errors
///
/// Returns [`CapacityError`] if the configured capacity is 0.
pub fn channel_from_config<T>(
    config: &QueueConfig,
) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
    try_channel(config.capacity)
}

impl<T> Bounded for Producer<T> {
    fn capacity(&self) -> usize {
        self.ring.slots.capacity()
    }

    fn len(&self) -> usize {
        self.ring.len()
    }

    fn is_closed(&self) -> bool {
        self.ring.tail.is_closed()
    }

    fn close(&self) {
        self.ring.close();
    }
}

impl<T> Push<T> for Producer<T> {
    /// Spins until the next slot is free, then publishes `value`.
    #[inline]
    fn push(&self, value: T) -> Result<(), ClosedQueueError<T>> {
        // SAFETY: Producer is unique and !Sync, so this is the only producer.
        unsafe { self.ring.push(value) }
    }

    #[inline]
    fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        // SAFETY: as in `push`.
        unsafe { self.ring.try_push(value) }
    }
}

impl<T> Drop for Producer<T> {
    fn drop(&mut self) {
        self.ring.close();
    }
}

impl<T> Bounded for Consumer<T> {
    fn capacity(&self) -> usize {
        self.ring.slots.capacity()
    }

    fn len(&self) -> usize {
        self.ring.len()
    }

    fn is_closed(&self) -> bool {
        self.ring.tail.is_closed()
    }

    fn close(&self) {
        self.ring.close();
    }
}

impl<T> Pop<T> for Consumer<T> {
    /// Spins until the next value is published or the queue is closed and
    /// drained.
    #[inline]
    fn pop(&self) -> Option<T> {
        // SAFETY: Consumer is unique and !Sync, so this is the only consumer.
        unsafe { self.ring.pop() }
    }

    #[inline]
    fn try_pop(&self) -> Result<T, TryPopError> {
        // SAFETY: as in `pop`.
        unsafe { self.ring.try_pop() }
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.ring.close();
    }
}
