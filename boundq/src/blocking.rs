//! Bounded queue guarded by a mutex and two condition variables.
//!
//! Producers sleep on `not_full`, consumers on `not_empty`. Any number of
//! threads may push and pop concurrently; one coarse lock covers the slot
//! array and both cursors. Waiting threads are suspended by the OS, so this
//! variant is the right default when waits may be long or cores are scarce.
//!
//! # Example
//!
//! ```
//! use boundq::{BlockingQueue, Bounded, Pop, Push};
//!
//! let queue = BlockingQueue::with_capacity(2);
//! queue.push(1).unwrap();
//! queue.close();
//!
//! assert!(queue.push(2).is_err());
//! assert_eq!(queue.pop(), Some(1));
//! assert_eq!(queue.pop(), None);
//! ```

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use minstant::Instant;

use crate::config::{DEFAULT_CAPACITY, QueueConfig};
use crate::error::{CapacityError, ClosedQueueError, TryPopError, TryPushError};
use crate::queue::{Bounded, Pop, Push, Timeout};
use crate::trace::debug;

/// Ring state protected by the queue's mutex.
struct State<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    len: usize,
    closed: bool,
}

impl<T> State<T> {
    fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    fn insert(&mut self, value: T) {
        debug_assert!(self.slots[self.tail].is_none());
        self.slots[self.tail] = Some(value);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len += 1;
    }

    fn remove(&mut self) -> Option<T> {
        let value = self.slots[self.head].take();
        debug_assert!(value.is_some());
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        value
    }
}

/// Mutex/condition-variable bounded MPMC queue.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BlockingQueue<T> {
    /// Creates an empty queue with `capacity` slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");
        Self {
            state: Mutex::new(State {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                len: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
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

    /// Builds a queue from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] if the configured capacity is 0.
    pub fn from_config(config: &QueueConfig) -> Result<Self, CapacityError> {
        Self::try_with_capacity(config.capacity)
    }

    // A panic while holding the lock cannot leave `State` half-updated: every
    // mutation completes before user code runs, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, cond: &Condvar, guard: MutexGuard<'a, State<T>>) -> MutexGuard<'a, State<T>> {
        cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl<T> fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BlockingQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.len)
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Bounded for BlockingQueue<T> {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.lock().len
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closes the queue and wakes every waiting producer and consumer.
    fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(capacity = self.capacity, len = state.len, "blocking queue closed");
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl<T> Push<T> for BlockingQueue<T> {
    fn push(&self, value: T) -> Result<(), ClosedQueueError<T>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(ClosedQueueError(value));
            }
            if !state.is_full() {
                break;
            }
            state = self.wait(&self.not_full, state);
        }

        state.insert(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(TryPushError::Closed(value));
        }
        if state.is_full() {
            return Err(TryPushError::Full(value));
        }

        state.insert(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }
}

impl<T> Pop<T> for BlockingQueue<T> {
    fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        while state.len == 0 && !state.closed {
            state = self.wait(&self.not_empty, state);
        }
        if state.len == 0 {
            return None;
        }

        let value = state.remove();
        drop(state);
        self.not_full.notify_one();
        value
    }

    fn try_pop(&self) -> Result<T, TryPopError> {
        let mut state = self.lock();
        if state.len == 0 {
            return Err(if state.closed {
                TryPopError::Closed
            } else {
                TryPopError::Empty
            });
        }

        let value = state.remove().ok_or(TryPopError::Empty)?;
        drop(state);
        self.not_full.notify_one();
        Ok(value)
    }

    /// Waits on the condition variable until a value arrives, the queue is
    /// closed and drained, or the deadline passes.
    fn pop_timeout(&self, timeout: Timeout) -> Result<T, TryPopError> {
        let deadline = timeout.deadline();
        let mut state = self.lock();
        while state.len == 0 && !state.closed {
            state = match deadline {
                None => self.wait(&self.not_empty, state),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(TryPopError::Empty);
                    }
                    self.not_empty
                        .wait_timeout(state, dl - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        if state.len == 0 {
            return Err(TryPopError::Closed);
        }

        let value = state.remove().ok_or(TryPopError::Empty)?;
        drop(state);
        self.not_full.notify_one();
        Ok(value)
    }
}
