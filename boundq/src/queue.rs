//! The contract shared by every queue in the crate.
//!
//! Producers depend on [`Push`], consumers on [`Pop`]; both extend
//! [`Bounded`], which carries the capacity and the close protocol. Code that
//! only moves values between threads (the [`pool`](crate::pool) and
//! [`pipeline`](crate::pipeline) modules) is written against these traits and
//! works with any variant.
//!
//! # Close protocol
//!
//! A queue starts `Open` and moves to `Closed` exactly once:
//!
//! - `Open`: `push` may wait for space, `pop` may wait for a value.
//! - `Closed`: `push` fails with [`ClosedQueueError`] and hands the value back;
//!   values accepted before the close stay poppable; once they are drained
//!   every `pop` (current or future) returns `None`.

use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::Backoff;
use minstant::Instant;

use crate::error::{ClosedQueueError, TryPopError, TryPushError};

/// How long a timed operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl Timeout {
    /// Absolute deadline for a wait starting now, `None` for [`Timeout::Infinite`].
    #[must_use]
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Duration(d) => Some(Instant::now() + d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// State shared by both ends of a queue.
pub trait Bounded {
    /// Number of slots, fixed at construction.
    fn capacity(&self) -> usize;

    /// Number of values currently enqueued.
    ///
    /// Advisory under concurrent access: the value may be stale by the time
    /// it is returned. Never exceeds [`capacity`](Self::capacity).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_closed(&self) -> bool;

    /// Stops the queue from accepting values and releases every waiter.
    ///
    /// Idempotent and non-blocking.
    fn close(&self);
}

/// Producer side of a queue.
pub trait Push<T>: Bounded {
    /// Enqueues `value`, waiting while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns the value inside [`ClosedQueueError`] if the queue is closed
    /// before or while waiting for space.
    fn push(&self, value: T) -> Result<(), ClosedQueueError<T>>;

    /// Enqueues `value` only if a slot is free right now.
    ///
    /// # Errors
    ///
    /// [`TryPushError::Full`] or [`TryPushError::Closed`], both carrying the value.
    fn try_push(&self, value: T) -> Result<(), TryPushError<T>>;
}

/// Consumer side of a queue.
pub trait Pop<T>: Bounded {
    /// Dequeues the next value, waiting until one arrives.
    ///
    /// Returns `None` once the queue is closed and drained; a loop over `pop`
    /// terminates on its own.
    fn pop(&self) -> Option<T>;

    /// Dequeues a value only if one is ready right now.
    ///
    /// # Errors
    ///
    /// [`TryPopError::Empty`] if nothing is ready, [`TryPopError::Closed`] if
    /// the queue is closed and drained.
    fn try_pop(&self) -> Result<T, TryPopError>;

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    ///
    /// The default polls [`try_pop`](Self::try_pop) with bounded backoff.
    ///
    /// # Errors
    ///
    /// [`TryPopError::Empty`] if the deadline passed, [`TryPopError::Closed`]
    /// if the queue is closed and drained.
    fn pop_timeout(&self, timeout: Timeout) -> Result<T, TryPopError> {
        let deadline = timeout.deadline();
        let backoff = Backoff::new();
        loop {
            match self.try_pop() {
                Err(TryPopError::Empty) => {}
                result => return result,
            }
            if let Some(dl) = deadline
                && Instant::now() >= dl
            {
                return Err(TryPopError::Empty);
            }
            backoff.snooze();
        }
    }

    /// Iterator that pops until the queue is closed and drained.
    fn drain(&self) -> Drain<'_, T, Self>
    where
        Self: Sized,
    {
        Drain {
            queue: self,
            _marker: PhantomData,
        }
    }
}

/// A queue usable from both ends.
pub trait Queue<T>: Push<T> + Pop<T> {}

impl<T, Q: Push<T> + Pop<T> + ?Sized> Queue<T> for Q {}

/// Blocking iterator returned by [`Pop::drain`].
pub struct Drain<'a, T, Q: ?Sized> {
    queue: &'a Q,
    _marker: PhantomData<fn() -> T>,
}

impl<T, Q: Pop<T> + ?Sized> Iterator for Drain<'_, T, Q> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.queue.pop()
    }
}

// Closed is terminal, so once `pop` returns `None` it always will.
impl<T, Q: Pop<T> + ?Sized> FusedIterator for Drain<'_, T, Q> {}

impl<Q: Bounded + ?Sized> Bounded for Arc<Q> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }

    fn close(&self) {
        (**self).close();
    }
}

impl<T, Q: Push<T> + ?Sized> Push<T> for Arc<Q> {
    fn push(&self, value: T) -> Result<(), ClosedQueueError<T>> {
        (**self).push(value)
    }

    fn try_push(&self, value: T) -> Result<(), TryPushError<T>> {
        (**self).try_push(value)
    }
}

impl<T, Q: Pop<T> + ?Sized> Pop<T> for Arc<Q> {
    fn pop(&self) -> Option<T> {
        (**self).pop()
    }

    fn try_pop(&self) -> Result<T, TryPopError> {
        (**self).try_pop()
    }

    fn pop_timeout(&self, timeout: Timeout) -> Result<T, TryPopError> {
        (**self).pop_timeout(timeout)
    }
}
