//! Error types shared by every queue variant and by the pool.
//!
//! End of stream is not an error: [`Pop::pop`](crate::Pop::pop) returns
//! `None` once a queue is closed and drained.

use std::fmt;
use std::io;

use thiserror::Error;

/// A push was attempted on a closed queue.
///
/// Carries the rejected value back to the caller.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
#[error("push on a closed queue")]
pub struct ClosedQueueError<T>(pub T);

impl<T> ClosedQueueError<T> {
    /// Returns the value that was not enqueued.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for ClosedQueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClosedQueueError(..)")
    }
}

/// Why a non-blocking push did not enqueue its value.
#[derive(Clone, Copy, PartialEq, Eq, Error)]
pub enum TryPushError<T> {
    /// Every slot is occupied.
    #[error("queue is full")]
    Full(T),
    /// The queue no longer accepts values.
    #[error("push on a closed queue")]
    Closed(T),
}

impl<T> TryPushError<T> {
    /// Returns the value that was not enqueued.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

impl<T> fmt::Debug for TryPushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> From<ClosedQueueError<T>> for TryPushError<T> {
    fn from(err: ClosedQueueError<T>) -> Self {
        Self::Closed(err.0)
    }
}

/// Why a non-blocking or timed pop returned no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TryPopError {
    /// Nothing was ready (or the deadline elapsed first).
    #[error("queue is empty")]
    Empty,
    /// The queue is closed and fully drained.
    #[error("queue is closed and drained")]
    Closed,
}

/// A queue was configured with zero slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue capacity must be greater than 0")]
pub struct CapacityError;

/// Error building or using a [`ThreadPool`](crate::pool::ThreadPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The task queue capacity is invalid.
    #[error("invalid task queue: {0}")]
    Capacity(#[from] CapacityError),
    /// The pool was configured with zero workers.
    #[error("thread pool needs at least one worker")]
    NoWorkers,
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
    /// The pool has been shut down and accepts no more tasks.
    #[error("thread pool is shut down")]
    Closed,
}

/// A submitted task produced no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked while running.
    #[error("task panicked")]
    Panicked,
    /// The task was discarded before it ran.
    #[error("task was dropped before completion")]
    Dropped,
}
