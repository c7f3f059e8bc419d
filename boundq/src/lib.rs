//! Bounded concurrent queues with a shared close protocol.
//!
//! Three interchangeable implementations of one contract:
//!
//! - [`BlockingQueue`]: mutex plus two condition variables; waiters sleep.
//! - [`spsc`]: lock-free ring split into a [`Producer`](spsc::Producer) and a
//!   [`Consumer`](spsc::Consumer); one thread on each side.
//! - [`MpmcQueue`]: lock-free ring with per-slot versions; any number of
//!   threads on either side.
//!
//! All of them hold at most `capacity` values, keep FIFO order, and support
//! [`close`](Bounded::close): pushes fail from then on, consumers drain what
//! is left and then get `None`. [`pool`] and [`pipeline`] build worker pools
//! and multi-stage pipelines on top of the [`Push`] and [`Pop`] traits.

pub mod blocking;
pub mod config;
pub mod error;
pub mod mpmc;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod spsc;

mod storage;
mod trace;

pub use blocking::BlockingQueue;
pub use config::{DEFAULT_CAPACITY, PoolConfig, QueueConfig};
pub use error::{CapacityError, ClosedQueueError, PoolError, TaskError, TryPopError, TryPushError};
pub use mpmc::MpmcQueue;
pub use pool::{Job, TaskHandle, ThreadPool};
pub use queue::{Bounded, Drain, Pop, Push, Queue, Timeout};
pub use trace::init_tracing;
