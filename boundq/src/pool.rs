//! Fixed-size worker pool fed by a bounded task queue.
//!
//! Workers loop on [`Pop::pop`] and exit when it returns `None`, so shutting
//! the pool down is just closing its queue: tasks already accepted still run,
//! new submissions fail with [`PoolError::Closed`].
//!
//! Submitting blocks while the task queue is full. That backpressure is the
//! reason the pool sits on a bounded queue.
//!
//! ```
//! use boundq::{PoolConfig, ThreadPool};
//!
//! let pool = ThreadPool::new(&PoolConfig::default().with_workers(2))?;
//! let handle = pool.submit(|| 6 * 7)?;
//! assert_eq!(handle.join(), Ok(42));
//! pool.join();
//! # Ok::<(), boundq::PoolError>(())
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use core_affinity::CoreId;

use crate::blocking::BlockingQueue;
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::queue::{Bounded, Pop, Push, Queue};
use crate::trace::{debug, info, warn};

/// Unit of work executed by a pool worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

type TaskQueue = Arc<dyn Queue<Job> + Send + Sync>;

/// A fixed set of named worker threads sharing one task queue.
pub struct ThreadPool {
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts `config.workers` threads over a [`BlockingQueue`] of
    /// `config.capacity` tasks.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] for an invalid configuration or if a worker
    /// thread cannot be spawned.
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let queue = BlockingQueue::from_config(&config.queue())?;
        Self::with_queue(queue, config)
    }

    /// Starts workers over a caller-provided task queue.
    ///
    /// `config.capacity` is ignored; the queue's own capacity applies.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoWorkers`] for zero workers, [`PoolError::Spawn`] if a
    /// worker thread cannot be spawned. On spawn failure the workers already
    /// started are stopped before returning.
    pub fn with_queue<Q>(queue: Q, config: &PoolConfig) -> Result<Self, PoolError>
    where
        Q: Queue<Job> + Send + Sync + 'static,
    {
        if config.workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let queue: TaskQueue = Arc::new(queue);
        let cores = if config.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        info!(
            workers = config.workers,
            capacity = queue.capacity(),
            pinned = !cores.is_empty(),
            "thread pool starting"
        );

        let mut pool = Self {
            queue,
            workers: Vec::with_capacity(config.workers),
        };

        for index in 0..config.workers {
            let name = format!("{}-{index}", config.name_prefix);
            let core = (!cores.is_empty()).then(|| cores[index % cores.len()]);
            let queue = Arc::clone(&pool.queue);

            debug!(worker = %name, core = ?core.map(|c| c.id), "spawning worker");
            let spawned = thread::Builder::new()
                .name(name)
                .spawn(move || run_worker(&*queue, core));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    warn!(error = %e, "failed to spawn worker, stopping pool");
                    pool.stop();
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        Ok(pool)
    }

    /// Queues `task` and returns a handle to its result.
    ///
    /// Blocks while the task queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] after [`shutdown`](Self::shutdown).
    pub fn submit<F, R>(&self, task: F) -> Result<TaskHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let result = Arc::new(BlockingQueue::with_capacity(1));
        let sender = ResultSender(Arc::clone(&result));

        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task));
            if outcome.is_err() {
                warn!(
                    worker = thread::current().name().unwrap_or("<unnamed>"),
                    "task panicked"
                );
            }
            // Capacity 1 and a single push: never waits.
            let _ = sender.0.push(outcome);
        });

        self.queue.push(job).map_err(|_| PoolError::Closed)?;
        Ok(TaskHandle { result })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Tasks waiting for a worker (advisory).
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Stops accepting tasks. Workers finish the queued ones, then exit.
    ///
    /// Does not wait; see [`join`](Self::join).
    pub fn shutdown(&self) {
        if !self.queue.is_closed() {
            info!(queued = self.queue.len(), "thread pool shutting down");
        }
        self.queue.close();
    }

    /// Shuts down and waits for every worker to exit.
    pub fn join(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("thread pool stopped");
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .field("queued", &self.queue.len())
            .field("closed", &self.queue.is_closed())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn run_worker(queue: &dyn Queue<Job>, core: Option<CoreId>) {
    if let Some(core) = core
        && !core_affinity::set_for_current(core)
    {
        warn!(core = core.id, "failed to pin worker");
    }

    debug!("worker started");
    while let Some(job) = queue.pop() {
        job();
    }
    debug!("worker exiting");
}

/// Closes the result queue when the job is consumed or discarded, so the
/// handle never waits on a task that will not run.
struct ResultSender<R>(Arc<BlockingQueue<thread::Result<R>>>);

impl<R> Drop for ResultSender<R> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Result of a task submitted to a [`ThreadPool`].
pub struct TaskHandle<R> {
    result: Arc<BlockingQueue<thread::Result<R>>>,
}

impl<R> TaskHandle<R> {
    /// Waits for the task and returns its value.
    ///
    /// # Errors
    ///
    /// [`TaskError::Panicked`] if the task panicked, [`TaskError::Dropped`] if
    /// it was discarded without running.
    pub fn join(self) -> Result<R, TaskError> {
        match self.result.pop() {
            Some(Ok(value)) => Ok(value),
            Some(Err(_)) => Err(TaskError::Panicked),
            None => Err(TaskError::Dropped),
        }
    }

    /// Whether the task has finished (or will never run).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.result.is_empty() || self.result.is_closed()
    }
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::mpmc::MpmcQueue;

    fn small_pool(workers: usize) -> ThreadPool {
        ThreadPool::new(&PoolConfig::default().with_workers(workers).with_capacity(4)).unwrap()
    }

    #[test]
    fn test_submit_returns_value() {
        let pool = small_pool(2);
        let handles: Vec<_> = (0..20u64).map(|i| pool.submit(move || i * i).unwrap()).collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, (0..20u64).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_task_is_reported() {
        let pool = small_pool(1);
        let bad = pool.submit(|| -> u32 { panic!("boom") }).unwrap();
        let good = pool.submit(|| 7).unwrap();

        assert_eq!(bad.join(), Err(TaskError::Panicked));
        assert_eq!(good.join(), Ok(7));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = small_pool(1);
        pool.shutdown();
        assert!(matches!(pool.submit(|| ()), Err(PoolError::Closed)));
    }

    #[test]
    fn test_join_runs_queued_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = small_pool(2);

        for _ in 0..50 {
            let c = Arc::clone(&counter);
            pool.submit(move || {
                c.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        pool.join();

        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn test_worker_names_use_prefix() {
        let pool = ThreadPool::new(
            &PoolConfig::default()
                .with_workers(1)
                .with_capacity(2)
                .with_name_prefix("unit"),
        )
        .unwrap();

        let name = pool
            .submit(|| thread::current().name().map(str::to_owned))
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name.as_deref(), Some("unit-0"));
    }

    #[test]
    fn test_with_custom_queue() {
        let pool = ThreadPool::with_queue(
            MpmcQueue::<Job>::with_capacity(8),
            &PoolConfig::default().with_workers(3),
        )
        .unwrap();
        assert_eq!(pool.workers(), 3);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..30)
            .map(|i| {
                let seen = Arc::clone(&seen);
                pool.submit(move || seen.lock().unwrap().push(i)).unwrap()
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn test_dropped_job_reports_dropped() {
        // A queue nobody pops: the job is discarded with the pool's queue.
        let queue = Arc::new(BlockingQueue::<Job>::with_capacity(1));
        let result = Arc::new(BlockingQueue::with_capacity(1));
        let sender = ResultSender(Arc::clone(&result));
        let job: Job = Box::new(move || {
            let _ = sender.0.push(Ok::<_, Box<dyn std::any::Any + Send>>(1u8));
        });
        queue.push(job).unwrap();
        drop(queue);

        let handle = TaskHandle { result };
        assert!(handle.is_finished());
        assert_eq!(handle.join(), Err(TaskError::Dropped));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = PoolConfig::default().with_workers(0);
        assert!(matches!(ThreadPool::new(&config), Err(PoolError::NoWorkers)));
        assert!(matches!(
            ThreadPool::with_queue(BlockingQueue::<Job>::with_capacity(1), &config),
            Err(PoolError::NoWorkers)
        ));
    }

    #[test]
    fn test_is_finished() {
        let pool = small_pool(1);
        let handle = pool.submit(|| thread::sleep(Duration::from_millis(20))).unwrap();
        while !handle.is_finished() {
            thread::yield_now();
        }
        assert_eq!(handle.join(), Ok(()));
    }
}
