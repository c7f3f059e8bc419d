//! Threads that connect queues into processing pipelines.
//!
//! A [`Stage`] owns one thread. It pops from an input queue, transforms, and
//! pushes into an output queue. End of stream travels downstream through the
//! close protocol: when the input is closed and drained the stage closes its
//! output, so the next stage ends too. If a downstream queue is closed early,
//! the push fails, the stage closes its input and exits, and the shutdown
//! travels upstream. A stage that panics closes both of its queues while
//! unwinding, so its neighbours finish instead of waiting forever.
//!
//! ```
//! use std::sync::Arc;
//!
//! use boundq::{BlockingQueue, MpmcQueue, pipeline::Stage};
//!
//! let raw = Arc::new(MpmcQueue::with_capacity(4));
//! let squared = Arc::new(BlockingQueue::with_capacity(4));
//!
//! let source = Stage::source("numbers", 1..=10u64, Arc::clone(&raw))?;
//! let square = Stage::spawn("square", Arc::clone(&raw), Arc::clone(&squared), |x: u64| x * x)?;
//! let sum = Arc::new(std::sync::atomic::AtomicU64::new(0));
//! let total = Arc::clone(&sum);
//! let sink = Stage::sink("sum", squared, move |x: u64| {
//!     total.fetch_add(x, std::sync::atomic::Ordering::Relaxed);
//! })?;
//!
//! assert_eq!(source.join(), 10);
//! assert_eq!(square.join(), 10);
//! assert_eq!(sink.join(), 10);
//! assert_eq!(sum.load(std::sync::atomic::Ordering::Relaxed), 385);
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;
use std::thread::{self, JoinHandle};

use crate::queue::{Bounded, Pop, Push};
use crate::trace::{debug, warn};

/// A named thread moving items between queues.
#[derive(Debug)]
pub struct Stage {
    name: String,
    handle: JoinHandle<u64>,
}

impl Stage {
    /// Spawns a stage that pushes `f(item)` into `output` for every item
    /// popped from `input`.
    ///
    /// Both queues are closed when the stage ends, including when `f` panics.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn<I, O, In, Out, F>(
        name: impl Into<String>,
        input: In,
        output: Out,
        mut f: F,
    ) -> io::Result<Self>
    where
        In: Pop<I> + Send + 'static,
        Out: Push<O> + Send + 'static,
        F: FnMut(I) -> O + Send + 'static,
    {
        Self::start(name.into(), move || {
            let _close_output = CloseOnDrop(&output);
            let _close_input = CloseOnDrop(&input);

            let mut processed = 0u64;
            while let Some(item) = input.pop() {
                if output.push(f(item)).is_err() {
                    warn!(stage = current_stage(), processed, "output closed downstream, stopping");
                    break;
                }
                processed += 1;
            }
            processed
        })
    }

    /// Spawns a stage that feeds `items` into `output`, then closes it.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn source<T, It, Out>(name: impl Into<String>, items: It, output: Out) -> io::Result<Self>
    where
        It: IntoIterator<Item = T> + Send + 'static,
        Out: Push<T> + Send + 'static,
    {
        Self::start(name.into(), move || {
            let _close_output = CloseOnDrop(&output);

            let mut processed = 0u64;
            for item in items {
                if output.push(item).is_err() {
                    warn!(stage = current_stage(), processed, "output closed downstream, stopping");
                    break;
                }
                processed += 1;
            }
            processed
        })
    }

    /// Spawns a stage that hands every item from `input` to `f` until the
    /// input is closed and drained.
    ///
    /// If `f` panics the input is closed, releasing upstream producers.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn sink<T, In, F>(name: impl Into<String>, input: In, mut f: F) -> io::Result<Self>
    where
        In: Pop<T> + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        Self::start(name.into(), move || {
            let _close_input = CloseOnDrop(&input);

            let mut processed = 0u64;
            while let Some(item) = input.pop() {
                f(item);
                processed += 1;
            }
            processed
        })
    }

    fn start<B>(name: String, body: B) -> io::Result<Self>
    where
        B: FnOnce() -> u64 + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(stage = current_stage(), "stage started");
                let processed = body();
                debug!(stage = current_stage(), processed, "stage finished");
                processed
            })?;

        Ok(Self { name, handle })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the stage to finish and returns how many items it handled.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the stage's closure.
    pub fn join(self) -> u64 {
        match self.handle.join() {
            Ok(processed) => processed,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

/// Closes a queue when dropped, on return and on unwind alike.
struct CloseOnDrop<'a, Q: Bounded + ?Sized>(&'a Q);

impl<Q: Bounded + ?Sized> Drop for CloseOnDrop<'_, Q> {
    fn drop(&mut self) {
        self.0.close();
    }
}

#[cfg_attr(not(feature = "tracing"), allow(dead_code))]
fn current_stage() -> String {
    thread::current().name().unwrap_or_default().to_owned()
}
