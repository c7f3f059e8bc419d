//! Tracing hooks for queue, pool and pipeline events.
//!
//! Enable with `--features tracing`. Without the feature every macro in this
//! module expands to nothing, so the hot paths carry no instrumentation cost.

/// Installs a tracing subscriber with thread ids and uptime timestamps.
///
/// Honors `RUST_LOG`; defaults to `boundq=trace`. Call once at the start of a
/// test or binary. Does nothing if the `tracing` feature is not enabled.
#[cfg(feature = "tracing")]
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("boundq=trace"));

    // A second call (another test in the same binary) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing() {}

#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub(crate) use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use error_noop as error;
#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use info_noop as info;
#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use trace_noop as trace;
#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use warn_noop as warn;
