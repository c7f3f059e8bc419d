//! Construction parameters for queues and worker pools.
//!
//! Both types deserialize with every field optional, so a partial
//! configuration picks up the defaults below.

use serde::{Deserialize, Serialize};

use crate::error::{CapacityError, PoolError};

/// Number of slots used when no capacity is given.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Prefix for worker thread names (`{prefix}-{index}`).
pub const DEFAULT_WORKER_PREFIX: &str = "boundq-worker";

/// Parameters shared by every queue variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Fixed number of slots. Must be at least 1.
    pub capacity: usize,
}

impl QueueConfig {
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Checks that the configuration describes a usable queue.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError`] if `capacity` is 0.
    pub const fn validate(&self) -> Result<(), CapacityError> {
        if self.capacity == 0 {
            return Err(CapacityError);
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Parameters for [`ThreadPool`](crate::pool::ThreadPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Defaults to the logical core count.
    pub workers: usize,
    /// Capacity of the task queue.
    pub capacity: usize,
    /// Pin worker `i` to the `i`-th available core (round-robin).
    pub pin_workers: bool,
    /// Worker thread name prefix.
    pub name_prefix: String,
}

impl PoolConfig {
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_pinning(mut self, pin_workers: bool) -> Self {
        self.pin_workers = pin_workers;
        self
    }

    #[must_use]
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Task queue parameters derived from this configuration.
    #[must_use]
    pub const fn queue(&self) -> QueueConfig {
        QueueConfig::with_capacity(self.capacity)
    }

    /// Checks worker count and queue capacity.
    ///
    /// # Errors
    ///
    /// [`PoolError::NoWorkers`] for zero workers, [`PoolError::Capacity`] for a
    /// zero-slot task queue.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        self.queue().validate()?;
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            capacity: DEFAULT_CAPACITY,
            pin_workers: false,
            name_prefix: DEFAULT_WORKER_PREFIX.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(QueueConfig::with_capacity(0).validate(), Err(CapacityError));
    }

    #[test]
    fn test_pool_builder() {
        let config = PoolConfig::default()
            .with_workers(3)
            .with_capacity(16)
            .with_pinning(true)
            .with_name_prefix("io");

        assert_eq!(config.workers, 3);
        assert_eq!(config.queue(), QueueConfig::with_capacity(16));
        assert!(config.pin_workers);
        assert_eq!(config.name_prefix, "io");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_defaults_have_workers() {
        let config = PoolConfig::default();
        assert!(config.workers >= 1);
        assert!(!config.pin_workers);
    }

    #[test]
    fn test_pool_validation_errors() {
        let no_workers = PoolConfig::default().with_workers(0);
        assert!(matches!(no_workers.validate(), Err(PoolError::NoWorkers)));

        let no_slots = PoolConfig::default().with_workers(1).with_capacity(0);
        assert!(matches!(
            no_slots.validate(),
            Err(PoolError::Capacity(CapacityError))
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let queue: QueueConfig = serde_json::from_str("{}").expect("empty queue config");
        assert_eq!(queue, QueueConfig::default());

        let pool: PoolConfig =
            serde_json::from_str(r#"{ "workers": 2, "pin_workers": true }"#).expect("partial pool config");
        assert_eq!(pool.workers, 2);
        assert!(pool.pin_workers);
        assert_eq!(pool.capacity, DEFAULT_CAPACITY);
        assert_eq!(pool.name_prefix, DEFAULT_WORKER_PREFIX);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = PoolConfig::default().with_workers(3).with_capacity(64).with_name_prefix("io");
        let value = serde_json::to_value(&config).expect("serialize pool config");
        assert_eq!(value["capacity"], serde_json::json!(64));

        let back: PoolConfig = serde_json::from_value(value).expect("deserialize pool config");
        assert_eq!(back, config);
    }
}
