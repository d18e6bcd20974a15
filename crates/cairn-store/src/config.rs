//! Configuration for the in-process store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of partitions.
pub const DEFAULT_SEGMENTS: usize = 16;

/// Default time a blocking lock acquisition may wait.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Configuration for [`MemoryStore`](crate::MemoryStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of partitions keys are routed across.
    pub segments: usize,

    /// Whether a durable backing tier sits behind the active tier.
    /// Eviction only ever clears the active tier.
    pub durable: bool,

    /// Upper bound on a blocking lock wait, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            segments: DEFAULT_SEGMENTS,
            durable: false,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the partition count.
    pub fn with_segments(mut self, segments: usize) -> Self {
        self.segments = segments.max(1);
        self
    }

    /// Enable or disable the durable tier.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Set the lock wait timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_round_trips_millis() {
        let config = StoreConfig::new().with_lock_timeout(Duration::from_millis(250));
        assert_eq!(config.lock_timeout_ms, 250);
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_oversized_lock_timeout_saturates() {
        let config = StoreConfig::new().with_lock_timeout(Duration::MAX);
        assert_eq!(config.lock_timeout_ms, u64::MAX);
    }
}
