//! Configuration for the metadata factory.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default max inactive interval for new sessions (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECS: i64 = 1800;

/// Configuration for [`SessionMetaDataFactory`](crate::SessionMetaDataFactory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Lock the creation entry when finding a session, serializing concurrent
    /// finds of the same id for the rest of the caller's transaction.
    pub lock_on_read: bool,

    /// Max inactive interval assigned to newly created sessions, in seconds.
    /// Zero means the session never expires.
    pub default_max_inactive_interval_secs: i64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            lock_on_read: true,
            default_max_inactive_interval_secs: DEFAULT_MAX_INACTIVE_INTERVAL_SECS,
        }
    }
}

impl FactoryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable locking on find.
    pub fn with_lock_on_read(mut self, enabled: bool) -> Self {
        self.lock_on_read = enabled;
        self
    }

    /// Set the max inactive interval for new sessions.
    pub fn with_default_max_inactive_interval(mut self, interval: Duration) -> Self {
        self.default_max_inactive_interval_secs = interval.num_seconds().max(0);
        self
    }

    pub fn default_max_inactive_interval(&self) -> Duration {
        Duration::seconds(self.default_max_inactive_interval_secs.max(0))
    }
}
