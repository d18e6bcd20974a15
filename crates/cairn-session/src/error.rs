//! Error types for session metadata operations.

use chrono::{DateTime, Utc};

use cairn_store::StoreError;

/// Error type for session metadata operations.
///
/// A session that cannot be found is never an error: lookups return `None`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying store failed. Not retried here.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Max inactive interval must not be negative.
    #[error("Invalid max inactive interval: {0}s")]
    InvalidMaxInactiveInterval(i64),

    /// Last access must not end before it starts.
    #[error("Invalid access interval: end {end} precedes start {start}")]
    InvalidAccessInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Result type for session metadata operations.
pub type Result<T> = std::result::Result<T, SessionError>;
