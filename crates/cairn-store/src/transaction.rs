//! Transaction identifiers.

use std::fmt;

/// Identifies a transaction begun on a [`KeyValueStore`](crate::KeyValueStore).
///
/// The session lifecycle owns the boundary: it begins a transaction, passes
/// the id into each call, then commits or rolls back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(u64);

impl TxId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}
