//! The key-value store contract consumed by the session layer.
//!
//! Cairn does not implement a distributed cache. It talks to one through
//! [`KeyValueStore`], which mirrors the handful of primitives it needs:
//! reads with optional locking, conditional insert, plain writes, removal,
//! eviction, and transaction boundaries.
//!
//! ```text
//! KeyValueStore (trait)   - distributed cache contract
//!     └── MemoryStore     - in-process reference implementation
//! ```

use crate::error::Result;
use crate::flags::Options;
use crate::key::{CacheKey, StoreKey};
use crate::shared::Shared;
use crate::transaction::TxId;

/// Outcome of [`KeyValueStore::insert_if_absent`].
#[derive(Debug, Clone)]
pub enum Insertion<V> {
    /// The supplied value was inserted.
    Inserted(Shared<V>),
    /// A value already existed; the supplied one was discarded.
    Existing(Shared<V>),
}

impl<V> Insertion<V> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Insertion::Inserted(_))
    }

    pub fn into_value(self) -> Shared<V> {
        match self {
            Insertion::Inserted(value) | Insertion::Existing(value) => value,
        }
    }
}

/// Contract for the distributed cache holding session metadata.
///
/// All calls are synchronous within the calling context. Per-call behavior is
/// selected by the [`Options`] argument; see [`Flag`](crate::Flag).
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// With `ForceWriteLock` the key's lock is acquired (and, inside a
    /// transaction, held until it ends). Adding `FailSilently` makes a
    /// contended lock report `Ok(None)` instead of waiting.
    fn get<K: CacheKey>(&self, key: &K, options: Options) -> Result<Option<Shared<K::Value>>>;

    /// Insert `value` unless the key already holds one.
    fn insert_if_absent<K: CacheKey>(
        &self,
        key: &K,
        value: K::Value,
        options: Options,
    ) -> Result<Insertion<K::Value>>;

    /// Write `value` unconditionally.
    fn put<K: CacheKey>(&self, key: &K, value: K::Value, options: Options) -> Result<()>;

    /// Delete a key. A missing key is not an error.
    ///
    /// Returns the previous value unless `IgnoreReturnValues` is set.
    fn remove<K: CacheKey>(&self, key: &K, options: Options) -> Result<Option<K::Value>>;

    /// Drop a key from the active tier only, leaving any durable copy intact.
    fn evict<K: CacheKey>(&self, key: &K) -> Result<()>;

    /// Whether `key` was newly inserted by transaction `tx`.
    fn is_created<K: CacheKey>(&self, key: &K, tx: TxId) -> Result<bool>;

    /// Start a transaction.
    fn begin(&self) -> TxId;

    /// Publish everything staged by `tx` and release its locks.
    fn commit(&self, tx: TxId) -> Result<()>;

    /// Discard everything staged by `tx` and release its locks.
    fn rollback(&self, tx: TxId) -> Result<()>;
}

/// Kind of change reported to a [`StoreListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Removed,
    Evicted,
}

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: EventKind,
    pub key: StoreKey,
}

/// Observer of store changes.
pub trait StoreListener: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}
