//! Cache keys and partition routing.
//!
//! Every key type declares a namespace and a routing string. Keys that share
//! a routing string are guaranteed to land on the same partition, which is how
//! the two entries belonging to one session stay colocated even though the
//! keys themselves differ.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

/// A typed key into a [`KeyValueStore`](crate::KeyValueStore).
pub trait CacheKey: fmt::Debug + Send + Sync + 'static {
    /// Type of the value stored under this key.
    type Value: Clone + Send + Sync + 'static;

    /// Namespace distinguishing this key type from others sharing a route.
    const NAMESPACE: &'static str;

    /// Routing identity used for partition selection.
    fn route(&self) -> &str;

    /// The untyped form of this key used inside a store.
    fn store_key(&self) -> StoreKey {
        StoreKey::new(Self::NAMESPACE, self.route())
    }
}

/// Untyped key: namespace plus routing string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    namespace: &'static str,
    route: String,
}

impl StoreKey {
    pub fn new(namespace: &'static str, route: impl Into<String>) -> Self {
        Self {
            namespace,
            route: route.into(),
        }
    }

    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// Partition this key routes to, out of `partitions`.
    ///
    /// Only the route participates, never the namespace.
    pub fn partition(&self, partitions: usize) -> usize {
        partition_of(&self.route, partitions)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.route)
    }
}

/// Map a routing string onto one of `partitions` partitions.
pub fn partition_of(route: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    route.hash(&mut hasher);
    (hasher.finish() % partitions.max(1) as u64) as usize
}
