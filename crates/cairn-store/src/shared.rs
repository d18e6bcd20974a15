//! Shared value cells handed out by a store.

use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A value returned from a store call.
///
/// A value staged by the caller's own transaction is shared with that
/// transaction's write set: mutating it in place changes what commit
/// publishes. Anything else is a detached copy.
pub struct Shared<V>(Arc<RwLock<V>>);

impl<V> Shared<V> {
    pub fn new(value: V) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, V> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, V> {
        self.0.write()
    }

    /// Whether both cells refer to the same underlying value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<V: Clone> Shared<V> {
    /// Copy out the current value.
    pub fn get(&self) -> V {
        self.0.read().clone()
    }
}

impl<V> Clone for Shared<V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<V: fmt::Debug> fmt::Debug for Shared<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Shared").field(&*self.0.read()).finish()
    }
}
