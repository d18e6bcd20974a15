//! Deferred-write strategies for metadata entries.
//!
//! A mutator is chosen once per entry when a mutable view is built:
//! - [`Mutator::Passive`] when the entry was inserted by the caller's own
//!   transaction. The view mutates the transaction's staged value in place and
//!   commit publishes it, so no explicit write is needed.
//! - [`Mutator::Active`] otherwise. Each call writes the entry's current value.

use std::sync::Arc;

use tracing::trace;

use cairn_store::{CacheKey, Flag, KeyValueStore, Options, Result, Shared, TxId};

/// Writes the current value of one entry back to the store.
pub struct EntryMutator<S, K: CacheKey> {
    store: Arc<S>,
    key: K,
    value: Shared<K::Value>,
    tx: Option<TxId>,
}

impl<S: KeyValueStore, K: CacheKey> EntryMutator<S, K> {
    pub fn new(store: Arc<S>, key: K, value: Shared<K::Value>, tx: Option<TxId>) -> Self {
        Self {
            store,
            key,
            value,
            tx,
        }
    }

    pub fn mutate(&self) -> Result<()> {
        trace!(key = ?self.key, "Writing entry");
        self.store.put(
            &self.key,
            self.value.get(),
            Options::in_tx(self.tx).with(Flag::IgnoreReturnValues),
        )
    }
}

/// Persistence strategy attached to a mutable metadata view.
pub enum Mutator<S, K: CacheKey> {
    /// The value is already part of the caller's transaction.
    Passive,
    /// Each mutation writes the current value.
    Active(EntryMutator<S, K>),
}

impl<S: KeyValueStore, K: CacheKey> Mutator<S, K> {
    /// Pick the strategy for `key`, whose current value is `value`.
    pub fn select(
        store: &Arc<S>,
        key: K,
        value: Shared<K::Value>,
        tx: Option<TxId>,
    ) -> Result<Self> {
        if let Some(tx) = tx
            && store.is_created(&key, tx)?
        {
            trace!(key = ?key, %tx, "Entry created in this transaction, using passive mutator");
            return Ok(Mutator::Passive);
        }
        Ok(Mutator::Active(EntryMutator::new(
            Arc::clone(store),
            key,
            value,
            tx,
        )))
    }

    pub fn is_passive(&self) -> bool {
        matches!(self, Mutator::Passive)
    }

    /// Persist the entry's current value, if this strategy requires it.
    pub fn mutate(&self) -> Result<()> {
        match self {
            Mutator::Passive => Ok(()),
            Mutator::Active(mutator) => mutator.mutate(),
        }
    }
}
