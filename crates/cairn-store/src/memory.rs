//! In-process reference implementation of [`KeyValueStore`].
//!
//! `MemoryStore` models the behavior the session layer depends on without
//! any networking: keys are routed to partitions by their routing string,
//! each partition guards its entries and per-key locks with a mutex, and
//! transactions stage their changes until commit. An optional durable tier
//! sits behind the active tier so eviction can be told apart from removal.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::flags::{Flag, Options};
use crate::key::{CacheKey, StoreKey};
use crate::shared::Shared;
use crate::store::{EventKind, Insertion, KeyValueStore, StoreEvent, StoreListener};
use crate::transaction::TxId;

type AnyValue = Box<dyn Any + Send + Sync>;

/// A committed value and its version.
struct Slot {
    value: AnyValue,
    version: u64,
}

/// A value staged by a transaction, readable as its concrete `Shared<V>`.
trait StagedValue: Send + Sync {
    fn snapshot(&self) -> AnyValue;
    fn as_any(&self) -> &dyn Any;
}

impl<V: Clone + Send + Sync + 'static> StagedValue for Shared<V> {
    fn snapshot(&self) -> AnyValue {
        Box::new(self.get())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum Staged {
    Write {
        value: Box<dyn StagedValue>,
        notify: bool,
    },
    Remove {
        notify: bool,
    },
}

/// Entries and locks owned by one partition.
#[derive(Default)]
struct Segment {
    active: HashMap<StoreKey, Slot>,
    durable: HashMap<StoreKey, Slot>,
    locks: HashMap<StoreKey, TxId>,
}

struct Partition {
    state: Mutex<Segment>,
    released: Condvar,
}

#[derive(Default)]
struct TxState {
    staged: HashMap<StoreKey, Staged>,
    created: HashSet<StoreKey>,
    locked: HashSet<StoreKey>,
}

#[derive(Debug, Default)]
struct Counters {
    writes: AtomicU64,
    inserts: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    activations: AtomicU64,
    synchronous: AtomicU64,
    lock_waits: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Operation counters for a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Explicit writes issued through `put`.
    pub writes: u64,
    /// Conditional inserts attempted.
    pub inserts: u64,
    /// Removals requested.
    pub removals: u64,
    /// Evictions requested.
    pub evictions: u64,
    /// Entries reloaded from the durable tier.
    pub activations: u64,
    /// Calls made with `ForceSynchronous`.
    pub synchronous: u64,
    /// Lock acquisitions that had to wait.
    pub lock_waits: u64,
    /// Committed transactions.
    pub commits: u64,
    /// Rolled back transactions.
    pub rollbacks: u64,
}

/// In-process key-value store with partitions, transactions and an optional
/// durable tier.
pub struct MemoryStore {
    config: StoreConfig,
    partitions: Vec<Partition>,
    transactions: Mutex<HashMap<TxId, TxState>>,
    next_tx: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn StoreListener>>>,
    counters: Counters,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        let partitions = (0..config.segments.max(1))
            .map(|_| Partition {
                state: Mutex::new(Segment::default()),
                released: Condvar::new(),
            })
            .collect();

        Self {
            config,
            partitions,
            transactions: Mutex::new(HashMap::new()),
            next_tx: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register a listener for change notifications.
    pub fn add_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.write().push(listener);
    }

    /// Partition index a key routes to.
    pub fn partition_of<K: CacheKey>(&self, key: &K) -> usize {
        key.store_key().partition(self.partitions.len())
    }

    /// Committed value in the active tier, without activation or locking.
    pub fn peek_active<K: CacheKey>(&self, key: &K) -> Option<K::Value> {
        let store_key = key.store_key();
        let state = self.partition(&store_key).state.lock();
        state
            .active
            .get(&store_key)
            .and_then(|slot| slot.value.downcast_ref::<K::Value>().cloned())
    }

    /// Committed value in the durable tier, if one is configured.
    pub fn peek_durable<K: CacheKey>(&self, key: &K) -> Option<K::Value> {
        let store_key = key.store_key();
        let state = self.partition(&store_key).state.lock();
        state
            .durable
            .get(&store_key)
            .and_then(|slot| slot.value.downcast_ref::<K::Value>().cloned())
    }

    /// Version of the committed value, bumped on every committed write.
    pub fn version<K: CacheKey>(&self, key: &K) -> Option<u64> {
        let store_key = key.store_key();
        let state = self.partition(&store_key).state.lock();
        state
            .active
            .get(&store_key)
            .or_else(|| state.durable.get(&store_key))
            .map(|slot| slot.version)
    }

    /// Whether any transaction currently holds the key's lock.
    pub fn is_locked<K: CacheKey>(&self, key: &K) -> bool {
        let store_key = key.store_key();
        self.partition(&store_key)
            .state
            .lock()
            .locks
            .contains_key(&store_key)
    }

    /// Number of entries in the active tier.
    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.state.lock().active.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StoreStats {
            writes: load(&c.writes),
            inserts: load(&c.inserts),
            removals: load(&c.removals),
            evictions: load(&c.evictions),
            activations: load(&c.activations),
            synchronous: load(&c.synchronous),
            lock_waits: load(&c.lock_waits),
            commits: load(&c.commits),
            rollbacks: load(&c.rollbacks),
        }
    }

    fn partition(&self, key: &StoreKey) -> &Partition {
        &self.partitions[key.partition(self.partitions.len())]
    }

    fn ensure_active(&self, tx: Option<TxId>) -> Result<()> {
        match tx {
            Some(tx) if !self.transactions.lock().contains_key(&tx) => {
                Err(StoreError::TransactionNotActive(tx))
            }
            _ => Ok(()),
        }
    }

    /// Wait for `key` to be free of other owners' locks and, inside a
    /// transaction, take the lock for it.
    ///
    /// Returns `false` only when `fail_silently` is set and the lock is busy.
    fn acquire(
        &self,
        partition: &Partition,
        state: &mut MutexGuard<'_, Segment>,
        key: &StoreKey,
        tx: Option<TxId>,
        fail_silently: bool,
    ) -> Result<bool> {
        let busy = |state: &Segment| {
            matches!(state.locks.get(key), Some(owner) if Some(*owner) != tx)
        };

        if busy(&**state) {
            if fail_silently {
                return Ok(false);
            }

            bump(&self.counters.lock_waits);
            trace!(key = %key, "Waiting for lock");
            // An unrepresentable deadline means waiting without one.
            let deadline = Instant::now().checked_add(self.config.lock_timeout());
            while busy(&**state) {
                let Some(deadline) = deadline else {
                    partition.released.wait(state);
                    continue;
                };
                if partition.released.wait_until(state, deadline).timed_out() && busy(&**state) {
                    return Err(StoreError::LockTimeout {
                        key: key.to_string(),
                    });
                }
            }
        }

        if let Some(tx) = tx {
            let mut txs = self.transactions.lock();
            let tx_state = txs
                .get_mut(&tx)
                .ok_or(StoreError::TransactionNotActive(tx))?;
            tx_state.locked.insert(key.clone());
            state.locks.insert(key.clone(), tx);
        }

        Ok(true)
    }

    fn release(&self, tx: TxId, keys: HashSet<StoreKey>) {
        for key in keys {
            let partition = self.partition(&key);
            let mut state = partition.state.lock();
            if state.locks.get(&key) == Some(&tx) {
                state.locks.remove(&key);
            }
            drop(state);
            partition.released.notify_all();
        }
    }

    /// Read a committed value, reloading it from the durable tier on an
    /// active-tier miss.
    fn load<V: Clone + Send + Sync + 'static>(
        &self,
        state: &mut Segment,
        key: &StoreKey,
    ) -> Result<Option<V>> {
        if let Some(slot) = state.active.get(key) {
            return downcast_clone(slot, key).map(Some);
        }

        if !self.config.durable {
            return Ok(None);
        }

        let Some(slot) = state.durable.get(key) else {
            return Ok(None);
        };
        let value: V = downcast_clone(slot, key)?;
        let version = slot.version;
        state.active.insert(
            key.clone(),
            Slot {
                value: Box::new(value.clone()),
                version,
            },
        );
        bump(&self.counters.activations);
        trace!(key = %key, "Activated entry from durable tier");
        Ok(Some(value))
    }

    /// Write a committed value to the active tier (and the durable tier, if
    /// any). Returns whether the key was previously absent.
    fn publish(&self, state: &mut Segment, key: &StoreKey, make: impl Fn() -> AnyValue) -> bool {
        let previous = state
            .active
            .get(key)
            .or_else(|| state.durable.get(key))
            .map(|slot| slot.version);
        let version = previous.unwrap_or(0) + 1;

        state.active.insert(
            key.clone(),
            Slot {
                value: make(),
                version,
            },
        );
        if self.config.durable {
            state.durable.insert(
                key.clone(),
                Slot {
                    value: make(),
                    version,
                },
            );
        }

        previous.is_none()
    }

    /// Remove a committed value from both tiers.
    fn unpublish(&self, state: &mut Segment, key: &StoreKey) -> Option<AnyValue> {
        let active = state.active.remove(key);
        let durable = state.durable.remove(key);
        active.or(durable).map(|slot| slot.value)
    }

    fn notify(&self, kind: EventKind, key: StoreKey, options: Options) {
        if options.has(Flag::SkipListenerNotification) {
            trace!(key = %key, ?kind, "Listener notification suppressed");
            return;
        }
        self.dispatch(&StoreEvent { kind, key });
    }

    fn dispatch(&self, event: &StoreEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }

    fn record_sync(&self, options: Options) {
        if options.has(Flag::ForceSynchronous) {
            bump(&self.counters.synchronous);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn mismatch(key: &StoreKey) -> StoreError {
    StoreError::TypeMismatch {
        key: key.to_string(),
    }
}

fn downcast_clone<V: Clone + 'static>(slot: &Slot, key: &StoreKey) -> Result<V> {
    slot.value
        .downcast_ref::<V>()
        .cloned()
        .ok_or_else(|| mismatch(key))
}

fn downcast_shared<V: Send + Sync + 'static>(
    staged: &dyn StagedValue,
    key: &StoreKey,
) -> Result<Shared<V>> {
    staged
        .as_any()
        .downcast_ref::<Shared<V>>()
        .cloned()
        .ok_or_else(|| mismatch(key))
}

impl KeyValueStore for MemoryStore {
    fn get<K: CacheKey>(&self, key: &K, options: Options) -> Result<Option<Shared<K::Value>>> {
        let store_key = key.store_key();
        let tx = options.tx();
        self.ensure_active(tx)?;

        let partition = self.partition(&store_key);
        let mut state = partition.state.lock();

        if options.has(Flag::ForceWriteLock)
            && !self.acquire(
                partition,
                &mut state,
                &store_key,
                tx,
                options.has(Flag::FailSilently),
            )?
        {
            debug!(key = %store_key, "Lock held elsewhere, failing silently");
            return Ok(None);
        }

        if let Some(tx) = tx {
            let txs = self.transactions.lock();
            if let Some(staged) = txs.get(&tx).and_then(|s| s.staged.get(&store_key)) {
                return match staged {
                    Staged::Write { value, .. } => {
                        downcast_shared(value.as_ref(), &store_key).map(Some)
                    }
                    Staged::Remove { .. } => Ok(None),
                };
            }
        }

        Ok(self
            .load::<K::Value>(&mut state, &store_key)?
            .map(Shared::new))
    }

    fn insert_if_absent<K: CacheKey>(
        &self,
        key: &K,
        value: K::Value,
        options: Options,
    ) -> Result<Insertion<K::Value>> {
        let store_key = key.store_key();
        let tx = options.tx();
        self.ensure_active(tx)?;

        let partition = self.partition(&store_key);
        let mut state = partition.state.lock();
        self.acquire(partition, &mut state, &store_key, tx, false)?;
        bump(&self.counters.inserts);
        self.record_sync(options);

        if let Some(tx) = tx {
            let mut txs = self.transactions.lock();
            let tx_state = txs
                .get_mut(&tx)
                .ok_or(StoreError::TransactionNotActive(tx))?;

            let existing = match tx_state.staged.get(&store_key) {
                Some(Staged::Write { value, .. }) => {
                    Some(downcast_shared(value.as_ref(), &store_key)?)
                }
                Some(Staged::Remove { .. }) => None,
                None => self
                    .load::<K::Value>(&mut state, &store_key)?
                    .map(Shared::new),
            };
            if let Some(existing) = existing {
                return Ok(Insertion::Existing(existing));
            }

            let shared = Shared::new(value);
            tx_state.staged.insert(
                store_key.clone(),
                Staged::Write {
                    value: Box::new(shared.clone()),
                    notify: !options.has(Flag::SkipListenerNotification),
                },
            );
            tx_state.created.insert(store_key.clone());
            trace!(key = %store_key, %tx, "Staged insert");
            return Ok(Insertion::Inserted(shared));
        }

        if let Some(existing) = self.load::<K::Value>(&mut state, &store_key)? {
            return Ok(Insertion::Existing(Shared::new(existing)));
        }

        self.publish(&mut state, &store_key, || Box::new(value.clone()));
        drop(state);
        trace!(key = %store_key, "Inserted");
        self.notify(EventKind::Created, store_key, options);
        Ok(Insertion::Inserted(Shared::new(value)))
    }

    fn put<K: CacheKey>(&self, key: &K, value: K::Value, options: Options) -> Result<()> {
        let store_key = key.store_key();
        let tx = options.tx();
        self.ensure_active(tx)?;

        let partition = self.partition(&store_key);
        let mut state = partition.state.lock();
        self.acquire(partition, &mut state, &store_key, tx, false)?;
        bump(&self.counters.writes);
        self.record_sync(options);

        if let Some(tx) = tx {
            let mut txs = self.transactions.lock();
            let tx_state = txs
                .get_mut(&tx)
                .ok_or(StoreError::TransactionNotActive(tx))?;
            tx_state.staged.insert(
                store_key.clone(),
                Staged::Write {
                    value: Box::new(Shared::new(value)),
                    notify: !options.has(Flag::SkipListenerNotification),
                },
            );
            trace!(key = %store_key, %tx, "Staged write");
            return Ok(());
        }

        let created = self.publish(&mut state, &store_key, || Box::new(value.clone()));
        drop(state);
        trace!(key = %store_key, "Wrote");
        let kind = if created {
            EventKind::Created
        } else {
            EventKind::Modified
        };
        self.notify(kind, store_key, options);
        Ok(())
    }

    fn remove<K: CacheKey>(&self, key: &K, options: Options) -> Result<Option<K::Value>> {
        let store_key = key.store_key();
        let tx = options.tx();
        self.ensure_active(tx)?;

        let partition = self.partition(&store_key);
        let mut state = partition.state.lock();
        self.acquire(partition, &mut state, &store_key, tx, false)?;
        bump(&self.counters.removals);
        self.record_sync(options);
        let want_previous = !options.has(Flag::IgnoreReturnValues);

        if let Some(tx) = tx {
            let mut txs = self.transactions.lock();
            let tx_state = txs
                .get_mut(&tx)
                .ok_or(StoreError::TransactionNotActive(tx))?;

            let previous = match tx_state.staged.get(&store_key) {
                Some(Staged::Write { value, .. }) => {
                    Some(downcast_shared::<K::Value>(value.as_ref(), &store_key)?.get())
                }
                Some(Staged::Remove { .. }) => None,
                None => self.load::<K::Value>(&mut state, &store_key)?,
            };
            tx_state.staged.insert(
                store_key.clone(),
                Staged::Remove {
                    notify: !options.has(Flag::SkipListenerNotification),
                },
            );
            tx_state.created.remove(&store_key);
            trace!(key = %store_key, %tx, "Staged remove");
            return Ok(previous.filter(|_| want_previous));
        }

        let previous = self.unpublish(&mut state, &store_key);
        drop(state);

        let Some(previous) = previous else {
            return Ok(None);
        };
        trace!(key = %store_key, "Removed");
        self.notify(EventKind::Removed, store_key.clone(), options);

        if !want_previous {
            return Ok(None);
        }
        previous
            .downcast::<K::Value>()
            .map(|value| Some(*value))
            .map_err(|_| mismatch(&store_key))
    }

    fn evict<K: CacheKey>(&self, key: &K) -> Result<()> {
        let store_key = key.store_key();
        let evicted = self
            .partition(&store_key)
            .state
            .lock()
            .active
            .remove(&store_key)
            .is_some();
        bump(&self.counters.evictions);

        if evicted {
            trace!(key = %store_key, "Evicted");
            self.dispatch(&StoreEvent {
                kind: EventKind::Evicted,
                key: store_key,
            });
        }
        Ok(())
    }

    fn is_created<K: CacheKey>(&self, key: &K, tx: TxId) -> Result<bool> {
        let txs = self.transactions.lock();
        let tx_state = txs.get(&tx).ok_or(StoreError::TransactionNotActive(tx))?;
        Ok(tx_state.created.contains(&key.store_key()))
    }

    fn begin(&self) -> TxId {
        let tx = TxId::new(self.next_tx.fetch_add(1, Ordering::Relaxed) + 1);
        self.transactions.lock().insert(tx, TxState::default());
        trace!(%tx, "Transaction started");
        tx
    }

    fn commit(&self, tx: TxId) -> Result<()> {
        let TxState { staged, locked, .. } = self
            .transactions
            .lock()
            .remove(&tx)
            .ok_or(StoreError::TransactionNotActive(tx))?;

        let count = self.partitions.len();
        let mut by_partition: BTreeMap<usize, Vec<(StoreKey, Staged)>> = BTreeMap::new();
        for (key, change) in staged {
            by_partition
                .entry(key.partition(count))
                .or_default()
                .push((key, change));
        }

        // Every touched partition stays locked until all changes are
        // published, in ascending order so concurrent commits cannot deadlock.
        let mut guards: Vec<_> = by_partition
            .keys()
            .map(|&index| self.partitions[index].state.lock())
            .collect();

        let mut events = Vec::new();
        for (changes, state) in by_partition.into_values().zip(guards.iter_mut()) {
            for (key, change) in changes {
                match change {
                    Staged::Write { value, notify } => {
                        let created = self.publish(&mut **state, &key, || value.snapshot());
                        if notify {
                            let kind = if created {
                                EventKind::Created
                            } else {
                                EventKind::Modified
                            };
                            events.push(StoreEvent { kind, key });
                        }
                    }
                    Staged::Remove { notify } => {
                        if self.unpublish(&mut **state, &key).is_some() && notify {
                            events.push(StoreEvent {
                                kind: EventKind::Removed,
                                key,
                            });
                        }
                    }
                }
            }
        }
        drop(guards);

        self.release(tx, locked);
        bump(&self.counters.commits);
        debug!(%tx, events = events.len(), "Transaction committed");

        for event in &events {
            self.dispatch(event);
        }
        Ok(())
    }

    fn rollback(&self, tx: TxId) -> Result<()> {
        let TxState { locked, .. } = self
            .transactions
            .lock()
            .remove(&tx)
            .ok_or(StoreError::TransactionNotActive(tx))?;

        self.release(tx, locked);
        bump(&self.counters.rollbacks);
        debug!(%tx, "Transaction rolled back");
        Ok(())
    }
}
