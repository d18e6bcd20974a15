//! Creation, lookup, repair and removal of split session metadata.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace, warn};

use cairn_store::{Flag, KeyValueStore, Options, Shared, TxId};

use crate::config::FactoryConfig;
use crate::error::Result;
use crate::key::{AccessKey, CreationKey, SessionId};
use crate::metadata::{
    AccessMetaData, CreationMetaData, CreationMetaDataEntry, ImmutableSessionMetaData,
    LocalContext,
};
use crate::mutator::Mutator;
use crate::view::{
    MutableAccessMetaData, MutableCreationMetaData, MutableSessionMetaData,
    ReadOnlySessionMetaData,
};

/// Raw entries of one session as read from (or inserted into) the store.
pub struct MetaDataHandle<L> {
    creation: Shared<CreationMetaDataEntry<L>>,
    access: Shared<AccessMetaData>,
}

impl<L> MetaDataHandle<L> {
    pub fn creation_meta_data(&self) -> CreationMetaData {
        self.creation.read().meta_data().clone()
    }

    pub fn access_meta_data(&self) -> AccessMetaData {
        self.access.read().clone()
    }

    pub fn local_context(&self) -> LocalContext<L> {
        self.creation.read().local_context().clone()
    }
}

impl<L> Clone for MetaDataHandle<L> {
    fn clone(&self) -> Self {
        Self {
            creation: self.creation.clone(),
            access: self.access.clone(),
        }
    }
}

impl<L> fmt::Debug for MetaDataHandle<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaDataHandle")
            .field("creation", &*self.creation.read())
            .field("access", &*self.access.read())
            .finish()
    }
}

impl<L> ImmutableSessionMetaData for MetaDataHandle<L> {
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation.read().meta_data().creation_time()
    }

    fn max_inactive_interval(&self) -> Duration {
        self.creation.read().meta_data().max_inactive_interval()
    }

    fn last_access_start_time(&self) -> Option<DateTime<Utc>> {
        self.access.read().last_access_start_time()
    }

    fn last_access_end_time(&self) -> Option<DateTime<Utc>> {
        self.access.read().last_access_end_time()
    }
}

enum Lookup<L> {
    Found(MetaDataHandle<L>),
    Missing,
    Orphaned,
}

/// Factory for session metadata stored as two colocated entries.
///
/// Each session owns a creation entry and an access entry. The factory is the
/// only component writing them directly; everything else goes through the
/// mutators attached to the views it hands out.
///
/// `L` is the process-local context type attached to creation entries.
pub struct SessionMetaDataFactory<S, L> {
    store: Arc<S>,
    config: FactoryConfig,
    _context: PhantomData<fn() -> L>,
}

impl<S: KeyValueStore, L: Send + Sync + 'static> SessionMetaDataFactory<S, L> {
    pub fn new(store: Arc<S>, config: FactoryConfig) -> Self {
        Self {
            store,
            config,
            _context: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Create the entries for `id`, or return the ones already present.
    ///
    /// Both inserts wait for synchronous replication, so the session is
    /// visible to `find` from any member once this returns.
    pub fn create(&self, id: &SessionId, tx: Option<TxId>) -> Result<MetaDataHandle<L>> {
        let options = Options::in_tx(tx).with(Flag::ForceSynchronous);

        let creation = CreationMetaDataEntry::new(CreationMetaData::new(
            Utc::now(),
            self.config.default_max_inactive_interval(),
        ));
        let creation = self
            .store
            .insert_if_absent(&CreationKey::<L>::new(id), creation, options)?;
        let access =
            self.store
                .insert_if_absent(&AccessKey::new(id), AccessMetaData::new(), options)?;

        debug!(
            session_id = %id,
            created = creation.is_inserted(),
            transactional = tx.is_some(),
            "Session metadata created"
        );

        Ok(MetaDataHandle {
            creation: creation.into_value(),
            access: access.into_value(),
        })
    }

    /// Look up the entries for `id`, waiting for the creation entry's lock
    /// when locking on read is enabled.
    ///
    /// A creation entry without its access entry is purged and reported as
    /// absent.
    pub fn find(&self, id: &SessionId, tx: Option<TxId>) -> Result<Option<MetaDataHandle<L>>> {
        self.lookup(id, tx, false)
    }

    /// Like [`find`](Self::find), but returns `None` immediately if the
    /// creation entry's lock is held elsewhere.
    pub fn try_find(
        &self,
        id: &SessionId,
        tx: Option<TxId>,
    ) -> Result<Option<MetaDataHandle<L>>> {
        self.lookup(id, tx, true)
    }

    fn lookup(
        &self,
        id: &SessionId,
        tx: Option<TxId>,
        fail_silently: bool,
    ) -> Result<Option<MetaDataHandle<L>>> {
        match self.get_entries(id, tx, fail_silently)? {
            Lookup::Found(handle) => Ok(Some(handle)),
            Lookup::Missing => {
                trace!(session_id = %id, "Session metadata not found");
                Ok(None)
            }
            Lookup::Orphaned => Ok(None),
        }
    }

    fn get_entries(
        &self,
        id: &SessionId,
        tx: Option<TxId>,
        fail_silently: bool,
    ) -> Result<Lookup<L>> {
        let creation_key = CreationKey::<L>::new(id);
        let read_options = Options::in_tx(tx)
            .with_if(Flag::ForceWriteLock, self.config.lock_on_read)
            .with_if(Flag::FailSilently, fail_silently);

        let Some(creation) = self.store.get(&creation_key, read_options)? else {
            return Ok(Lookup::Missing);
        };

        if let Some(access) = self.store.get(&AccessKey::new(id), Options::in_tx(tx))? {
            return Ok(Lookup::Found(MetaDataHandle { creation, access }));
        }

        warn!(session_id = %id, "Purging orphaned session creation metadata");
        self.store.remove(
            &creation_key,
            Options::in_tx(tx)
                .with(Flag::IgnoreReturnValues)
                .with(Flag::SkipListenerNotification),
        )?;
        Ok(Lookup::Orphaned)
    }

    /// Build a writable view of `handle`.
    ///
    /// Entries inserted by `tx` itself get a passive mutator; all others write
    /// on each mutation.
    pub fn to_mutable(
        &self,
        id: &SessionId,
        handle: MetaDataHandle<L>,
        tx: Option<TxId>,
    ) -> Result<MutableSessionMetaData<S, L>> {
        let MetaDataHandle { creation, access } = handle;

        let creation_mutator =
            Mutator::select(&self.store, CreationKey::<L>::new(id), creation.clone(), tx)?;
        let access_mutator = Mutator::select(&self.store, AccessKey::new(id), access.clone(), tx)?;

        trace!(
            session_id = %id,
            creation_passive = creation_mutator.is_passive(),
            access_passive = access_mutator.is_passive(),
            "Mutable session metadata"
        );

        Ok(MutableSessionMetaData::new(
            MutableCreationMetaData::new(creation, creation_mutator),
            MutableAccessMetaData::new(access, access_mutator),
        ))
    }

    /// Build a read-only snapshot of `handle`.
    pub fn to_immutable(
        &self,
        id: &SessionId,
        handle: &MetaDataHandle<L>,
    ) -> ReadOnlySessionMetaData<L> {
        trace!(session_id = %id, "Read-only session metadata");
        ReadOnlySessionMetaData::new(&handle.creation.read(), handle.access.get())
    }

    /// Delete both entries for `id`. Missing entries are not an error.
    ///
    /// The access entry goes first: an interrupted removal then leaves a
    /// creation entry behind, which the next lookup repairs.
    pub fn remove(&self, id: &SessionId, tx: Option<TxId>) -> Result<()> {
        let options = Options::in_tx(tx).with(Flag::IgnoreReturnValues);
        self.store.remove(&AccessKey::new(id), options)?;
        self.store.remove(&CreationKey::<L>::new(id), options)?;
        debug!(session_id = %id, "Session metadata removed");
        Ok(())
    }

    /// Drop both entries for `id` from the active tier only.
    pub fn evict(&self, id: &SessionId) -> Result<()> {
        self.store.evict(&CreationKey::<L>::new(id))?;
        self.store.evict(&AccessKey::new(id))?;
        debug!(session_id = %id, "Session metadata evicted");
        Ok(())
    }
}

impl<S, L> fmt::Debug for SessionMetaDataFactory<S, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMetaDataFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::SessionMetaData;
    use cairn_store::{
        EventKind, MemoryStore, StoreConfig, StoreError, StoreEvent, StoreListener,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration as StdDuration, Instant};

    type Factory = SessionMetaDataFactory<MemoryStore, String>;

    fn factory_with(config: StoreConfig) -> Factory {
        SessionMetaDataFactory::new(Arc::new(MemoryStore::new(config)), FactoryConfig::default())
    }

    fn factory() -> Factory {
        factory_with(StoreConfig::default())
    }

    fn sid(id: &str) -> SessionId {
        SessionId::new(id)
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<StoreEvent>>);

    impl StoreListener for Recorder {
        fn on_event(&self, event: &StoreEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[test]
    fn test_create_then_find() {
        let factory = factory();
        let id = sid("s1");

        let created = factory.create(&id, None).unwrap();
        assert!(created.is_new());
        assert_eq!(created.max_inactive_interval(), Duration::minutes(30));

        let found = factory.find(&id, None).unwrap().unwrap();
        assert_eq!(found.creation_time(), created.creation_time());
        assert_eq!(factory.store().stats().synchronous, 2);
    }

    #[test]
    fn test_find_missing() {
        let factory = factory();
        assert!(factory.find(&sid("nope"), None).unwrap().is_none());
        assert!(factory.try_find(&sid("nope"), None).unwrap().is_none());
    }

    #[test]
    fn test_concurrent_create_is_idempotent() {
        let factory = Arc::new(factory());
        let id = sid("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let factory = Arc::clone(&factory);
                let id = id.clone();
                thread::spawn(move || factory.create(&id, None).unwrap())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let first = &results[0];
        for other in &results[1..] {
            assert_eq!(other.creation_time(), first.creation_time());
            assert!(other.local_context().ptr_eq(&first.local_context()));
        }
        assert_eq!(factory.store().len(), 2);
        assert!(factory.store().peek_active(&CreationKey::<String>::new(&id)).is_some());
    }

    #[test]
    fn test_concurrent_create_in_transactions() {
        let factory = Arc::new(factory());
        let id = sid("tx-shared");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let factory = Arc::clone(&factory);
                let id = id.clone();
                thread::spawn(move || {
                    let tx = factory.store().begin();
                    let handle = factory.create(&id, Some(tx)).unwrap();
                    factory.store().commit(tx).unwrap();
                    handle.creation_time()
                })
            })
            .collect();
        let times: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let found = factory.find(&id, None).unwrap().unwrap();
        assert!(times.iter().all(|t| *t == found.creation_time()));
        assert_eq!(factory.store().len(), 2);
    }

    #[test]
    fn test_orphan_is_purged_silently() {
        let factory = factory();
        let id = sid("orphan");
        factory.create(&id, None).unwrap();

        // Simulate a node failure between the two writes.
        factory
            .store()
            .remove(&AccessKey::new(&id), Options::new())
            .unwrap();

        let recorder = Arc::new(Recorder::default());
        factory.store().add_listener(recorder.clone());

        assert!(factory.find(&id, None).unwrap().is_none());
        assert!(
            factory
                .store()
                .peek_active(&CreationKey::<String>::new(&id))
                .is_none()
        );
        assert!(recorder.0.lock().is_empty());

        // Repaired: a fresh create succeeds with new entries.
        let recreated = factory.create(&id, None).unwrap();
        assert!(recreated.is_new());
    }

    #[test]
    fn test_orphan_purge_inside_transaction() {
        let factory = factory();
        let id = sid("orphan-tx");
        factory.create(&id, None).unwrap();
        factory
            .store()
            .remove(&AccessKey::new(&id), Options::new())
            .unwrap();

        let tx = factory.store().begin();
        assert!(factory.try_find(&id, Some(tx)).unwrap().is_none());
        factory.store().commit(tx).unwrap();

        assert!(
            factory
                .store()
                .peek_active(&CreationKey::<String>::new(&id))
                .is_none()
        );
    }

    #[test]
    fn test_stray_access_entry_is_not_surfaced() {
        let factory = factory();
        let id = sid("stray");
        factory
            .store()
            .put(&AccessKey::new(&id), AccessMetaData::new(), Options::new())
            .unwrap();

        assert!(factory.find(&id, None).unwrap().is_none());

        factory.remove(&id, None).unwrap();
        assert!(factory.store().is_empty());
    }

    #[test]
    fn test_try_find_does_not_wait_for_lock() {
        let factory = Arc::new(factory());
        let id = sid("locked");
        factory.create(&id, None).unwrap();

        let holder = factory.store().begin();
        assert!(factory.find(&id, Some(holder)).unwrap().is_some());

        let started = Instant::now();
        let other = factory.store().begin();
        assert!(factory.try_find(&id, Some(other)).unwrap().is_none());
        assert!(started.elapsed() < StdDuration::from_millis(500));
        factory.store().rollback(other).unwrap();

        let blocked = {
            let factory = Arc::clone(&factory);
            let id = id.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let tx = factory.store().begin();
                let found = factory.find(&id, Some(tx)).unwrap().is_some();
                factory.store().commit(tx).unwrap();
                (found, started.elapsed())
            })
        };

        thread::sleep(StdDuration::from_millis(100));
        factory.store().commit(holder).unwrap();

        let (found, waited) = blocked.join().unwrap();
        assert!(found);
        assert!(waited >= StdDuration::from_millis(80));
    }

    #[test]
    fn test_find_without_lock_on_read_does_not_block() {
        let store = Arc::new(MemoryStore::default());
        let factory: Factory = SessionMetaDataFactory::new(
            Arc::clone(&store),
            FactoryConfig::default().with_lock_on_read(false),
        );
        let id = sid("unlocked");
        factory.create(&id, None).unwrap();

        let holder = store.begin();
        factory.find(&id, Some(holder)).unwrap().unwrap();
        assert!(!store.is_locked(&CreationKey::<String>::new(&id)));

        let other = store.begin();
        assert!(factory.try_find(&id, Some(other)).unwrap().is_some());
        store.commit(other).unwrap();
        store.commit(holder).unwrap();
    }

    #[test]
    fn test_blocking_find_times_out_as_store_failure() {
        let factory = factory_with(
            StoreConfig::new().with_lock_timeout(std::time::Duration::from_millis(20)),
        );
        let id = sid("timeout");
        factory.create(&id, None).unwrap();

        let holder = factory.store().begin();
        factory.find(&id, Some(holder)).unwrap();

        let err = factory.find(&id, None).unwrap_err();
        assert!(matches!(
            err,
            crate::SessionError::Store(StoreError::LockTimeout { .. })
        ));
        factory.store().rollback(holder).unwrap();
    }

    #[test]
    fn test_mutations_in_creating_tx_are_passive() {
        let factory = factory();
        let id = sid("fresh");
        let tx = factory.store().begin();

        let handle = factory.create(&id, Some(tx)).unwrap();
        let mut meta = factory.to_mutable(&id, handle, Some(tx)).unwrap();
        assert!(meta.creation().mutator().is_passive());
        assert!(meta.access().mutator().is_passive());

        let start = Utc::now();
        for i in 0..5 {
            meta.set_last_access(start, start + Duration::seconds(i))
                .unwrap();
        }
        meta.set_max_inactive_interval(Duration::minutes(5)).unwrap();
        assert_eq!(factory.store().stats().writes, 0);

        factory.store().commit(tx).unwrap();

        let found = factory.find(&id, None).unwrap().unwrap();
        assert_eq!(
            found.last_access_end_time(),
            Some(start + Duration::seconds(4))
        );
        assert_eq!(found.max_inactive_interval(), Duration::minutes(5));
        assert_eq!(factory.store().stats().writes, 0);
    }

    #[test]
    fn test_mutations_outside_tx_are_written() {
        let factory = factory();
        let id = sid("existing");
        factory.create(&id, None).unwrap();

        let handle = factory.find(&id, None).unwrap().unwrap();
        let mut meta = factory.to_mutable(&id, handle, None).unwrap();
        assert!(!meta.access().mutator().is_passive());

        let start = Utc::now();
        for i in 1..=3 {
            meta.set_last_access(start, start + Duration::seconds(i))
                .unwrap();
        }
        assert_eq!(factory.store().stats().writes, 3);

        let stored = factory
            .store()
            .peek_active(&AccessKey::new(&id))
            .unwrap();
        assert_eq!(
            stored.last_access_end_time(),
            Some(start + Duration::seconds(3))
        );
    }

    #[test]
    fn test_preexisting_entry_in_later_tx_is_active() {
        let factory = factory();
        let id = sid("later");
        factory.create(&id, None).unwrap();

        let tx = factory.store().begin();
        let handle = factory.find(&id, Some(tx)).unwrap().unwrap();
        let mut meta = factory.to_mutable(&id, handle, Some(tx)).unwrap();
        assert!(!meta.creation().mutator().is_passive());
        assert!(!meta.access().mutator().is_passive());

        let now = Utc::now();
        meta.set_last_access(now, now).unwrap();
        assert_eq!(factory.store().stats().writes, 1);
        factory.store().commit(tx).unwrap();

        let found = factory.find(&id, None).unwrap().unwrap();
        assert_eq!(found.last_access_start_time(), Some(now));
    }

    #[test]
    fn test_access_mutation_does_not_touch_creation_entry() {
        let factory = factory();
        let id = sid("split");
        factory.create(&id, None).unwrap();
        let creation_key = CreationKey::<String>::new(&id);
        let before = factory.store().version(&creation_key);

        let handle = factory.find(&id, None).unwrap().unwrap();
        let mut meta = factory.to_mutable(&id, handle, None).unwrap();
        let now = Utc::now();
        for i in 0..10 {
            meta.set_last_access(now, now + Duration::milliseconds(i))
                .unwrap();
        }

        assert_eq!(factory.store().version(&creation_key), before);
        assert_eq!(
            factory.store().version(&AccessKey::new(&id)),
            Some(11)
        );
    }

    #[test]
    fn test_invalid_mutation_is_rejected_without_write() {
        let factory = factory();
        let id = sid("invalid");
        let handle = factory.create(&id, None).unwrap();
        let mut meta = factory.to_mutable(&id, handle, None).unwrap();

        let err = meta
            .set_max_inactive_interval(Duration::seconds(-10))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::SessionError::InvalidMaxInactiveInterval(-10)
        ));

        let now = Utc::now();
        assert!(
            meta.set_last_access(now, now - Duration::seconds(1))
                .is_err()
        );
        assert_eq!(factory.store().stats().writes, 0);
    }

    #[test]
    fn test_immutable_snapshot() {
        let factory = factory();
        let id = sid("snapshot");
        let handle = factory.create(&id, None).unwrap();
        handle.local_context().set("ctx".to_string());

        let snapshot = factory.to_immutable(&id, &handle);
        let mut meta = factory.to_mutable(&id, handle, None).unwrap();
        meta.set_max_inactive_interval(Duration::minutes(1)).unwrap();

        assert_eq!(snapshot.max_inactive_interval(), Duration::minutes(30));
        assert_eq!(snapshot.local_context().get(), Some("ctx".to_string()));
    }

    #[test]
    fn test_remove_deletes_both_tiers() {
        let factory = factory_with(StoreConfig::new().with_durable(true));
        let id = sid("gone");
        factory.create(&id, None).unwrap();

        factory.remove(&id, None).unwrap();
        assert!(factory.find(&id, None).unwrap().is_none());
        assert!(
            factory
                .store()
                .peek_durable(&CreationKey::<String>::new(&id))
                .is_none()
        );
        assert!(factory.store().peek_durable(&AccessKey::new(&id)).is_none());

        // missing is fine
        factory.remove(&id, None).unwrap();
    }

    #[test]
    fn test_evict_keeps_durable_copy() {
        let factory = factory_with(StoreConfig::new().with_durable(true));
        let id = sid("passivated");
        let created = factory.create(&id, None).unwrap();

        factory.evict(&id).unwrap();
        let creation_key = CreationKey::<String>::new(&id);
        assert!(factory.store().peek_active(&creation_key).is_none());
        assert!(factory.store().peek_active(&AccessKey::new(&id)).is_none());
        assert_eq!(
            factory
                .store()
                .peek_durable(&creation_key)
                .map(|e| e.meta_data().creation_time()),
            Some(created.creation_time())
        );

        let found = factory.find(&id, None).unwrap().unwrap();
        assert_eq!(found.creation_time(), created.creation_time());
        assert_eq!(factory.store().stats().activations, 2);
    }

    #[test]
    fn test_evict_missing_is_ok() {
        let factory = factory();
        factory.evict(&sid("never")).unwrap();
    }

    #[test]
    fn test_remove_notifies_listeners() {
        let factory = factory();
        let recorder = Arc::new(Recorder::default());
        factory.store().add_listener(recorder.clone());

        let id = sid("events");
        factory.create(&id, None).unwrap();
        factory.remove(&id, None).unwrap();

        let removed = recorder
            .0
            .lock()
            .iter()
            .filter(|e| e.kind == EventKind::Removed)
            .count();
        assert_eq!(removed, 2);
    }

    #[test]
    fn test_unlocked_find_racing_commit_keeps_session_whole() {
        let store = Arc::new(MemoryStore::default());
        let factory: Arc<Factory> = Arc::new(SessionMetaDataFactory::new(
            Arc::clone(&store),
            FactoryConfig::default().with_lock_on_read(false),
        ));

        for i in 0..500 {
            let id = sid(&format!("race-{i}"));
            let done = Arc::new(AtomicBool::new(false));
            let reader = {
                let factory = Arc::clone(&factory);
                let id = id.clone();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        factory.find(&id, None).unwrap();
                    }
                })
            };

            let tx = store.begin();
            factory.create(&id, Some(tx)).unwrap();
            store.commit(tx).unwrap();
            done.store(true, Ordering::Release);
            reader.join().unwrap();

            let creation = store.peek_active(&CreationKey::<String>::new(&id)).is_some();
            let access = store.peek_active(&AccessKey::new(&id)).is_some();
            assert!(
                creation && access,
                "{id}: creation={creation} access={access}"
            );
        }
    }
}
