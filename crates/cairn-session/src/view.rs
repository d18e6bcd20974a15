//! Mutable and read-only views over session metadata.

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use cairn_store::{KeyValueStore, Shared};

use crate::error::Result;
use crate::key::{AccessKey, CreationKey};
use crate::metadata::{
    AccessMetaData, CreationMetaData, CreationMetaDataEntry, ImmutableSessionMetaData,
    LocalContext, SessionMetaData,
};
use crate::mutator::Mutator;

/// Writable view of a creation entry.
pub struct MutableCreationMetaData<S, L: Send + Sync + 'static> {
    entry: Shared<CreationMetaDataEntry<L>>,
    mutator: Mutator<S, CreationKey<L>>,
}

impl<S: KeyValueStore, L: Send + Sync + 'static> MutableCreationMetaData<S, L> {
    pub fn new(
        entry: Shared<CreationMetaDataEntry<L>>,
        mutator: Mutator<S, CreationKey<L>>,
    ) -> Self {
        Self { entry, mutator }
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.entry.read().meta_data().creation_time()
    }

    pub fn max_inactive_interval(&self) -> Duration {
        self.entry.read().meta_data().max_inactive_interval()
    }

    pub fn local_context(&self) -> LocalContext<L> {
        self.entry.read().local_context().clone()
    }

    pub fn mutator(&self) -> &Mutator<S, CreationKey<L>> {
        &self.mutator
    }

    pub fn set_max_inactive_interval(&mut self, interval: Duration) -> Result<()> {
        self.entry
            .write()
            .meta_data_mut()
            .set_max_inactive_interval(interval)?;
        self.mutator.mutate()?;
        Ok(())
    }
}

/// Writable view of an access entry.
pub struct MutableAccessMetaData<S> {
    entry: Shared<AccessMetaData>,
    mutator: Mutator<S, AccessKey>,
}

impl<S: KeyValueStore> MutableAccessMetaData<S> {
    pub fn new(entry: Shared<AccessMetaData>, mutator: Mutator<S, AccessKey>) -> Self {
        Self { entry, mutator }
    }

    pub fn last_access_start_time(&self) -> Option<DateTime<Utc>> {
        self.entry.read().last_access_start_time()
    }

    pub fn last_access_end_time(&self) -> Option<DateTime<Utc>> {
        self.entry.read().last_access_end_time()
    }

    pub fn mutator(&self) -> &Mutator<S, AccessKey> {
        &self.mutator
    }

    pub fn set_last_access(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        self.entry.write().set_last_access(start, end)?;
        self.mutator.mutate()?;
        Ok(())
    }
}

/// Writable session metadata, persisting each entry through its own mutator.
///
/// Recording an access only ever writes the access entry; changing the max
/// inactive interval only ever writes the creation entry.
pub struct MutableSessionMetaData<S, L: Send + Sync + 'static> {
    creation: MutableCreationMetaData<S, L>,
    access: MutableAccessMetaData<S>,
}

impl<S: KeyValueStore, L: Send + Sync + 'static> MutableSessionMetaData<S, L> {
    pub fn new(creation: MutableCreationMetaData<S, L>, access: MutableAccessMetaData<S>) -> Self {
        Self { creation, access }
    }

    pub fn creation(&self) -> &MutableCreationMetaData<S, L> {
        &self.creation
    }

    pub fn access(&self) -> &MutableAccessMetaData<S> {
        &self.access
    }

    pub fn local_context(&self) -> LocalContext<L> {
        self.creation.local_context()
    }
}

impl<S: KeyValueStore, L: Send + Sync + 'static> ImmutableSessionMetaData
    for MutableSessionMetaData<S, L>
{
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation.creation_time()
    }

    fn max_inactive_interval(&self) -> Duration {
        self.creation.max_inactive_interval()
    }

    fn last_access_start_time(&self) -> Option<DateTime<Utc>> {
        self.access.last_access_start_time()
    }

    fn last_access_end_time(&self) -> Option<DateTime<Utc>> {
        self.access.last_access_end_time()
    }
}

impl<S: KeyValueStore, L: Send + Sync + 'static> SessionMetaData for MutableSessionMetaData<S, L> {
    fn set_max_inactive_interval(&mut self, interval: Duration) -> Result<()> {
        trace!(seconds = interval.num_seconds(), "Setting max inactive interval");
        self.creation.set_max_inactive_interval(interval)
    }

    fn set_last_access(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        self.access.set_last_access(start, end)
    }
}

/// Snapshot of session metadata with no way to write it back.
pub struct ReadOnlySessionMetaData<L> {
    creation: CreationMetaData,
    access: AccessMetaData,
    local_context: LocalContext<L>,
}

impl<L> ReadOnlySessionMetaData<L> {
    pub fn new(entry: &CreationMetaDataEntry<L>, access: AccessMetaData) -> Self {
        Self {
            creation: entry.meta_data().clone(),
            access,
            local_context: entry.local_context().clone(),
        }
    }

    pub fn local_context(&self) -> &LocalContext<L> {
        &self.local_context
    }
}

impl<L> Clone for ReadOnlySessionMetaData<L> {
    fn clone(&self) -> Self {
        Self {
            creation: self.creation.clone(),
            access: self.access.clone(),
            local_context: self.local_context.clone(),
        }
    }
}

impl<L> std::fmt::Debug for ReadOnlySessionMetaData<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlySessionMetaData")
            .field("creation", &self.creation)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

impl<L> ImmutableSessionMetaData for ReadOnlySessionMetaData<L> {
    fn creation_time(&self) -> DateTime<Utc> {
        self.creation.creation_time()
    }

    fn max_inactive_interval(&self) -> Duration {
        self.creation.max_inactive_interval()
    }

    fn last_access_start_time(&self) -> Option<DateTime<Utc>> {
        self.access.last_access_start_time()
    }

    fn last_access_end_time(&self) -> Option<DateTime<Utc>> {
        self.access.last_access_end_time()
    }
}
