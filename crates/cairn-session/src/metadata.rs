//! Session metadata records.
//!
//! Metadata is split across two store entries. [`CreationMetaData`] is written
//! once and rarely touched afterwards; [`AccessMetaData`] changes on every
//! request. Keeping them apart means recording an access never replicates
//! the creation fields, and vice versa.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::error::{Result, SessionError};

/// Read access to the combined metadata of a session.
pub trait ImmutableSessionMetaData {
    fn creation_time(&self) -> DateTime<Utc>;

    /// Zero means the session never expires.
    fn max_inactive_interval(&self) -> Duration;

    fn last_access_start_time(&self) -> Option<DateTime<Utc>>;

    fn last_access_end_time(&self) -> Option<DateTime<Utc>>;

    /// Whether no access has been recorded yet.
    fn is_new(&self) -> bool {
        self.last_access_start_time().is_none()
    }

    /// Whether the session has been idle longer than its max inactive interval.
    ///
    /// Idle time counts from the end of the last access, or from creation if
    /// the session was never accessed.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let interval = self.max_inactive_interval();
        if interval <= Duration::zero() {
            return false;
        }
        let idle_since = self
            .last_access_end_time()
            .unwrap_or_else(|| self.creation_time());
        now - idle_since > interval
    }
}

/// Write access to the combined metadata of a session.
///
/// Every setter persists through the entry's mutator, so a store failure can
/// surface here.
pub trait SessionMetaData: ImmutableSessionMetaData {
    fn set_max_inactive_interval(&mut self, interval: Duration) -> Result<()>;

    fn set_last_access(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()>;
}

/// Creation-time attributes of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationMetaData {
    creation_time: DateTime<Utc>,
    max_inactive_interval: Duration,
}

impl CreationMetaData {
    pub fn new(creation_time: DateTime<Utc>, max_inactive_interval: Duration) -> Self {
        Self {
            creation_time,
            max_inactive_interval: max_inactive_interval.max(Duration::zero()),
        }
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn max_inactive_interval(&self) -> Duration {
        self.max_inactive_interval
    }

    pub fn set_max_inactive_interval(&mut self, interval: Duration) -> Result<()> {
        if interval < Duration::zero() {
            return Err(SessionError::InvalidMaxInactiveInterval(
                interval.num_seconds(),
            ));
        }
        self.max_inactive_interval = interval;
        Ok(())
    }
}

/// Access timestamps of a session. Updated on every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessMetaData {
    last_access_start: Option<DateTime<Utc>>,
    last_access_end: Option<DateTime<Utc>>,
}

impl AccessMetaData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_access_start_time(&self) -> Option<DateTime<Utc>> {
        self.last_access_start
    }

    pub fn last_access_end_time(&self) -> Option<DateTime<Utc>> {
        self.last_access_end
    }

    pub fn set_last_access(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        if end < start {
            return Err(SessionError::InvalidAccessInterval { start, end });
        }
        self.last_access_start = Some(start);
        self.last_access_end = Some(end);
        Ok(())
    }
}

/// Process-local payload attached to a creation entry.
///
/// The slot starts empty and is filled by the caller. Every handle to the same
/// entry within a process shares one slot; nothing here interprets `L`.
pub struct LocalContext<L>(Arc<Mutex<Option<L>>>);

impl<L> LocalContext<L> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// Run `f` against the slot.
    pub fn with<R>(&self, f: impl FnOnce(&mut Option<L>) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, value: L) -> Option<L> {
        self.0.lock().replace(value)
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Whether both handles share one slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<L: Clone> LocalContext<L> {
    pub fn get(&self) -> Option<L> {
        self.0.lock().clone()
    }

    /// Return the current value, initialising it with `init` if empty.
    pub fn get_or_init(&self, init: impl FnOnce() -> L) -> L {
        self.0.lock().get_or_insert_with(init).clone()
    }
}

impl<L> Default for LocalContext<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> Clone for LocalContext<L> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<L> fmt::Debug for LocalContext<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalContext")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Value stored under a [`CreationKey`](crate::CreationKey).
pub struct CreationMetaDataEntry<L> {
    meta_data: CreationMetaData,
    local_context: LocalContext<L>,
}

impl<L> CreationMetaDataEntry<L> {
    pub fn new(meta_data: CreationMetaData) -> Self {
        Self {
            meta_data,
            local_context: LocalContext::new(),
        }
    }

    pub fn meta_data(&self) -> &CreationMetaData {
        &self.meta_data
    }

    pub fn meta_data_mut(&mut self) -> &mut CreationMetaData {
        &mut self.meta_data
    }

    pub fn local_context(&self) -> &LocalContext<L> {
        &self.local_context
    }
}

impl<L> Clone for CreationMetaDataEntry<L> {
    fn clone(&self) -> Self {
        Self {
            meta_data: self.meta_data.clone(),
            local_context: self.local_context.clone(),
        }
    }
}

impl<L> fmt::Debug for CreationMetaDataEntry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreationMetaDataEntry")
            .field("meta_data", &self.meta_data)
            .field("local_context", &self.local_context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Snapshot {
        creation: CreationMetaData,
        access: AccessMetaData,
    }

    impl ImmutableSessionMetaData for Snapshot {
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

    #[test]
    fn test_negative_interval_rejected() {
        let mut meta = CreationMetaData::new(at(0), Duration::minutes(30));
        let err = meta
            .set_max_inactive_interval(Duration::seconds(-1))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidMaxInactiveInterval(-1)));
        assert_eq!(meta.max_inactive_interval(), Duration::minutes(30));
    }

    #[test]
    fn test_access_interval_must_be_ordered() {
        let mut access = AccessMetaData::new();
        assert!(access.set_last_access(at(10), at(5)).is_err());
        assert_eq!(access.last_access_start_time(), None);

        access.set_last_access(at(10), at(10)).unwrap();
        assert_eq!(access.last_access_end_time(), Some(at(10)));
    }

    #[test]
    fn test_expiration() {
        let mut snapshot = Snapshot {
            creation: CreationMetaData::new(at(0), Duration::seconds(60)),
            access: AccessMetaData::new(),
        };
        assert!(snapshot.is_new());
        assert!(!snapshot.is_expired(at(60)));
        assert!(snapshot.is_expired(at(61)));

        snapshot.access.set_last_access(at(100), at(110)).unwrap();
        assert!(!snapshot.is_new());
        assert!(!snapshot.is_expired(at(170)));
        assert!(snapshot.is_expired(at(171)));
    }

    #[test]
    fn test_zero_interval_never_expires() {
        let snapshot = Snapshot {
            creation: CreationMetaData::new(at(0), Duration::zero()),
            access: AccessMetaData::new(),
        };
        assert!(!snapshot.is_expired(at(1_000_000)));
    }

    #[test]
    fn test_local_context_shared_between_clones() {
        let entry = CreationMetaDataEntry::<String>::new(CreationMetaData::new(
            at(0),
            Duration::zero(),
        ));
        let copy = entry.clone();

        assert_eq!(copy.local_context().get_or_init(|| "ctx".to_string()), "ctx");
        assert_eq!(entry.local_context().get(), Some("ctx".to_string()));
        assert!(entry.local_context().ptr_eq(copy.local_context()));
    }
}
