//! Session identifiers and the two store keys derived from them.
//!
//! Both keys route on the session id, so the creation and access entries of
//! one session always share a partition.

use std::fmt;
use std::marker::PhantomData;

use cairn_store::CacheKey;

use crate::metadata::{AccessMetaData, CreationMetaDataEntry};

/// Opaque session identifier, generated outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Key of a session's creation entry.
pub struct CreationKey<L> {
    id: SessionId,
    _context: PhantomData<fn() -> L>,
}

impl<L> CreationKey<L> {
    pub fn new(id: &SessionId) -> Self {
        Self {
            id: id.clone(),
            _context: PhantomData,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }
}

impl<L> Clone for CreationKey<L> {
    fn clone(&self) -> Self {
        Self::new(&self.id)
    }
}

impl<L> fmt::Debug for CreationKey<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CreationKey").field(&self.id.0).finish()
    }
}

impl<L: Send + Sync + 'static> CacheKey for CreationKey<L> {
    type Value = CreationMetaDataEntry<L>;
    const NAMESPACE: &'static str = "session-creation";

    fn route(&self) -> &str {
        self.id.as_str()
    }
}

/// Key of a session's access entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessKey(SessionId);

impl AccessKey {
    pub fn new(id: &SessionId) -> Self {
        Self(id.clone())
    }

    pub fn id(&self) -> &SessionId {
        &self.0
    }
}

impl CacheKey for AccessKey {
    type Value = AccessMetaData;
    const NAMESPACE: &'static str = "session-access";

    fn route(&self) -> &str {
        self.0.as_str()
    }
}
