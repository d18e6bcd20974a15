//! Session metadata over a replicated key-value store.
//!
//! Each session is stored as two colocated entries:
//! - a creation entry (creation time, max inactive interval, local context)
//! - an access entry (last access start/end), rewritten on every request
//!
//! [`SessionMetaDataFactory`] creates, finds, repairs, removes and evicts
//! these entries, and hands out views whose [`Mutator`] decides whether a
//! change needs an explicit store write.
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn_session::{FactoryConfig, SessionId, SessionMetaData, SessionMetaDataFactory};
//! use cairn_store::{KeyValueStore, MemoryStore, StoreConfig};
//!
//! let store = Arc::new(MemoryStore::new(StoreConfig::default()));
//! let factory = SessionMetaDataFactory::<_, ()>::new(store.clone(), FactoryConfig::default());
//!
//! let id = SessionId::generate();
//! let tx = store.begin();
//! let handle = factory.create(&id, Some(tx))?;
//! let mut meta = factory.to_mutable(&id, handle, Some(tx))?;
//! meta.set_last_access(start, end)?;
//! store.commit(tx)?;
//! ```

mod config;
mod error;
mod factory;
mod key;
mod metadata;
mod mutator;
mod view;

pub use config::{DEFAULT_MAX_INACTIVE_INTERVAL_SECS, FactoryConfig};
pub use error::{Result, SessionError};
pub use factory::{MetaDataHandle, SessionMetaDataFactory};
pub use key::{AccessKey, CreationKey, SessionId};
pub use metadata::{
    AccessMetaData, CreationMetaData, CreationMetaDataEntry, ImmutableSessionMetaData,
    LocalContext, SessionMetaData,
};
pub use mutator::{EntryMutator, Mutator};
pub use view::{
    MutableAccessMetaData, MutableCreationMetaData, MutableSessionMetaData,
    ReadOnlySessionMetaData,
};
