//! Key-value store contract for Cairn.
//!
//! The session layer treats the distributed cache as an external collaborator.
//! This crate pins down the narrow interface it relies on:
//! - [`KeyValueStore`]: reads, conditional inserts, writes, removal, eviction
//!   and transaction boundaries
//! - [`Options`]/[`Flag`]: per-call consistency modifiers
//! - [`CacheKey`]: typed keys whose routing string decides the partition
//!
//! [`MemoryStore`] is an in-process implementation of the contract, used by
//! the test suites and the `cairn` CLI.
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn_store::{KeyValueStore, MemoryStore, Options, Flag, StoreConfig};
//!
//! let store = MemoryStore::new(StoreConfig::default().with_durable(true));
//! let tx = store.begin();
//! store.insert_if_absent(&key, value, Options::in_tx(Some(tx)).with(Flag::ForceSynchronous))?;
//! store.commit(tx)?;
//! ```

mod config;
mod error;
mod flags;
mod key;
mod memory;
mod shared;
mod store;
mod transaction;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use flags::{Flag, Flags, Options};
pub use key::{CacheKey, StoreKey, partition_of};
pub use memory::{MemoryStore, StoreStats};
pub use shared::Shared;
pub use store::{EventKind, Insertion, KeyValueStore, StoreEvent, StoreListener};
pub use transaction::TxId;
