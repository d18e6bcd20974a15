//! Per-call consistency flags.
//!
//! Each store call receives its modifiers explicitly through [`Options`]
//! rather than through a stateful view of the store.

use std::fmt;

use crate::transaction::TxId;

/// A single per-call modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flag {
    /// Acquire the key's write lock on read, held until the transaction ends.
    ForceWriteLock = 1 << 0,
    /// If a lock cannot be acquired immediately, give up and report absence.
    FailSilently = 1 << 1,
    /// Wait for replication acknowledgment before returning.
    ForceSynchronous = 1 << 2,
    /// Do not notify registered listeners of this operation.
    SkipListenerNotification = 1 << 3,
    /// The caller does not need the previous value.
    IgnoreReturnValues = 1 << 4,
}

impl Flag {
    const ALL: [Flag; 5] = [
        Flag::ForceWriteLock,
        Flag::FailSilently,
        Flag::ForceSynchronous,
        Flag::SkipListenerNotification,
        Flag::IgnoreReturnValues,
    ];
}

/// A set of [`Flag`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, flag: Flag) -> Self {
        Self(self.0 | flag as u8)
    }

    pub const fn contains(self, flag: Flag) -> bool {
        self.0 & flag as u8 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(Flag::ALL.iter().filter(|flag| self.contains(**flag)))
            .finish()
    }
}

impl From<Flag> for Flags {
    fn from(flag: Flag) -> Self {
        Self::empty().with(flag)
    }
}

/// Options accompanying a single store call: flags plus the ambient transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    flags: Flags,
    tx: Option<TxId>,
}

impl Options {
    /// No flags, no transaction.
    pub const fn new() -> Self {
        Self {
            flags: Flags::empty(),
            tx: None,
        }
    }

    /// No flags, bound to the given transaction (if any).
    pub const fn in_tx(tx: Option<TxId>) -> Self {
        Self {
            flags: Flags::empty(),
            tx,
        }
    }

    /// Add a flag.
    pub const fn with(mut self, flag: Flag) -> Self {
        self.flags = self.flags.with(flag);
        self
    }

    /// Add a flag only when `enabled`.
    pub const fn with_if(self, flag: Flag, enabled: bool) -> Self {
        if enabled { self.with(flag) } else { self }
    }

    pub const fn flags(&self) -> Flags {
        self.flags
    }

    pub const fn tx(&self) -> Option<TxId> {
        self.tx
    }

    pub const fn has(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }
}
