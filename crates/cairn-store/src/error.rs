//! Error types for store operations.

use crate::transaction::TxId;

/// Failure raised by the underlying key-value store.
///
/// Callers of the session layer see these unchanged; nothing in Cairn
/// retries a failed store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A blocking lock acquisition did not complete within the configured timeout.
    #[error("Timed out waiting for lock on {key}")]
    LockTimeout { key: String },

    /// The transaction was already committed, rolled back, or never begun.
    #[error("Transaction not active: {0}")]
    TransactionNotActive(TxId),

    /// The stored value does not have the type the key declares.
    #[error("Stored value for {key} has an unexpected type")]
    TypeMismatch { key: String },

    /// The store could not service the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
