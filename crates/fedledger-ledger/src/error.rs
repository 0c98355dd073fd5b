//! Error types for the ledger.

use thiserror::Error;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ledger operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A key read by the transaction was changed by a concurrent commit.
    #[error("read conflict on key {key}")]
    Conflict { key: String },

    /// A range scanned by the transaction gained, lost or changed a key.
    #[error("phantom read under prefix {prefix}")]
    PhantomRead { prefix: String },

    /// Key could not be built or decoded.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the transaction was rejected by commit-time validation and
    /// may succeed if re-executed in full.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::PhantomRead { .. })
    }
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
