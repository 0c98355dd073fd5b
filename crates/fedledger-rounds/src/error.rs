//! Error types for the round exchange.

use thiserror::Error;

use crate::models::Round;

/// Result type for round exchange operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in round exchange operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller has no participant state.
    #[error("participant {0} is not registered")]
    NotRegistered(String),

    /// A write-once record already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No record for the requested round.
    #[error("round {0} not found")]
    RoundNotFound(Round),

    /// Token balance below the cost of the operation.
    #[error("participant {name} has {balance} tokens, {required} required")]
    InsufficientTokens {
        name: String,
        balance: f64,
        required: f64,
    },

    /// Invalid input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Stored state breaks an invariant the exchange relies on.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Caller role may not perform the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Ledger error, including commit conflicts
    #[error("Ledger error: {0}")]
    Ledger(fedledger_ledger::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the invocation was rejected at commit because a concurrent
    /// transaction changed what it read. The caller may retry in full.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Ledger(e) if e.is_conflict())
    }
}

impl From<fedledger_ledger::Error> for Error {
    fn from(e: fedledger_ledger::Error) -> Self {
        match e {
            fedledger_ledger::Error::InvalidKey(reason) => Error::MalformedInput(reason),
            other => Error::Ledger(other),
        }
    }
}
