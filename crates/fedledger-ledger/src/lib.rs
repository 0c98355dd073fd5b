//! Fedledger Ledger
//!
//! A replicated-ledger stand-in: versioned key-value state, per-key history,
//! access-restricted private collections, and optimistic transactions.
//!
//! # Design
//!
//! Every invocation runs inside one [`Transaction`]. Reads go straight to
//! committed state and are remembered together with the version they saw;
//! writes are buffered. On commit the backend re-checks every observation
//! under its commit lock. A transaction whose reads were invalidated by a
//! concurrent commit is rejected wholesale with [`Error::Conflict`] or
//! [`Error::PhantomRead`] and must be re-executed by its caller.
//!
//! # Backends
//!
//! - [`MemoryLedger`] - in-process, for tests and embedding
//! - [`RocksLedger`] - persistent, RocksDB-backed

mod entry;
mod error;
mod key;
mod memory;
mod rocks;
mod transaction;

pub use entry::{HistoryEntry, Partition, Version, Versioned};
pub use error::{Error, Result};
pub use key::StateKey;
pub use memory::MemoryLedger;
pub use rocks::RocksLedger;
pub use transaction::{CommitBatch, CommittedView, PointRead, RangeRead, Transaction, Write};

/// Storage behind a [`Transaction`].
pub trait LedgerBackend: Send + Sync {
    /// Read one committed key.
    fn get(&self, partition: &Partition, key: &StateKey) -> Result<Option<Versioned>>;

    /// Read every committed key under `prefix`, in key order.
    fn scan_prefix(
        &self,
        partition: &Partition,
        prefix: &StateKey,
    ) -> Result<Vec<(StateKey, Versioned)>>;

    /// Committed modifications of a world-state key, oldest first.
    fn history(&self, key: &StateKey) -> Result<Vec<HistoryEntry>>;

    /// Number of committed transactions that changed state.
    fn height(&self) -> Result<Version>;

    /// Validate `batch` against committed state and apply it atomically.
    fn commit(&self, batch: CommitBatch) -> Result<Version>;

    /// Begin a transaction.
    fn begin(&self) -> Transaction<'_, Self>
    where
        Self: Sized,
    {
        Transaction::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn composite_keys_never_collide(
            a in proptest::collection::vec("[a-z0-9]{0,4}", 1..4),
            b in proptest::collection::vec("[a-z0-9]{0,4}", 1..4),
        ) {
            let ka = StateKey::composite("Client", &a).unwrap();
            let kb = StateKey::composite("Client", &b).unwrap();
            prop_assert_eq!(a == b, ka == kb);
        }
    }

    #[test]
    fn begin_uses_backend() {
        let ledger = MemoryLedger::new();
        let mut tx = ledger.begin();
        tx.put_state(StateKey::simple("k").unwrap(), b"v".to_vec());
        assert_eq!(tx.commit().unwrap(), Version(1));
        assert_eq!(ledger.height().unwrap(), Version(1));
    }
}
