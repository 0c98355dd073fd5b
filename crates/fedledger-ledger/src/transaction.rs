//! Optimistic transactions.
//!
//! A [`Transaction`] reads committed state directly from the backend and
//! remembers what it saw. Writes are buffered. At commit the backend checks,
//! under its commit lock, that every recorded observation still holds; if
//! any does not, nothing is applied and the caller gets a conflict.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::{HistoryEntry, LedgerBackend, Partition, StateKey, Version};

/// A point read: the key and the version observed (`None` if absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRead {
    pub partition: Partition,
    pub key: StateKey,
    pub observed: Option<Version>,
}

/// A prefix scan and every (key, version) it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRead {
    pub partition: Partition,
    pub prefix: StateKey,
    pub observed: Vec<(StateKey, Version)>,
}

/// A buffered write. `value == None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub partition: Partition,
    pub key: StateKey,
    pub value: Option<Vec<u8>>,
}

/// Everything a backend needs to validate and apply a transaction.
#[derive(Debug, Clone, Default)]
pub struct CommitBatch {
    pub reads: Vec<PointRead>,
    pub ranges: Vec<RangeRead>,
    pub writes: Vec<Write>,
}

/// Read access to committed state, used for commit-time validation.
pub trait CommittedView {
    fn version_of(&self, partition: &Partition, key: &StateKey) -> Result<Option<Version>>;
    fn versions_under(
        &self,
        partition: &Partition,
        prefix: &StateKey,
    ) -> Result<Vec<(StateKey, Version)>>;
}

impl CommitBatch {
    /// Check every observation against the committed view.
    pub fn validate<V: CommittedView + ?Sized>(&self, view: &V) -> Result<()> {
        for read in &self.reads {
            if view.version_of(&read.partition, &read.key)? != read.observed {
                return Err(Error::Conflict {
                    key: format!("{}/{}", read.partition, read.key),
                });
            }
        }
        for range in &self.ranges {
            if view.versions_under(&range.partition, &range.prefix)? != range.observed {
                return Err(Error::PhantomRead {
                    prefix: format!("{}/{}", range.partition, range.prefix),
                });
            }
        }
        Ok(())
    }

    /// Whether the batch changes any state.
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// One invocation's view of the ledger.
///
/// Dropping a transaction without calling [`Transaction::commit`] discards
/// every buffered write.
pub struct Transaction<'l, B: LedgerBackend + ?Sized> {
    backend: &'l B,
    reads: BTreeMap<(Partition, StateKey), Option<Version>>,
    ranges: Vec<RangeRead>,
    writes: BTreeMap<(Partition, StateKey), Option<Vec<u8>>>,
}

impl<'l, B: LedgerBackend + ?Sized> Transaction<'l, B> {
    /// Begin a transaction against `backend`.
    pub fn new(backend: &'l B) -> Self {
        Self {
            backend,
            reads: BTreeMap::new(),
            ranges: Vec::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Read a world-state key.
    pub fn get_state(&mut self, key: &StateKey) -> Result<Option<Vec<u8>>> {
        self.read(Partition::World, key)
    }

    /// Buffer a world-state write.
    pub fn put_state(&mut self, key: StateKey, value: Vec<u8>) {
        self.writes.insert((Partition::World, key), Some(value));
    }

    /// Buffer a world-state delete.
    pub fn delete_state(&mut self, key: StateKey) {
        self.writes.insert((Partition::World, key), None);
    }

    /// Read a key from a private collection.
    pub fn get_private(&mut self, collection: &str, key: &StateKey) -> Result<Option<Vec<u8>>> {
        self.read(Partition::Private(collection.to_string()), key)
    }

    /// Buffer a write into a private collection.
    pub fn put_private(&mut self, collection: &str, key: StateKey, value: Vec<u8>) {
        self.writes
            .insert((Partition::Private(collection.to_string()), key), Some(value));
    }

    /// Scan committed world state under `prefix`, in key order.
    ///
    /// Scans see committed state only, not this transaction's own writes.
    pub fn scan_prefix(&mut self, prefix: &StateKey) -> Result<Vec<(StateKey, Vec<u8>)>> {
        let entries = self.backend.scan_prefix(&Partition::World, prefix)?;
        self.ranges.push(RangeRead {
            partition: Partition::World,
            prefix: prefix.clone(),
            observed: entries.iter().map(|(k, v)| (k.clone(), v.version)).collect(),
        });
        Ok(entries.into_iter().map(|(k, v)| (k, v.value)).collect())
    }

    /// Committed history of a world-state key, oldest first. Not validated
    /// at commit.
    pub fn history(&self, key: &StateKey) -> Result<Vec<HistoryEntry>> {
        self.backend.history(key)
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Validate and apply. Returns the ledger height after commit.
    pub fn commit(self) -> Result<Version> {
        let batch = CommitBatch {
            reads: self
                .reads
                .into_iter()
                .map(|((partition, key), observed)| PointRead {
                    partition,
                    key,
                    observed,
                })
                .collect(),
            ranges: self.ranges,
            writes: self
                .writes
                .into_iter()
                .map(|((partition, key), value)| Write {
                    partition,
                    key,
                    value,
                })
                .collect(),
        };
        let height = self.backend.commit(batch)?;
        Ok(height)
    }

    fn read(&mut self, partition: Partition, key: &StateKey) -> Result<Option<Vec<u8>>> {
        let slot = (partition, key.clone());
        if let Some(pending) = self.writes.get(&slot) {
            return Ok(pending.clone());
        }
        let committed = self.backend.get(&slot.0, key)?;
        let observed = committed.as_ref().map(|v| v.version);
        self.reads.entry(slot).or_insert(observed);
        Ok(committed.map(|v| v.value))
    }
}
