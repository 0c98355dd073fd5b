//! In-memory ledger backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::transaction::{CommitBatch, CommittedView};
use crate::{HistoryEntry, LedgerBackend, Partition, StateKey, Version, Versioned};

#[derive(Debug, Default)]
struct Inner {
    height: Version,
    entries: BTreeMap<(Partition, StateKey), Versioned>,
    history: HashMap<StateKey, Vec<HistoryEntry>>,
}

impl CommittedView for Inner {
    fn version_of(&self, partition: &Partition, key: &StateKey) -> Result<Option<Version>> {
        Ok(self
            .entries
            .get(&(partition.clone(), key.clone()))
            .map(|v| v.version))
    }

    fn versions_under(
        &self,
        partition: &Partition,
        prefix: &StateKey,
    ) -> Result<Vec<(StateKey, Version)>> {
        Ok(self
            .scan(partition, prefix)
            .map(|(k, v)| (k.clone(), v.version))
            .collect())
    }
}

impl Inner {
    fn scan<'a>(
        &'a self,
        partition: &'a Partition,
        prefix: &'a StateKey,
    ) -> impl Iterator<Item = (&'a StateKey, &'a Versioned)> + 'a {
        self.entries
            .range((partition.clone(), prefix.clone())..)
            .take_while(move |((p, k), _)| p == partition && k.starts_with(prefix))
            .map(|((_, k), v)| (k, v))
    }
}

/// Ledger state held in process memory.
///
/// Commits are serialized by a single lock; readers never observe a
/// partially applied batch.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys across all partitions.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    /// Check if empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| Error::Storage("ledger lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| Error::Storage("ledger lock poisoned".into()))
    }
}

impl LedgerBackend for MemoryLedger {
    fn get(&self, partition: &Partition, key: &StateKey) -> Result<Option<Versioned>> {
        Ok(self
            .read()?
            .entries
            .get(&(partition.clone(), key.clone()))
            .cloned())
    }

    fn scan_prefix(
        &self,
        partition: &Partition,
        prefix: &StateKey,
    ) -> Result<Vec<(StateKey, Versioned)>> {
        let inner = self.read()?;
        Ok(inner
            .scan(partition, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn history(&self, key: &StateKey) -> Result<Vec<HistoryEntry>> {
        Ok(self.read()?.history.get(key).cloned().unwrap_or_default())
    }

    fn height(&self) -> Result<Version> {
        Ok(self.read()?.height)
    }

    fn commit(&self, batch: CommitBatch) -> Result<Version> {
        let mut inner = self.write()?;
        batch.validate(&*inner)?;
        if batch.is_read_only() {
            return Ok(inner.height);
        }

        let version = inner.height.next();
        for write in batch.writes {
            if write.partition == Partition::World {
                inner
                    .history
                    .entry(write.key.clone())
                    .or_default()
                    .push(HistoryEntry {
                        version,
                        value: write.value.clone(),
                    });
            }
            let slot = (write.partition, write.key);
            match write.value {
                Some(value) => {
                    inner.entries.insert(slot, Versioned::new(version, value));
                }
                None => {
                    inner.entries.remove(&slot);
                }
            }
        }
        inner.height = version;
        tracing::trace!(height = version.0, "memory ledger commit");
        Ok(version)
    }
}
