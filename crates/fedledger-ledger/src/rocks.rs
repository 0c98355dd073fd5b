//! Persistent ledger backend using RocksDB.
//!
//! Key spaces share one database and are separated by a leading byte:
//!
//! - `w{key}` world state
//! - `p{len:u32}{collection}{key}` private collections
//! - `h{len:u32}{key}{version:u64}` per-key history
//! - `m/height` commit height
//!
//! State values are stored as an 8-byte big-endian version followed by the
//! payload.

use std::path::Path;
use std::sync::Mutex;

use rocksdb::{Options, WriteBatch, DB};

use crate::error::{Error, Result};
use crate::transaction::{CommitBatch, CommittedView};
use crate::{HistoryEntry, LedgerBackend, Partition, StateKey, Version, Versioned};

const WORLD: u8 = b'w';
const PRIVATE: u8 = b'p';
const HISTORY: u8 = b'h';
const HEIGHT_KEY: &[u8] = b"m/height";

const HISTORY_DELETE: u8 = 0;
const HISTORY_PUT: u8 = 1;

/// RocksDB-backed ledger.
pub struct RocksLedger {
    db: DB,
    commit_lock: Mutex<()>,
}

impl RocksLedger {
    /// Open or create a ledger at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self {
            db,
            commit_lock: Mutex::new(()),
        })
    }

    fn read_height(&self) -> Result<Version> {
        match self.db.get(HEIGHT_KEY)? {
            Some(bytes) => Ok(Version::from_be_bytes(fixed8(&bytes)?)),
            None => Ok(Version::default()),
        }
    }

    fn prefixed_iter(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut items = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item?;
            if key.starts_with(prefix) {
                items.push((key.to_vec(), value.to_vec()));
            } else {
                break;
            }
        }
        Ok(items)
    }
}

impl CommittedView for RocksLedger {
    fn version_of(&self, partition: &Partition, key: &StateKey) -> Result<Option<Version>> {
        Ok(self.get(partition, key)?.map(|v| v.version))
    }

    fn versions_under(
        &self,
        partition: &Partition,
        prefix: &StateKey,
    ) -> Result<Vec<(StateKey, Version)>> {
        Ok(self
            .scan_prefix(partition, prefix)?
            .into_iter()
            .map(|(k, v)| (k, v.version))
            .collect())
    }
}

impl LedgerBackend for RocksLedger {
    fn get(&self, partition: &Partition, key: &StateKey) -> Result<Option<Versioned>> {
        match self.db.get(state_key(partition, key))? {
            Some(data) => Ok(Some(decode_versioned(&data)?)),
            None => Ok(None),
        }
    }

    fn scan_prefix(
        &self,
        partition: &Partition,
        prefix: &StateKey,
    ) -> Result<Vec<(StateKey, Versioned)>> {
        let space = state_key(partition, &StateKey::from_bytes(Vec::new()));
        let full_prefix = state_key(partition, prefix);
        self.prefixed_iter(&full_prefix)?
            .into_iter()
            .map(|(raw, value)| {
                let key = StateKey::from_bytes(raw[space.len()..].to_vec());
                Ok((key, decode_versioned(&value)?))
            })
            .collect()
    }

    fn history(&self, key: &StateKey) -> Result<Vec<HistoryEntry>> {
        let prefix = history_prefix(key);
        self.prefixed_iter(&prefix)?
            .into_iter()
            .map(|(raw, value)| {
                let version = Version::from_be_bytes(fixed8(&raw[prefix.len()..])?);
                let value = match value.split_first() {
                    Some((&HISTORY_PUT, payload)) => Some(payload.to_vec()),
                    Some((&HISTORY_DELETE, _)) => None,
                    _ => return Err(Error::Storage("corrupt history record".into())),
                };
                Ok(HistoryEntry { version, value })
            })
            .collect()
    }

    fn height(&self) -> Result<Version> {
        self.read_height()
    }

    fn commit(&self, batch: CommitBatch) -> Result<Version> {
        let _guard = self
            .commit_lock
            .lock()
            .map_err(|_| Error::Storage("commit lock poisoned".into()))?;

        batch.validate(self)?;
        let height = self.read_height()?;
        if batch.is_read_only() {
            return Ok(height);
        }

        let version = height.next();
        let mut wb = WriteBatch::default();
        for write in &batch.writes {
            let raw = state_key(&write.partition, &write.key);
            match &write.value {
                Some(value) => wb.put(&raw, encode_versioned(version, value)),
                None => wb.delete(&raw),
            }
            if write.partition == Partition::World {
                let mut hkey = history_prefix(&write.key);
                hkey.extend_from_slice(&version.to_be_bytes());
                let mut record = Vec::new();
                match &write.value {
                    Some(value) => {
                        record.push(HISTORY_PUT);
                        record.extend_from_slice(value);
                    }
                    None => record.push(HISTORY_DELETE),
                }
                wb.put(hkey, record);
            }
        }
        wb.put(HEIGHT_KEY, version.to_be_bytes());
        self.db.write(wb)?;
        tracing::trace!(height = version.0, writes = batch.writes.len(), "rocks ledger commit");
        Ok(version)
    }
}

fn state_key(partition: &Partition, key: &StateKey) -> Vec<u8> {
    let mut raw = Vec::with_capacity(key.as_bytes().len() + 8);
    match partition {
        Partition::World => raw.push(WORLD),
        Partition::Private(collection) => {
            raw.push(PRIVATE);
            raw.extend_from_slice(&(collection.len() as u32).to_be_bytes());
            raw.extend_from_slice(collection.as_bytes());
        }
    }
    raw.extend_from_slice(key.as_bytes());
    raw
}

fn history_prefix(key: &StateKey) -> Vec<u8> {
    let mut raw = vec![HISTORY];
    raw.extend_from_slice(&(key.as_bytes().len() as u32).to_be_bytes());
    raw.extend_from_slice(key.as_bytes());
    raw
}

fn encode_versioned(version: Version, value: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + value.len());
    data.extend_from_slice(&version.to_be_bytes());
    data.extend_from_slice(value);
    data
}

fn decode_versioned(data: &[u8]) -> Result<Versioned> {
    if data.len() < 8 {
        return Err(Error::Storage("stored value shorter than its version header".into()));
    }
    let (header, payload) = data.split_at(8);
    Ok(Versioned::new(
        Version::from_be_bytes(fixed8(header)?),
        payload.to_vec(),
    ))
}

fn fixed8(bytes: &[u8]) -> Result<[u8; 8]> {
    bytes
        .try_into()
        .map_err(|_| Error::Storage("expected 8-byte big-endian integer".into()))
}
