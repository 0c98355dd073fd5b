//! JSON record access on top of a ledger transaction.

use fedledger_ledger::{LedgerBackend, StateKey, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Read and decode a world-state record.
pub fn load<T, B>(tx: &mut Transaction<'_, B>, key: &StateKey) -> Result<Option<T>>
where
    T: DeserializeOwned,
    B: LedgerBackend + ?Sized,
{
    match tx.get_state(key)? {
        Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
        None => Ok(None),
    }
}

/// Encode and buffer a world-state record.
pub fn store<T, B>(tx: &mut Transaction<'_, B>, key: StateKey, value: &T) -> Result<()>
where
    T: Serialize,
    B: LedgerBackend + ?Sized,
{
    let data = serde_json::to_vec(value)?;
    tx.put_state(key, data);
    Ok(())
}

/// Whether a world-state key is present.
pub fn exists<B>(tx: &mut Transaction<'_, B>, key: &StateKey) -> Result<bool>
where
    B: LedgerBackend + ?Sized,
{
    Ok(tx.get_state(key)?.is_some())
}
