//! Participant sampling.
//!
//! Selection is a pure function of the eligible pool and the caller's seed.
//! The generator is created per call from the seed alone, so the same seed
//! over the same pool always yields the same ordered subset.

use fedledger_ledger::{LedgerBackend, StateKey, Transaction};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Error, Result};
use crate::keys;
use crate::models::{ParticipantRound, Round};

/// Choose up to `count` items from `pool`.
///
/// - `count <= 0` or an empty pool selects nothing
/// - a pool no larger than `count` is returned as-is, in pool order
/// - otherwise the pool is shuffled with a generator seeded by `seed` and
///   truncated to `count`
pub fn sample<T>(mut pool: Vec<T>, count: i64, seed: i64) -> Vec<T> {
    if count <= 0 || pool.is_empty() {
        return Vec::new();
    }
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    if pool.len() <= count {
        return pool;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
    pool.shuffle(&mut rng);
    pool.truncate(count);
    pool
}

/// Select up to `count` client contributions to `round`.
///
/// The pool is every client record under the round's key prefix, in key
/// order. The scan is recorded in the transaction's read set, so a
/// contribution landing concurrently invalidates the selection.
pub fn select_subset<B>(
    tx: &mut Transaction<'_, B>,
    round: Round,
    count: i64,
    seed: i64,
) -> Result<Vec<(StateKey, ParticipantRound)>>
where
    B: LedgerBackend + ?Sized,
{
    if count <= 0 {
        return Ok(Vec::new());
    }
    let prefix = keys::client_round_prefix(round)?;
    let pool = tx
        .scan_prefix(&prefix)?
        .into_iter()
        .map(|(key, data)| {
            let record: ParticipantRound = serde_json::from_slice(&data)?;
            if record.round != round {
                return Err(Error::InvariantViolation(format!(
                    "record {} holds round {}",
                    key, record.round
                )));
            }
            Ok((key, record))
        })
        .collect::<Result<Vec<_>>>()?;
    let pool_size = pool.len();
    let selected = sample(pool, count, seed);
    tracing::debug!(round, count, seed, pool_size, selected = selected.len(), "sampled participants");
    Ok(selected)
}
