//! Token ledger.
//!
//! Balances live in each participant's [`ParticipantState`]. Every change is
//! a read-modify-write inside the caller's transaction, so the balance check
//! and the debit commit together or not at all: a concurrent change to the
//! same state makes the commit fail instead of passing the gate twice.

use fedledger_ledger::{LedgerBackend, Transaction};

use crate::error::{Error, Result};
use crate::keys;
use crate::models::ParticipantState;
use crate::records;

/// Tokens earned by a contribution selected for aggregation.
///
/// A larger privacy budget (weaker privacy, more useful update) earns more.
pub fn contribution_reward(privacy_budget: f64) -> f64 {
    (privacy_budget + 5.0) / 20.0
}

/// Load a participant's state, if registered.
pub fn load_state<B>(tx: &mut Transaction<'_, B>, name: &str) -> Result<Option<ParticipantState>>
where
    B: LedgerBackend + ?Sized,
{
    let state: Option<ParticipantState> = records::load(tx, &keys::current_state_key(name)?)?;
    if let Some(state) = &state {
        state.check(name)?;
    }
    Ok(state)
}

/// Load a participant's state or fail with `NotRegistered`.
pub fn require_state<B>(tx: &mut Transaction<'_, B>, name: &str) -> Result<ParticipantState>
where
    B: LedgerBackend + ?Sized,
{
    load_state(tx, name)?.ok_or_else(|| Error::NotRegistered(name.to_string()))
}

/// Persist a participant's state.
pub fn save_state<B>(tx: &mut Transaction<'_, B>, name: &str, state: &ParticipantState) -> Result<()>
where
    B: LedgerBackend + ?Sized,
{
    records::store(tx, keys::current_state_key(name)?, state)
}

/// Add `amount` to a participant's balance. Returns the new balance, or
/// `None` if the participant has no state.
pub fn credit<B>(tx: &mut Transaction<'_, B>, name: &str, amount: f64) -> Result<Option<f64>>
where
    B: LedgerBackend + ?Sized,
{
    let Some(mut state) = load_state(tx, name)? else {
        return Ok(None);
    };
    state.credit(amount);
    save_state(tx, name, &state)?;
    tracing::debug!(participant = name, amount, balance = state.token_balance, "credited");
    Ok(Some(state.token_balance))
}

/// Subtract `amount` if the balance covers it. Returns the new balance, or
/// `InsufficientTokens` with the balance untouched.
pub fn debit_if_available<B>(tx: &mut Transaction<'_, B>, name: &str, amount: f64) -> Result<f64>
where
    B: LedgerBackend + ?Sized,
{
    let mut state = require_state(tx, name)?;
    state.try_debit(name, amount)?;
    save_state(tx, name, &state)?;
    tracing::debug!(participant = name, amount, balance = state.token_balance, "debited");
    Ok(state.token_balance)
}
