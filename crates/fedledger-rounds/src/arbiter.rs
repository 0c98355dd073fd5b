//! Round arbitration.
//!
//! Clients and the aggregator advance independently. A client's next round
//! is one past whichever of the two is further ahead, recomputed from
//! committed state on every submission.

use fedledger_ledger::{LedgerBackend, Transaction};

use crate::error::Result;
use crate::models::{Participant, Round};
use crate::tokens;

/// Next round from the two latest rounds.
pub const fn arbitrate(participant_latest: Round, server_latest: Round) -> Round {
    let latest = if participant_latest > server_latest {
        participant_latest
    } else {
        server_latest
    };
    latest + 1
}

/// Latest round the aggregator has reached; 0 if it has not registered.
pub fn server_latest_round<B>(tx: &mut Transaction<'_, B>, aggregator: &str) -> Result<Round>
where
    B: LedgerBackend + ?Sized,
{
    Ok(tokens::load_state(tx, aggregator)?
        .map(|state| state.latest_round)
        .unwrap_or(0))
}

/// Next round for `participant`. Fails with `NotRegistered` if the
/// participant has no state.
pub fn next_round<B>(
    tx: &mut Transaction<'_, B>,
    participant: &Participant,
    aggregator: &str,
) -> Result<Round>
where
    B: LedgerBackend + ?Sized,
{
    let own = tokens::require_state(tx, &participant.name)?.latest_round;
    let server = if participant.is_aggregator() {
        own
    } else {
        server_latest_round(tx, aggregator)?
    };
    let round = arbitrate(own, server);
    tracing::debug!(participant = %participant, own, server, round, "next round");
    Ok(round)
}
