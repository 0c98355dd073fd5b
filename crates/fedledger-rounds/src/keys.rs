//! Ledger key layout.
//!
//! | record              | key                                        |
//! |---------------------|--------------------------------------------|
//! | `ParticipantRound`  | composite `Client` / `{round}` / `{name}`  |
//! | `ServerRound`       | composite `Server` / `{round}` / `{name}`  |
//! | `ParticipantState`  | composite `CurrentData` / `{name}`         |
//! | `PendingKeyRequests`| simple `KeyRequests`                       |
//! | `SymmetricKey`      | simple `{round}` in a private collection   |
//!
//! The round comes before the name so one partial-key scan finds every
//! contribution to a round.

use fedledger_ledger::StateKey;

use crate::error::Result;
use crate::models::{Participant, Role, Round};

/// Object type of participant state records.
pub const STATE_OBJECT: &str = "CurrentData";

/// Key of the pending key request queue.
pub const KEY_REQUESTS: &str = "KeyRequests";

/// Key of a participant's record for `round`, under the participant's role.
pub fn round_key(participant: &Participant, round: Round) -> Result<StateKey> {
    Ok(StateKey::composite(
        participant.role.object_type(),
        &[round.to_string(), participant.name.clone()],
    )?)
}

/// Key of a participant's state record.
pub fn current_state_key(name: &str) -> Result<StateKey> {
    Ok(StateKey::composite(STATE_OBJECT, &[name])?)
}

/// Key of the aggregate published for `round`.
pub fn server_round_key(aggregator: &str, round: Round) -> Result<StateKey> {
    round_key(&Participant::server(aggregator), round)
}

/// Scan prefix covering every client record for `round`.
pub fn client_round_prefix(round: Round) -> Result<StateKey> {
    Ok(StateKey::partial(Role::Client.object_type(), &[round.to_string()])?)
}

/// Key of the pending key request queue.
pub fn pending_requests_key() -> Result<StateKey> {
    Ok(StateKey::simple(KEY_REQUESTS)?)
}

/// Key of a round's symmetric key inside its private collection.
pub fn symmetric_key_key(round: Round) -> Result<StateKey> {
    Ok(StateKey::simple(&round.to_string())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_never_share_keys() {
        let client = round_key(&Participant::client("appserver"), 1).unwrap();
        let server = server_round_key("appserver", 1).unwrap();
        assert_ne!(client, server);
    }

    #[test]
    fn distinct_tuples_distinct_keys() {
        let a = round_key(&Participant::client("1alice"), 1).unwrap();
        let b = round_key(&Participant::client("alice"), 11).unwrap();
        assert_ne!(a, b);
        assert_ne!(current_state_key("alice").unwrap(), current_state_key("alicee").unwrap());
    }

    #[test]
    fn client_prefix_matches_only_its_round() {
        let prefix = client_round_prefix(1).unwrap();
        assert!(round_key(&Participant::client("alice"), 1).unwrap().starts_with(&prefix));
        assert!(!round_key(&Participant::client("alice"), 12).unwrap().starts_with(&prefix));
        assert!(!server_round_key("appserver", 1).unwrap().starts_with(&prefix));
    }

    #[test]
    fn state_key_splits_back() {
        let (object_type, attrs) = current_state_key("bob").unwrap().split_composite().unwrap();
        assert_eq!(object_type, STATE_OBJECT);
        assert_eq!(attrs, vec!["bob".to_string()]);
    }

    #[test]
    fn names_with_nul_are_rejected() {
        assert!(current_state_key("bad\0name").is_err());
    }
}
