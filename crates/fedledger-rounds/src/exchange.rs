//! Round exchange: registration, update submission, aggregate publication
//! and result consumption.
//!
//! Per (participant, round) a result moves `NotRequested -> Consumed` on the
//! first paid fetch and stays there; later fetches replay the same payload
//! for free.

use fedledger_ledger::LedgerBackend;
use serde::Serialize;

use crate::arbiter;
use crate::config::Sampling;
use crate::contract::Session;
use crate::error::{Error, Result};
use crate::keys;
use crate::models::{ModelPayload, ParticipantRound, ParticipantState, Round, ServerRound};
use crate::records;
use crate::sampler;
use crate::tokens;

/// Outcome of a result fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedResult {
    /// First fetch; one consumption cost was debited.
    Fresh(ModelPayload),
    /// Round already consumed; nothing debited.
    Replayed(ModelPayload),
    /// Balance too low; nothing changed.
    Withheld,
}

impl FetchedResult {
    /// The payload handed to the caller. A withheld result is the empty
    /// model, indistinguishable in shape from a real one.
    pub fn into_payload(self) -> ModelPayload {
        match self {
            FetchedResult::Fresh(payload) | FetchedResult::Replayed(payload) => payload,
            FetchedResult::Withheld => ModelPayload::empty(),
        }
    }

    pub fn is_withheld(&self) -> bool {
        matches!(self, FetchedResult::Withheld)
    }
}

/// Tokens granted to one selected contributor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Credit {
    pub name: String,
    pub amount: f64,
    pub balance: f64,
}

/// What publishing an aggregate did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub round: Round,
    pub credited: Vec<Credit>,
}

/// One committed version of a participant's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub state: Option<ParticipantState>,
}

impl<'l, B: LedgerBackend> Session<'l, B> {
    /// Create the caller's state with the initial balance.
    pub fn register(&mut self) -> Result<ParticipantState> {
        let name = self.caller.name.clone();
        if tokens::load_state(&mut self.tx, &name)?.is_some() {
            return Err(Error::AlreadyExists(format!("participant {}", name)));
        }

        let state = ParticipantState::new(self.config.initial_balance);
        tokens::save_state(&mut self.tx, &name, &state)?;

        // Aggregator round keys hold aggregates, so only clients get a
        // round-0 placeholder.
        if !self.caller.is_aggregator() {
            let placeholder = ParticipantRound {
                participant_id: name.clone(),
                model: ModelPayload::empty(),
                round: 0,
                privacy_budget: 0.0,
            };
            records::store(&mut self.tx, keys::round_key(&self.caller, 0)?, &placeholder)?;
        }

        tracing::info!(participant = %self.caller, balance = state.token_balance, "registered");
        Ok(state)
    }

    /// Store the caller's update under its next round. Returns that round.
    pub fn submit_update(&mut self, payload: ModelPayload, privacy_budget: f64) -> Result<Round> {
        if self.caller.is_aggregator() {
            return Err(Error::Unauthorized(
                "the aggregator publishes aggregates, it does not submit updates".into(),
            ));
        }
        if !privacy_budget.is_finite() || privacy_budget < 0.0 {
            return Err(Error::MalformedInput(format!(
                "privacy budget {} must be finite and non-negative",
                privacy_budget
            )));
        }

        let name = self.caller.name.clone();
        let round = arbiter::next_round(&mut self.tx, &self.caller, &self.config.aggregator_name)?;
        let key = keys::round_key(&self.caller, round)?;
        if records::exists(&mut self.tx, &key)? {
            return Err(Error::AlreadyExists(format!("update {}", key)));
        }

        let record = ParticipantRound {
            participant_id: name.clone(),
            model: payload,
            round,
            privacy_budget,
        };
        records::store(&mut self.tx, key, &record)?;

        let mut state = tokens::require_state(&mut self.tx, &name)?;
        state.latest_round = round;
        tokens::save_state(&mut self.tx, &name, &state)?;

        tracing::info!(
            participant = %self.caller,
            round,
            privacy_budget,
            parameters = record.model.parameter_count(),
            "update submitted"
        );
        Ok(round)
    }

    /// The caller's own record at its latest round.
    pub fn latest_update(&mut self) -> Result<ParticipantRound> {
        if self.caller.is_aggregator() {
            return Err(Error::Unauthorized(
                "the aggregator has no updates; fetch its aggregate instead".into(),
            ));
        }
        let state = tokens::require_state(&mut self.tx, &self.caller.name)?;
        let key = keys::round_key(&self.caller, state.latest_round)?;
        records::load(&mut self.tx, &key)?.ok_or(Error::RoundNotFound(state.latest_round))
    }

    /// Sample contributions to the round currently being aggregated and
    /// return their payloads in sampled order.
    pub fn select_participants(&mut self, count: i64, seed: i64) -> Result<Vec<ModelPayload>> {
        self.require_aggregator("select_participants")?;
        let aggregator = self.config.aggregator_name.clone();
        let round = arbiter::server_latest_round(&mut self.tx, &aggregator)? + 1;
        let selected = sampler::select_subset(&mut self.tx, round, count, seed)?;
        tracing::info!(round, selected = selected.len(), "participants selected");
        Ok(selected.into_iter().map(|(_, record)| record.model).collect())
    }

    /// Publish the aggregate for `round` and reward the sampled
    /// contributors to it.
    pub fn publish_aggregate(
        &mut self,
        payload: ModelPayload,
        round: Round,
        sampling: Option<Sampling>,
    ) -> Result<PublishReceipt> {
        self.require_aggregator("publish_aggregate")?;
        if round == 0 {
            return Err(Error::MalformedInput("round 0 cannot be published".into()));
        }

        let aggregator = self.config.aggregator_name.clone();
        let mut server_state = tokens::require_state(&mut self.tx, &aggregator)?;
        let key = keys::server_round_key(&aggregator, round)?;
        if records::exists(&mut self.tx, &key)? {
            return Err(Error::AlreadyExists(format!("aggregate for round {}", round)));
        }
        records::store(&mut self.tx, key, &ServerRound { payload, round })?;

        if round > server_state.latest_round {
            server_state.latest_round = round;
            tokens::save_state(&mut self.tx, &aggregator, &server_state)?;
        }

        let sampling = sampling.unwrap_or(self.config.default_sampling);
        let selected = sampler::select_subset(&mut self.tx, round, sampling.count, sampling.seed)?;

        let mut credited = Vec::with_capacity(selected.len());
        for (_, record) in selected {
            let name = record.participant_id;
            let amount = tokens::contribution_reward(record.privacy_budget);
            match tokens::credit(&mut self.tx, &name, amount)? {
                Some(balance) => credited.push(Credit {
                    name,
                    amount,
                    balance,
                }),
                None => {
                    tracing::warn!(participant = %name, round, "selected contributor has no state, skipping");
                }
            }
        }

        tracing::info!(round, credited = credited.len(), "aggregate published");
        Ok(PublishReceipt { round, credited })
    }

    /// Fetch the aggregate for `round`, paying on first access.
    pub fn fetch_result(&mut self, round: Round) -> Result<FetchedResult> {
        let aggregator = self.config.aggregator_name.clone();
        let key = keys::server_round_key(&aggregator, round)?;
        let server_round: ServerRound =
            records::load(&mut self.tx, &key)?.ok_or(Error::RoundNotFound(round))?;

        let name = self.caller.name.clone();
        let mut state = tokens::require_state(&mut self.tx, &name)?;
        if state.has_consumed(round) {
            tracing::debug!(participant = %self.caller, round, "result replayed");
            return Ok(FetchedResult::Replayed(server_round.payload));
        }

        match state.try_debit(&name, self.config.consumption_cost) {
            Ok(()) => {}
            Err(Error::InsufficientTokens { balance, .. }) => {
                tracing::warn!(participant = %self.caller, round, balance, "result withheld");
                return Ok(FetchedResult::Withheld);
            }
            Err(e) => return Err(e),
        }
        state.rounds_consumed.insert(round);
        tokens::save_state(&mut self.tx, &name, &state)?;

        tracing::info!(participant = %self.caller, round, balance = state.token_balance, "result consumed");
        Ok(FetchedResult::Fresh(server_round.payload))
    }

    /// The caller's current state.
    pub fn current_state(&mut self) -> Result<ParticipantState> {
        tokens::require_state(&mut self.tx, &self.caller.name)
    }

    /// Every committed version of `name`'s state, oldest first.
    pub fn state_history(&mut self, name: &str) -> Result<Vec<StateSnapshot>> {
        let history = self.tx.history(&keys::current_state_key(name)?)?;
        if history.is_empty() {
            return Err(Error::NotRegistered(name.to_string()));
        }
        history
            .into_iter()
            .map(|entry| {
                let state = entry
                    .value
                    .map(|data| serde_json::from_slice::<ParticipantState>(&data))
                    .transpose()?;
                Ok(StateSnapshot {
                    version: entry.version.0,
                    state,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::contract::{RoundContract, Transient};
    use crate::identity::encode_x509_identity;
    use crate::models::{Layer, Tensor};
    use fedledger_ledger::MemoryLedger;

    fn id(cn: &str) -> String {
        encode_x509_identity(&format!("CN={},OU=client", cn), "CN=ca")
    }

    fn contract() -> RoundContract<MemoryLedger> {
        RoundContract::new(MemoryLedger::new(), ExchangeConfig::default()).unwrap()
    }

    fn model(value: f64) -> ModelPayload {
        ModelPayload {
            layers: vec![Layer {
                weights: Some(Tensor::Seq(vec![Tensor::Scalar(value)])),
                biases: None,
            }],
        }
    }

    fn run<T>(
        contract: &RoundContract<MemoryLedger>,
        who: &str,
        f: impl FnOnce(&mut Session<'_, MemoryLedger>) -> Result<T>,
    ) -> Result<T> {
        let mut session = contract.session(&id(who), Transient::new())?;
        let value = f(&mut session)?;
        session.commit()?;
        Ok(value)
    }

    #[test]
    fn register_twice_fails() {
        let c = contract();
        run(&c, "alice", |s| s.register()).unwrap();
        let err = run(&c, "alice", |s| s.register()).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn register_writes_round_zero_placeholder() {
        let c = contract();
        run(&c, "alice", |s| s.register()).unwrap();
        let record = run(&c, "alice", |s| s.latest_update()).unwrap();
        assert_eq!(record.round, 0);
        assert!(record.model.is_empty());
    }

    #[test]
    fn submissions_advance_one_round_each() {
        let c = contract();
        run(&c, "alice", |s| s.register()).unwrap();
        for expected in 1..=3 {
            let round = run(&c, "alice", |s| s.submit_update(model(1.0), 2.0)).unwrap();
            assert_eq!(round, expected);
        }
        let record = run(&c, "alice", |s| s.latest_update()).unwrap();
        assert_eq!(record.round, 3);
        assert_eq!(record.privacy_budget, 2.0);
    }

    #[test]
    fn publish_moves_clients_past_server_round() {
        let c = contract();
        run(&c, "appserver", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.register()).unwrap();
        run(&c, "bob", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.submit_update(model(1.0), 1.0)).unwrap();
        run(&c, "appserver", |s| s.publish_aggregate(model(0.5), 1, None)).unwrap();

        // bob never submitted for round 1; his next round follows the server
        let round = run(&c, "bob", |s| s.submit_update(model(2.0), 1.0)).unwrap();
        assert_eq!(round, 2);
    }

    #[test]
    fn rejects_bad_privacy_budget() {
        let c = contract();
        run(&c, "alice", |s| s.register()).unwrap();
        for budget in [-1.0, f64::NAN, f64::INFINITY] {
            let err = run(&c, "alice", |s| s.submit_update(model(1.0), budget)).unwrap_err();
            assert!(matches!(err, Error::MalformedInput(_)));
        }
        assert_eq!(run(&c, "alice", |s| s.current_state()).unwrap().latest_round, 0);
    }

    #[test]
    fn aggregator_cannot_submit() {
        let c = contract();
        run(&c, "appserver", |s| s.register()).unwrap();
        let err = run(&c, "appserver", |s| s.submit_update(model(1.0), 1.0)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn publish_requires_registered_aggregator() {
        let c = contract();
        let err = run(&c, "appserver", |s| s.publish_aggregate(model(1.0), 1, None)).unwrap_err();
        assert!(matches!(err, Error::NotRegistered(name) if name == "appserver"));
    }

    #[test]
    fn publish_same_round_twice_fails() {
        let c = contract();
        run(&c, "appserver", |s| s.register()).unwrap();
        run(&c, "appserver", |s| s.publish_aggregate(model(1.0), 1, None)).unwrap();
        let err = run(&c, "appserver", |s| s.publish_aggregate(model(2.0), 1, None)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn publish_credits_only_sampled_contributors() {
        let c = contract();
        run(&c, "appserver", |s| s.register()).unwrap();
        for name in ["alice", "bob", "carol"] {
            run(&c, name, |s| s.register()).unwrap();
            run(&c, name, |s| s.submit_update(model(1.0), 5.0)).unwrap();
        }
        let sampling = Sampling { count: 2, seed: 7 };
        let receipt =
            run(&c, "appserver", |s| s.publish_aggregate(model(0.0), 1, Some(sampling))).unwrap();
        assert_eq!(receipt.credited.len(), 2);
        for credit in &receipt.credited {
            assert_eq!(credit.amount, 0.5);
            assert_eq!(credit.balance, 1.5);
        }

        let total: f64 = ["alice", "bob", "carol"]
            .iter()
            .map(|name| run(&c, name, |s| s.current_state()).unwrap().token_balance)
            .sum();
        assert_eq!(total, 4.0);
    }

    #[test]
    fn publish_skips_contributors_without_state() {
        let c = contract();
        run(&c, "appserver", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.submit_update(model(1.0), 15.0)).unwrap();

        // A round record whose author never registered
        let mut tx = fedledger_ledger::Transaction::new(c.ledger());
        let orphan = ParticipantRound {
            participant_id: "ghost".into(),
            model: model(2.0),
            round: 1,
            privacy_budget: 15.0,
        };
        let key = keys::round_key(&crate::models::Participant::client("ghost"), 1).unwrap();
        records::store(&mut tx, key, &orphan).unwrap();
        tx.commit().unwrap();

        let receipt = run(&c, "appserver", |s| s.publish_aggregate(model(0.0), 1, None)).unwrap();
        assert_eq!(
            receipt.credited,
            vec![Credit {
                name: "alice".into(),
                amount: 1.0,
                balance: 2.0,
            }]
        );
        assert!(run(&c, "appserver", |s| s.state_history("ghost")).is_err());
    }

    #[test]
    fn select_targets_round_after_server() {
        let c = contract();
        run(&c, "appserver", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.submit_update(model(3.0), 1.0)).unwrap();

        let payloads = run(&c, "appserver", |s| s.select_participants(5, 1)).unwrap();
        assert_eq!(payloads, vec![model(3.0)]);

        // Selecting does not pay anyone
        assert_eq!(run(&c, "alice", |s| s.current_state()).unwrap().token_balance, 1.0);
    }

    #[test]
    fn fetch_unknown_round() {
        let c = contract();
        run(&c, "alice", |s| s.register()).unwrap();
        let err = run(&c, "alice", |s| s.fetch_result(4)).unwrap_err();
        assert!(matches!(err, Error::RoundNotFound(4)));
        let err = run(&c, "alice", |s| s.fetch_result(0)).unwrap_err();
        assert!(matches!(err, Error::RoundNotFound(0)));
    }

    #[test]
    fn withheld_fetch_changes_nothing() {
        let c = RoundContract::new(
            MemoryLedger::new(),
            ExchangeConfig {
                initial_balance: 0.5,
                ..Default::default()
            },
        )
        .unwrap();
        run(&c, "appserver", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.register()).unwrap();
        run(&c, "appserver", |s| s.publish_aggregate(model(9.0), 1, None)).unwrap();

        let fetched = run(&c, "alice", |s| s.fetch_result(1)).unwrap();
        assert!(fetched.is_withheld());
        assert_eq!(fetched.into_payload(), ModelPayload::empty());

        let state = run(&c, "alice", |s| s.current_state()).unwrap();
        assert_eq!(state.token_balance, 0.5);
        assert!(state.rounds_consumed.is_empty());
    }

    #[test]
    fn history_records_each_state_change() {
        let c = contract();
        run(&c, "alice", |s| s.register()).unwrap();
        run(&c, "alice", |s| s.submit_update(model(1.0), 1.0)).unwrap();

        let history = run(&c, "bob-auditor", |s| s.state_history("alice")).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].state.as_ref().unwrap().latest_round, 0);
        assert_eq!(history[1].state.as_ref().unwrap().latest_round, 1);
        assert!(history[0].version < history[1].version);

        let err = run(&c, "alice", |s| s.state_history("nobody")).unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
    }
}
