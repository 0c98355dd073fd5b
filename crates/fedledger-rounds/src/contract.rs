//! Invocation dispatch.
//!
//! Each invocation resolves its caller, runs in one ledger transaction, and
//! commits only if the whole flow succeeded. A failed flow leaves the
//! ledger untouched; a flow whose reads were invalidated by a concurrent
//! commit fails with a conflict error (see [`Error::is_conflict`]).

use std::collections::BTreeMap;

use fedledger_ledger::{LedgerBackend, Transaction, Version};
use serde::{Deserialize, Serialize};

use crate::config::{ExchangeConfig, Sampling};
use crate::error::{Error, Result};
use crate::exchange::{PublishReceipt, StateSnapshot};
use crate::identity::{self, IdentityResolver, X509IdentityResolver};
use crate::models::{
    KeyRequestBatch, ModelPayload, Participant, ParticipantRound, ParticipantState, Round,
    SymmetricKey,
};

/// Per-call inputs that are never written to the ledger.
pub type Transient = BTreeMap<String, Vec<u8>>;

/// An operation a caller can invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Invocation {
    Register,
    SubmitUpdate {
        payload: ModelPayload,
        privacy_budget: f64,
    },
    LatestUpdate,
    SelectParticipants {
        count: i64,
        seed: i64,
    },
    PublishAggregate {
        payload: ModelPayload,
        round: Round,
        #[serde(default)]
        sampling: Option<Sampling>,
    },
    FetchResult {
        round: Round,
    },
    RequestKey {
        round: Round,
    },
    DrainKeyRequests,
    IssueKey {
        round: Round,
        collection: String,
    },
    FetchKey {
        round: Round,
        collection: String,
    },
    CurrentState,
    StateHistory {
        name: String,
    },
}

impl Invocation {
    /// Operation name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Invocation::Register => "register",
            Invocation::SubmitUpdate { .. } => "submit_update",
            Invocation::LatestUpdate => "latest_update",
            Invocation::SelectParticipants { .. } => "select_participants",
            Invocation::PublishAggregate { .. } => "publish_aggregate",
            Invocation::FetchResult { .. } => "fetch_result",
            Invocation::RequestKey { .. } => "request_key",
            Invocation::DrainKeyRequests => "drain_key_requests",
            Invocation::IssueKey { .. } => "issue_key",
            Invocation::FetchKey { .. } => "fetch_key",
            Invocation::CurrentState => "current_state",
            Invocation::StateHistory { .. } => "state_history",
        }
    }
}

/// What an invocation returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Registered { state: ParticipantState },
    Submitted { round: Round },
    Update { record: ParticipantRound },
    Selected { payloads: Vec<ModelPayload> },
    Published { receipt: PublishReceipt },
    Result { payload: ModelPayload },
    KeyRequested,
    KeyRequests { batch: KeyRequestBatch },
    KeyIssued { round: Round },
    Key { key: SymmetricKey },
    State { state: ParticipantState },
    History { entries: Vec<StateSnapshot> },
}

/// The round exchange bound to a ledger.
pub struct RoundContract<B: LedgerBackend> {
    ledger: B,
    resolver: Box<dyn IdentityResolver>,
    config: ExchangeConfig,
}

impl<B: LedgerBackend> RoundContract<B> {
    /// Create a contract resolving X.509 identities.
    pub fn new(ledger: B, config: ExchangeConfig) -> Result<Self> {
        config.validate()?;
        let resolver = Box::new(X509IdentityResolver::new(config.aggregator_name.clone()));
        Ok(Self {
            ledger,
            resolver,
            config,
        })
    }

    pub fn ledger(&self) -> &B {
        &self.ledger
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Resolve the caller and open a transaction for one invocation.
    pub fn session(&self, identity: &str, transient: Transient) -> Result<Session<'_, B>> {
        let caller = self.resolver.resolve(identity)?;
        tracing::debug!(
            caller = %caller,
            identity = %identity::fingerprint(identity),
            "session opened"
        );
        Ok(Session {
            tx: Transaction::new(&self.ledger),
            caller,
            transient,
            config: &self.config,
        })
    }

    /// Run one invocation to completion: resolve, execute, commit.
    pub fn execute(
        &self,
        identity: &str,
        invocation: Invocation,
        transient: Transient,
    ) -> Result<Response> {
        let op = invocation.name();
        let mut session = self.session(identity, transient)?;
        let caller = session.caller().clone();
        let outcome = match session.dispatch(invocation) {
            Ok(response) => session.commit().map(|height| (response, height)),
            Err(e) => Err(e),
        };
        match outcome {
            Ok((response, height)) => {
                tracing::info!(op, caller = %caller, height = height.0, "invocation committed");
                Ok(response)
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(op, caller = %caller, error = %e, "invocation rejected at commit");
                Err(e)
            }
            Err(e) => {
                tracing::info!(op, caller = %caller, error = %e, "invocation failed");
                Err(e)
            }
        }
    }
}

/// One invocation in progress.
///
/// Dropping a session without [`Session::commit`] discards its writes.
pub struct Session<'l, B: LedgerBackend> {
    pub(crate) tx: Transaction<'l, B>,
    pub(crate) caller: Participant,
    pub(crate) transient: Transient,
    pub(crate) config: &'l ExchangeConfig,
}

impl<'l, B: LedgerBackend> Session<'l, B> {
    pub fn caller(&self) -> &Participant {
        &self.caller
    }

    /// Run an invocation inside this session.
    pub fn dispatch(&mut self, invocation: Invocation) -> Result<Response> {
        match invocation {
            Invocation::Register => self.register().map(|state| Response::Registered { state }),
            Invocation::SubmitUpdate {
                payload,
                privacy_budget,
            } => self
                .submit_update(payload, privacy_budget)
                .map(|round| Response::Submitted { round }),
            Invocation::LatestUpdate => self.latest_update().map(|record| Response::Update { record }),
            Invocation::SelectParticipants { count, seed } => self
                .select_participants(count, seed)
                .map(|payloads| Response::Selected { payloads }),
            Invocation::PublishAggregate {
                payload,
                round,
                sampling,
            } => self
                .publish_aggregate(payload, round, sampling)
                .map(|receipt| Response::Published { receipt }),
            Invocation::FetchResult { round } => self.fetch_result(round).map(|fetched| {
                Response::Result {
                    payload: fetched.into_payload(),
                }
            }),
            Invocation::RequestKey { round } => {
                self.request_key(round).map(|_| Response::KeyRequested)
            }
            Invocation::DrainKeyRequests => self
                .drain_requests()
                .map(|batch| Response::KeyRequests { batch }),
            Invocation::IssueKey { round, collection } => self
                .issue_key(round, &collection)
                .map(|_| Response::KeyIssued { round }),
            Invocation::FetchKey { round, collection } => {
                self.fetch_key(round, &collection).map(|key| Response::Key { key })
            }
            Invocation::CurrentState => self.current_state().map(|state| Response::State { state }),
            Invocation::StateHistory { name } => self
                .state_history(&name)
                .map(|entries| Response::History { entries }),
        }
    }

    /// Validate and apply everything this session wrote.
    pub fn commit(self) -> Result<Version> {
        Ok(self.tx.commit()?)
    }

    /// Fail unless the caller may run aggregator-only operations.
    pub(crate) fn require_aggregator(&self, op: &str) -> Result<()> {
        if self.config.enforce_aggregator_role && !self.caller.is_aggregator() {
            return Err(Error::Unauthorized(format!(
                "{} may only be invoked by the aggregator, not {}",
                op, self.caller.name
            )));
        }
        Ok(())
    }
}
