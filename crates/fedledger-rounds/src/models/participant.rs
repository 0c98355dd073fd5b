//! Participant and round records.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ModelPayload, Round};
use crate::error::{Error, Result};

/// Which side of the exchange a participant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Submits local updates, consumes results.
    Client,
    /// The aggregator. Publishes one aggregate per round.
    Server,
}

impl Role {
    /// Object type of this role's round records.
    pub const fn object_type(self) -> &'static str {
        match self {
            Role::Client => "Client",
            Role::Server => "Server",
        }
    }
}

/// A resolved caller: short name plus role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub role: Role,
}

impl Participant {
    pub fn client(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Client,
        }
    }

    pub fn server(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: Role::Server,
        }
    }

    pub fn is_aggregator(&self) -> bool {
        self.role == Role::Server
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.role.object_type())
    }
}

/// A participant's contribution for one round. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRound {
    pub participant_id: String,
    pub model: ModelPayload,
    pub round: Round,
    pub privacy_budget: f64,
}

/// The aggregate published for one round. Written once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRound {
    pub payload: ModelPayload,
    pub round: Round,
}

/// Per-participant progress and token balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantState {
    pub latest_round: Round,
    pub token_balance: f64,
    #[serde(default)]
    pub rounds_consumed: BTreeSet<Round>,
}

impl ParticipantState {
    /// Fresh state for a newly registered participant.
    pub fn new(initial_balance: f64) -> Self {
        Self {
            latest_round: 0,
            token_balance: initial_balance,
            rounds_consumed: BTreeSet::new(),
        }
    }

    /// Whether the result of `round` was already paid for.
    pub fn has_consumed(&self, round: Round) -> bool {
        self.rounds_consumed.contains(&round)
    }

    /// Add tokens.
    pub fn credit(&mut self, amount: f64) {
        self.token_balance += amount;
    }

    /// Subtract `amount` if the balance covers it; otherwise leave the
    /// balance untouched and fail.
    pub fn try_debit(&mut self, name: &str, amount: f64) -> Result<()> {
        if self.token_balance < amount {
            return Err(Error::InsufficientTokens {
                name: name.to_string(),
                balance: self.token_balance,
                required: amount,
            });
        }
        self.token_balance -= amount;
        Ok(())
    }

    /// Check invariants on state loaded from the ledger.
    pub fn check(&self, name: &str) -> Result<()> {
        if !self.token_balance.is_finite() || self.token_balance < 0.0 {
            return Err(Error::InvariantViolation(format!(
                "participant {} has token balance {}",
                name, self.token_balance
            )));
        }
        Ok(())
    }
}
