//! Configuration.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Participant sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sampling {
    pub count: i64,
    pub seed: i64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self { count: 10, seed: 0 }
    }
}

/// Configuration for the round exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeConfig {
    /// Name the aggregator resolves to
    pub aggregator_name: String,

    /// Balance granted at registration
    pub initial_balance: f64,

    /// Tokens charged for a first result fetch or a key fetch
    pub consumption_cost: f64,

    /// Sampling used by `PublishAggregate` when the call supplies none
    pub default_sampling: Sampling,

    /// Reject aggregator-only operations from clients
    pub enforce_aggregator_role: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            aggregator_name: "appserver".to_string(),
            initial_balance: 1.0,
            consumption_cost: 1.0,
            default_sampling: Sampling::default(),
            enforce_aggregator_role: false,
        }
    }
}

impl ExchangeConfig {
    /// Create config from environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            aggregator_name: std::env::var("FEDLEDGER_AGGREGATOR")
                .unwrap_or(defaults.aggregator_name),
            initial_balance: env_or("FEDLEDGER_INITIAL_BALANCE", defaults.initial_balance)?,
            consumption_cost: env_or("FEDLEDGER_CONSUMPTION_COST", defaults.consumption_cost)?,
            default_sampling: Sampling {
                count: env_or("FEDLEDGER_SAMPLE_COUNT", defaults.default_sampling.count)?,
                seed: env_or("FEDLEDGER_SAMPLE_SEED", defaults.default_sampling.seed)?,
            },
            enforce_aggregator_role: env_or(
                "FEDLEDGER_ENFORCE_AGGREGATOR_ROLE",
                defaults.enforce_aggregator_role,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break token invariants.
    pub fn validate(&self) -> Result<()> {
        if self.aggregator_name.is_empty() {
            return Err(Error::MalformedInput("aggregator name is empty".into()));
        }
        if !self.initial_balance.is_finite() || self.initial_balance < 0.0 {
            return Err(Error::MalformedInput(format!(
                "initial balance {} must be finite and non-negative",
                self.initial_balance
            )));
        }
        if !self.consumption_cost.is_finite() || self.consumption_cost <= 0.0 {
            return Err(Error::MalformedInput(format!(
                "consumption cost {} must be finite and positive",
                self.consumption_cost
            )));
        }
        Ok(())
    }
}

/// Configuration for the `fedledger` binary.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Ledger data directory
    pub data_dir: PathBuf,

    /// Caller identity blob
    pub identity: Option<String>,
}

impl CliConfig {
    pub fn from_env() -> Self {
        let data_dir = PathBuf::from(
            std::env::var("FEDLEDGER_DATA_DIR").unwrap_or_else(|_| "./fedledger-data".to_string()),
        );
        let identity = std::env::var("FEDLEDGER_IDENTITY").ok();
        Self { data_dir, identity }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::MalformedInput(format!("invalid {}: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}
