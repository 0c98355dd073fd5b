//! Fedledger Rounds - Federated-Learning Round Exchange
//!
//! Coordinates federated training rounds over a versioned ledger. Clients
//! submit model updates tagged with a privacy budget, an aggregator samples
//! contributions and publishes the aggregate, and contributors are paid in
//! tokens they later spend to fetch results and round keys.
//!
//! # Architecture
//!
//! - **Keys**: Composite ledger keys for round records and participant state
//! - **Arbiter**: Next-round computation
//! - **Sampler**: Seeded participant selection
//! - **Tokens**: Balance credit and debit inside a transaction
//! - **Exchange**: Register, submit, publish, fetch
//! - **Escrow**: Key request queue and private-collection key storage
//! - **Contract**: Caller resolution, dispatch and commit
//!
//! # Example
//!
//! ```no_run
//! use fedledger_ledger::MemoryLedger;
//! use fedledger_rounds::{ExchangeConfig, Invocation, RoundContract, Transient};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let contract = RoundContract::new(MemoryLedger::new(), ExchangeConfig::default())?;
//!     let identity = fedledger_rounds::identity::encode_x509_identity("CN=alice", "CN=ca");
//!     contract.execute(&identity, Invocation::Register, Transient::new())?;
//!     Ok(())
//! }
//! ```

pub mod arbiter;
pub mod config;
pub mod contract;
pub mod error;
pub mod escrow;
pub mod exchange;
pub mod identity;
pub mod keys;
pub mod models;
pub mod records;
pub mod sampler;
pub mod tokens;

pub use config::{CliConfig, ExchangeConfig, Sampling};
pub use contract::{Invocation, Response, RoundContract, Session, Transient};
pub use error::{Error, Result};
pub use exchange::{Credit, FetchedResult, PublishReceipt, StateSnapshot};
pub use identity::{IdentityResolver, X509IdentityResolver};
pub use models::{
    KeyRequest, KeyRequestBatch, Layer, ModelPayload, Participant, ParticipantRound,
    ParticipantState, PendingKeyRequests, Role, Round, ServerRound, SymmetricKey, Tensor,
};
