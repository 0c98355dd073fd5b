//! Record types for the round exchange.
//!
//! # Round records
//!
//! - [`ParticipantRound`] - a client's update for one round
//! - [`ServerRound`] - the aggregate published for one round
//! - [`ParticipantState`] - latest round, token balance, consumed rounds
//!
//! # Key escrow
//!
//! - [`PendingKeyRequests`] - queue of (round, name) requests
//! - [`SymmetricKey`] - per-round key material
//!
//! # Payloads
//!
//! - [`ModelPayload`] / [`Tensor`] - opaque nested model parameters

mod escrow;
mod participant;
mod tensor;

pub use escrow::{KeyRequest, KeyRequestBatch, PendingKeyRequests, SymmetricKey};
pub use participant::{Participant, ParticipantRound, ParticipantState, Role, ServerRound};
pub use tensor::{Layer, ModelPayload, Tensor};

/// A training round number.
pub type Round = u64;
