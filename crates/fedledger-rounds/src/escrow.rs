//! Key escrow and the pending-request queue.
//!
//! Clients queue requests for a round's symmetric key; the aggregator drains
//! the queue, then issues each key into a private collection where it can be
//! fetched for one consumption cost per fetch.

use fedledger_ledger::{LedgerBackend, StateKey, Transaction};

use crate::contract::Session;
use crate::error::{Error, Result};
use crate::keys;
use crate::models::{KeyRequestBatch, PendingKeyRequests, Round, SymmetricKey};
use crate::records;
use crate::tokens;

/// Transient field carrying the key's password.
pub const TRANSIENT_PASSWORD: &str = "password";

/// Transient field carrying the key's initialization vector.
pub const TRANSIENT_IV: &str = "iv";

fn load_queue<B>(tx: &mut Transaction<'_, B>, key: &StateKey) -> Result<PendingKeyRequests>
where
    B: LedgerBackend + ?Sized,
{
    match tx.get_state(key)? {
        Some(data) => PendingKeyRequests::from_slice(&data),
        None => Ok(PendingKeyRequests::default()),
    }
}

impl<'l, B: LedgerBackend> Session<'l, B> {
    /// Queue a request for `round`'s key on behalf of the caller.
    pub fn request_key(&mut self, round: Round) -> Result<()> {
        if round == 0 {
            return Err(Error::MalformedInput("round 0 has no key".into()));
        }
        let name = self.caller.name.clone();
        tokens::require_state(&mut self.tx, &name)?;

        let key = keys::pending_requests_key()?;
        let mut queue = load_queue(&mut self.tx, &key)?;
        queue.push(round, name);
        let pending = queue.len();
        records::store(&mut self.tx, key, &queue)?;

        tracing::info!(participant = %self.caller, round, pending, "key requested");
        Ok(())
    }

    /// Take every queued request and leave the queue empty.
    ///
    /// A drained queue is deleted; an absent queue reads as empty.
    pub fn drain_requests(&mut self) -> Result<KeyRequestBatch> {
        self.require_aggregator("drain_key_requests")?;
        let key = keys::pending_requests_key()?;
        let mut queue = load_queue(&mut self.tx, &key)?;
        let batch = KeyRequestBatch::from_requests(&queue.drain());
        if !batch.is_empty() {
            self.tx.delete_state(key);
        }

        tracing::info!(drained = batch.len(), "key requests drained");
        Ok(batch)
    }

    /// Store `round`'s key, taken from the transient inputs, in `collection`.
    pub fn issue_key(&mut self, round: Round, collection: &str) -> Result<()> {
        self.require_aggregator("issue_key")?;
        if round == 0 {
            return Err(Error::MalformedInput("round 0 has no key".into()));
        }
        if collection.is_empty() {
            return Err(Error::MalformedInput("collection name is empty".into()));
        }
        let material = SymmetricKey {
            password: self.transient_text(TRANSIENT_PASSWORD)?,
            iv: self.transient_text(TRANSIENT_IV)?,
        };

        let key = keys::symmetric_key_key(round)?;
        if self.tx.get_private(collection, &key)?.is_some() {
            return Err(Error::AlreadyExists(format!(
                "key for round {} in {}",
                round, collection
            )));
        }
        self.tx
            .put_private(collection, key, serde_json::to_vec(&material)?);

        tracing::info!(round, collection, "key issued");
        Ok(())
    }

    /// Fetch `round`'s key from `collection`, paying one consumption cost.
    ///
    /// Unlike results, keys are charged on every fetch.
    pub fn fetch_key(&mut self, round: Round, collection: &str) -> Result<SymmetricKey> {
        let name = self.caller.name.clone();
        let balance = tokens::debit_if_available(&mut self.tx, &name, self.config.consumption_cost)?;

        let key = keys::symmetric_key_key(round)?;
        let data = self
            .tx
            .get_private(collection, &key)?
            .ok_or(Error::RoundNotFound(round))?;
        let material: SymmetricKey = serde_json::from_slice(&data)?;

        tracing::info!(participant = %self.caller, round, collection, balance, "key fetched");
        Ok(material)
    }

    fn transient_text(&self, field: &str) -> Result<String> {
        let raw = self
            .transient
            .get(field)
            .ok_or_else(|| Error::MalformedInput(format!("transient field {} is missing", field)))?;
        String::from_utf8(raw.clone())
            .map_err(|_| Error::MalformedInput(format!("transient field {} is not UTF-8", field)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use crate::contract::{RoundContract, Transient};
    use crate::identity::encode_x509_identity;
    use crate::models::KeyRequest;
    use fedledger_ledger::MemoryLedger;

    const COLLECTION: &str = "roundKeys";

    fn id(cn: &str) -> String {
        encode_x509_identity(&format!("CN={},OU=client", cn), "CN=ca")
    }

    fn key_material() -> Transient {
        let mut transient = Transient::new();
        transient.insert(TRANSIENT_PASSWORD.into(), b"hunter2".to_vec());
        transient.insert(TRANSIENT_IV.into(), b"0011223344556677".to_vec());
        transient
    }

    fn run<T>(
        contract: &RoundContract<MemoryLedger>,
        who: &str,
        transient: Transient,
        f: impl FnOnce(&mut Session<'_, MemoryLedger>) -> Result<T>,
    ) -> Result<T> {
        let mut session = contract.session(&id(who), transient)?;
        let value = f(&mut session)?;
        session.commit()?;
        Ok(value)
    }

    fn setup(initial_balance: f64) -> RoundContract<MemoryLedger> {
        let config = ExchangeConfig {
            initial_balance,
            ..Default::default()
        };
        let contract = RoundContract::new(MemoryLedger::new(), config).unwrap();
        for name in ["appserver", "alice", "bob"] {
            run(&contract, name, Transient::new(), |s| s.register()).unwrap();
        }
        contract
    }

    #[test]
    fn queue_drains_in_request_order() {
        let c = setup(1.0);
        run(&c, "alice", Transient::new(), |s| s.request_key(1)).unwrap();
        run(&c, "bob", Transient::new(), |s| s.request_key(1)).unwrap();
        run(&c, "alice", Transient::new(), |s| s.request_key(2)).unwrap();

        let batch = run(&c, "appserver", Transient::new(), |s| s.drain_requests()).unwrap();
        assert_eq!(batch.rounds, vec![1, 1, 2]);
        assert_eq!(batch.names, vec!["alice", "bob", "alice"]);

        let again = run(&c, "appserver", Transient::new(), |s| s.drain_requests()).unwrap();
        assert!(again.is_empty());

        let mut tx = Transaction::new(c.ledger());
        assert!(tx.get_state(&keys::pending_requests_key().unwrap()).unwrap().is_none());
    }

    #[test]
    fn empty_drain_writes_nothing() {
        let c = setup(1.0);
        let mut session = c.session(&id("appserver"), Transient::new()).unwrap();
        assert!(session.drain_requests().unwrap().is_empty());
        assert_eq!(session.tx.pending_writes(), 0);
    }

    #[test]
    fn drain_with_no_queue_is_empty() {
        let c = setup(1.0);
        let batch = run(&c, "appserver", Transient::new(), |s| s.drain_requests()).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn reads_legacy_column_queue() {
        let c = setup(1.0);
        let mut tx = Transaction::new(c.ledger());
        tx.put_state(
            keys::pending_requests_key().unwrap(),
            br#"{"round":[3],"clientID":["carol"]}"#.to_vec(),
        );
        tx.commit().unwrap();

        run(&c, "alice", Transient::new(), |s| s.request_key(4)).unwrap();
        let batch = run(&c, "appserver", Transient::new(), |s| s.drain_requests()).unwrap();
        assert_eq!(
            batch.into_requests().unwrap(),
            vec![
                KeyRequest { round: 3, name: "carol".into() },
                KeyRequest { round: 4, name: "alice".into() },
            ]
        );
    }

    #[test]
    fn misaligned_queue_is_fatal() {
        let c = setup(1.0);
        let mut tx = Transaction::new(c.ledger());
        tx.put_state(
            keys::pending_requests_key().unwrap(),
            br#"{"round":[3,4],"clientID":["carol"]}"#.to_vec(),
        );
        tx.commit().unwrap();

        let err = run(&c, "appserver", Transient::new(), |s| s.drain_requests()).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn issue_then_fetch_charges_every_time() {
        let c = setup(2.0);
        run(&c, "appserver", key_material(), |s| s.issue_key(1, COLLECTION)).unwrap();

        for expected in [1.0, 0.0] {
            let key = run(&c, "alice", Transient::new(), |s| s.fetch_key(1, COLLECTION)).unwrap();
            assert_eq!(key.password, "hunter2");
            assert_eq!(key.iv, "0011223344556677");
            let state = run(&c, "alice", Transient::new(), |s| s.current_state()).unwrap();
            assert_eq!(state.token_balance, expected);
        }

        let err = run(&c, "alice", Transient::new(), |s| s.fetch_key(1, COLLECTION)).unwrap_err();
        assert!(matches!(err, Error::InsufficientTokens { .. }));
    }

    #[test]
    fn issue_twice_fails() {
        let c = setup(1.0);
        run(&c, "appserver", key_material(), |s| s.issue_key(1, COLLECTION)).unwrap();
        let err = run(&c, "appserver", key_material(), |s| s.issue_key(1, COLLECTION)).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn issue_requires_transient_material() {
        let c = setup(1.0);
        let err = run(&c, "appserver", Transient::new(), |s| s.issue_key(1, COLLECTION)).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));

        let mut bad = key_material();
        bad.insert(TRANSIENT_IV.into(), vec![0xff, 0xfe]);
        let err = run(&c, "appserver", bad, |s| s.issue_key(1, COLLECTION)).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn failed_key_fetch_leaves_balance() {
        let c = setup(1.0);
        let err = run(&c, "alice", Transient::new(), |s| s.fetch_key(5, COLLECTION)).unwrap_err();
        assert!(matches!(err, Error::RoundNotFound(5)));
        let state = run(&c, "alice", Transient::new(), |s| s.current_state()).unwrap();
        assert_eq!(state.token_balance, 1.0);
    }

    #[test]
    fn keys_stay_out_of_world_state() {
        let c = setup(1.0);
        run(&c, "appserver", key_material(), |s| s.issue_key(1, COLLECTION)).unwrap();
        let mut tx = Transaction::new(c.ledger());
        assert!(tx.get_state(&keys::symmetric_key_key(1).unwrap()).unwrap().is_none());
    }

    #[test]
    fn role_enforcement_blocks_clients() {
        let config = ExchangeConfig {
            enforce_aggregator_role: true,
            ..Default::default()
        };
        let c = RoundContract::new(MemoryLedger::new(), config).unwrap();
        let err = run(&c, "alice", key_material(), |s| s.issue_key(1, COLLECTION)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
        let err = run(&c, "alice", Transient::new(), |s| s.drain_requests()).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn unregistered_caller_cannot_request() {
        let c = setup(1.0);
        let err = run(&c, "mallory", Transient::new(), |s| s.request_key(1)).unwrap_err();
        assert!(matches!(err, Error::NotRegistered(_)));
    }
}
