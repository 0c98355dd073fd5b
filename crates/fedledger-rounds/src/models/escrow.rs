//! Key escrow records.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Round;
use crate::error::{Error, Result};

/// One pending request for a round's symmetric key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    pub round: Round,
    pub name: String,
}

/// Process-wide queue of key requests, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingKeyRequests {
    pub requests: Vec<KeyRequest>,
}

/// Stored forms of the queue. The column form is the layout older
/// deployments wrote: two parallel sequences that must stay aligned.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredKeyRequests {
    Pairs {
        requests: Vec<KeyRequest>,
    },
    Columns {
        round: Vec<Round>,
        #[serde(rename = "clientID")]
        client_id: Vec<String>,
    },
}

impl PendingKeyRequests {
    /// Decode the stored queue, accepting either layout.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        match serde_json::from_slice::<StoredKeyRequests>(data)? {
            StoredKeyRequests::Pairs { requests } => Ok(Self { requests }),
            StoredKeyRequests::Columns { round, client_id } => {
                KeyRequestBatch {
                    rounds: round,
                    names: client_id,
                }
                .into_requests()
                .map(|requests| Self { requests })
            }
        }
    }

    pub fn push(&mut self, round: Round, name: impl Into<String>) {
        self.requests.push(KeyRequest {
            round,
            name: name.into(),
        });
    }

    /// Take every request, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<KeyRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Drained requests in the parallel-sequence shape consumers expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequestBatch {
    pub rounds: Vec<Round>,
    pub names: Vec<String>,
}

impl KeyRequestBatch {
    pub fn from_requests(requests: &[KeyRequest]) -> Self {
        Self {
            rounds: requests.iter().map(|r| r.round).collect(),
            names: requests.iter().map(|r| r.name.clone()).collect(),
        }
    }

    /// Zip the columns back into pairs. Mismatched lengths are fatal.
    pub fn into_requests(self) -> Result<Vec<KeyRequest>> {
        if self.rounds.len() != self.names.len() {
            return Err(Error::InvariantViolation(format!(
                "key request columns misaligned: {} rounds, {} names",
                self.rounds.len(),
                self.names.len()
            )));
        }
        Ok(self
            .rounds
            .into_iter()
            .zip(self.names)
            .map(|(round, name)| KeyRequest { round, name })
            .collect())
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }
}

/// Symmetric key material for one round, kept in a private collection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricKey {
    pub password: String,
    pub iv: String,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("password", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_queue() {
        let mut queue = PendingKeyRequests::default();
        queue.push(1, "alice");
        queue.push(2, "bob");
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert_eq!(drained[1], KeyRequest { round: 2, name: "bob".into() });
    }

    #[test]
    fn decodes_column_layout() {
        let queue =
            PendingKeyRequests::from_slice(br#"{"round":[3,4],"clientID":["alice","bob"]}"#)
                .unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.requests[0], KeyRequest { round: 3, name: "alice".into() });
    }

    #[test]
    fn misaligned_columns_are_fatal() {
        let err = PendingKeyRequests::from_slice(br#"{"round":[3,4],"clientID":["alice"]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }

    #[test]
    fn batch_keeps_order() {
        let requests = vec![
            KeyRequest { round: 7, name: "carol".into() },
            KeyRequest { round: 5, name: "alice".into() },
        ];
        let batch = KeyRequestBatch::from_requests(&requests);
        assert_eq!(batch.rounds, vec![7, 5]);
        assert_eq!(batch.names, vec!["carol".to_string(), "alice".to_string()]);
        assert_eq!(batch.into_requests().unwrap(), requests);
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = SymmetricKey {
            password: "hunter2".into(),
            iv: "00ff".into(),
        };
        assert!(!format!("{:?}", key).contains("hunter2"));
    }
}
