//! Caller identity resolution.
//!
//! The host hands each invocation an opaque identity blob. For X.509
//! callers this is the base64 encoding of `x509::{subject}::{issuer}`, and
//! the participant name is the subject's common name. The issuer never
//! contributes to the name.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Error, Result};
use crate::models::{Participant, Role};

/// Maps an identity blob to a participant.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, identity: &str) -> Result<Participant>;
}

/// Resolves base64 X.509 identities by common name.
///
/// The aggregator is whoever resolves to `aggregator_name`; everyone else is
/// a client.
#[derive(Debug, Clone)]
pub struct X509IdentityResolver {
    aggregator_name: String,
}

impl X509IdentityResolver {
    pub fn new(aggregator_name: impl Into<String>) -> Self {
        Self {
            aggregator_name: aggregator_name.into(),
        }
    }
}

impl IdentityResolver for X509IdentityResolver {
    fn resolve(&self, identity: &str) -> Result<Participant> {
        let decoded = STANDARD
            .decode(identity.trim())
            .map_err(|e| Error::MalformedInput(format!("identity is not base64: {}", e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::MalformedInput("identity is not UTF-8".into()))?;
        let name = common_name(subject(&decoded));
        if name.is_empty() {
            return Err(Error::MalformedInput("identity has no common name".into()));
        }
        let role = if name == self.aggregator_name {
            Role::Server
        } else {
            Role::Client
        };
        Ok(Participant { name, role })
    }
}

/// The subject part of a decoded `x509::{subject}::{issuer}` identity.
pub fn subject(decoded: &str) -> &str {
    let rest = decoded.strip_prefix("x509::").unwrap_or(decoded);
    rest.split("::").next().unwrap_or(rest)
}

/// The value of the first `CN=` attribute of a subject, or an empty
/// string if it has none.
pub fn common_name(subject: &str) -> String {
    subject
        .split(',')
        .find_map(|attribute| attribute.trim().strip_prefix("CN="))
        .map(|cn| cn.trim().to_string())
        .unwrap_or_default()
}

/// Build an identity blob for a subject and issuer.
pub fn encode_x509_identity(subject: &str, issuer: &str) -> String {
    STANDARD.encode(format!("x509::{}::{}", subject, issuer))
}

/// Short stable fingerprint of an identity blob, for logs.
pub fn fingerprint(identity: &str) -> String {
    let hash = blake3::hash(identity.as_bytes());
    hex::encode(&hash.as_bytes()[..8])
}
