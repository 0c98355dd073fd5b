//! Ledger keys.
//!
//! Composite keys frame every component with a `0x00` terminator behind a
//! leading `0x00` namespace byte:
//!
//! ```text
//! 0x00 object_type 0x00 attr_1 0x00 ... attr_n 0x00
//! ```
//!
//! Because no component may itself contain `0x00`, two different tuples can
//! never encode to the same bytes, and a partial key built from the leading
//! attributes is a byte prefix of exactly the keys that share them.

use crate::error::{Error, Result};

const COMPOSITE_NAMESPACE: u8 = 0x00;
const SEPARATOR: u8 = 0x00;

/// A key into the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(Vec<u8>);

impl StateKey {
    /// Build a composite key from an object type and its attributes.
    pub fn composite<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> Result<Self> {
        if object_type.is_empty() {
            return Err(Error::InvalidKey("empty object type".into()));
        }
        Self::encode(object_type, attributes)
    }

    /// Build the scan prefix for every composite key of `object_type` whose
    /// leading attributes equal `attributes`.
    pub fn partial<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> Result<Self> {
        Self::composite(object_type, attributes)
    }

    /// Build a plain key. Plain keys live outside the composite namespace.
    pub fn simple(name: &str) -> Result<Self> {
        match name.as_bytes().first() {
            None => Err(Error::InvalidKey("empty key".into())),
            Some(&COMPOSITE_NAMESPACE) => Err(Error::InvalidKey(format!(
                "simple key {:?} starts with the composite namespace byte",
                name
            ))),
            Some(_) => Ok(Self(name.as_bytes().to_vec())),
        }
    }

    /// Wrap raw bytes read back from a backend.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this key starts with `prefix`.
    pub fn starts_with(&self, prefix: &StateKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Whether this is a composite key.
    pub fn is_composite(&self) -> bool {
        self.0.first() == Some(&COMPOSITE_NAMESPACE)
    }

    /// Split a composite key back into its object type and attributes.
    pub fn split_composite(&self) -> Result<(String, Vec<String>)> {
        if !self.is_composite() || self.0.last() != Some(&SEPARATOR) || self.0.len() < 3 {
            return Err(Error::InvalidKey(format!("{} is not a composite key", self)));
        }
        let body = &self.0[1..self.0.len() - 1];
        let mut parts = body.split(|b| *b == SEPARATOR).map(|part| {
            String::from_utf8(part.to_vec())
                .map_err(|_| Error::InvalidKey("composite component is not UTF-8".into()))
        });
        let object_type = parts
            .next()
            .ok_or_else(|| Error::InvalidKey("missing object type".into()))??;
        let attributes = parts.collect::<Result<Vec<_>>>()?;
        Ok((object_type, attributes))
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    fn encode<S: AsRef<str>>(object_type: &str, attributes: &[S]) -> Result<Self> {
        let mut bytes = vec![COMPOSITE_NAMESPACE];
        for component in std::iter::once(object_type).chain(attributes.iter().map(|a| a.as_ref())) {
            if component.as_bytes().contains(&SEPARATOR) {
                return Err(Error::InvalidKey(format!(
                    "component {:?} contains a 0x00 byte",
                    component
                )));
            }
            bytes.extend_from_slice(component.as_bytes());
            bytes.push(SEPARATOR);
        }
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let composite = self.is_composite();
        let body = if composite { &self.0[1..] } else { &self.0[..] };
        match std::str::from_utf8(body) {
            // Framing bytes render as ':'
            Ok(text) if composite => {
                write!(f, "{}", text.replace('\0', ":").trim_end_matches(':'))
            }
            Ok(text) => write!(f, "{}", text),
            Err(_) => write!(f, "0x{}", self.to_hex()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_roundtrip() {
        let key = StateKey::composite("Client", &["3", "alice"]).unwrap();
        let (object_type, attrs) = key.split_composite().unwrap();
        assert_eq!(object_type, "Client");
        assert_eq!(attrs, vec!["3".to_string(), "alice".to_string()]);
    }

    #[test]
    fn composite_no_concatenation_collision() {
        // "1" + "1alice" must differ from "11" + "alice"
        let a = StateKey::composite("Client", &["1", "1alice"]).unwrap();
        let b = StateKey::composite("Client", &["11", "alice"]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn partial_prefix_is_exact_on_attribute_boundary() {
        let round_one = StateKey::partial("Client", &["1"]).unwrap();
        let in_one = StateKey::composite("Client", &["1", "alice"]).unwrap();
        let in_ten = StateKey::composite("Client", &["10", "alice"]).unwrap();
        assert!(in_one.starts_with(&round_one));
        assert!(!in_ten.starts_with(&round_one));
    }

    #[test]
    fn rejects_separator_in_component() {
        assert!(StateKey::composite("Client", &["a\0b"]).is_err());
        assert!(StateKey::composite("", &["a"]).is_err());
    }

    #[test]
    fn simple_keys_stay_out_of_composite_namespace() {
        let key = StateKey::simple("KeyRequests").unwrap();
        assert!(!key.is_composite());
        assert!(StateKey::simple("").is_err());
        assert!(StateKey::simple("\0x").is_err());
    }

    #[test]
    fn display_is_readable() {
        let key = StateKey::composite("Server", &["2", "appserver"]).unwrap();
        assert_eq!(key.to_string(), "Server:2:appserver");
        let accented = StateKey::composite("Client", &["1", "José"]).unwrap();
        assert_eq!(accented.to_string(), "Client:1:José");
        assert_eq!(StateKey::from_bytes(vec![0xff, 0x01]).to_string(), "0xff01");
    }
}
