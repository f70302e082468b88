//! Identity and namespace types
//!
//! All cross-component references in CoralKM are identity values: DIDs for
//! parties, UUIDs for namespaces and message threads. No component ever holds
//! a pointer into another component's state.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Decentralized identifier of a protocol party (wallet, gateway or guardian).
///
/// Treated as an opaque string; resolution and key management belong to the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    /// Wrap a DID string.
    pub fn new(did: impl Into<String>) -> Self {
        Did(did.into())
    }

    /// The underlying string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Did {
    fn from(value: &str) -> Self {
        Did::new(value)
    }
}

/// Opaque per-wallet bucket on a gateway.
///
/// The namespace doubles as the associated-data object for backup encryption:
/// its canonical JSON form binds each backup ciphertext to exactly one
/// namespace identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Globally unique within the issuing gateway.
    pub id: Uuid,
    /// The gateway that owns this namespace.
    pub gateway_did: Did,
}

impl Namespace {
    /// Create a namespace handle.
    pub fn new(id: Uuid, gateway_did: Did) -> Self {
        Namespace { id, gateway_did }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.gateway_did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_is_transparent_on_the_wire() {
        let did = Did::new("did:coral:alice");
        let json = serde_json::to_string(&did).unwrap();
        assert_eq!(json, "\"did:coral:alice\"");
        let back: Did = serde_json::from_str(&json).unwrap();
        assert_eq!(back, did);
    }

    #[test]
    fn namespace_roundtrip() {
        let ns = Namespace::new(Uuid::nil(), Did::new("did:coral:gw"));
        let json = serde_json::to_value(&ns).unwrap();
        let back: Namespace = serde_json::from_value(json).unwrap();
        assert_eq!(back, ns);
    }
}
