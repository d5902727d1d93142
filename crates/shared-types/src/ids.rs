//! # Identifiers
//!
//! Newtype identifiers used across the coordinator. States and nullifiers
//! are 32-byte content hashes; transactions are UUIDs ordered by byte value
//! (the ordering is load-bearing: dispatch tie-breaks and blocked-queue
//! re-evaluation both sort by [`TransactionId`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A 32-byte content hash identifying a private state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub [u8; 32]);

impl StateId {
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full hashes drown log lines; eight hex chars identify a state in
        // any realistic trace.
        write!(f, "StateId({}…)", hex::encode(&self.0[..4]))
    }
}

/// A 32-byte nullifier: proves a state was consumed without naming it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    #[must_use]
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nullifier({}…)", hex::encode(&self.0[..4]))
    }
}

/// Unique identifier of a private transaction.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug, Default,
)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TransactionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Name of a node in the network, as registered in the transport registry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug, Default)]
pub struct NodeName(pub String);

impl NodeName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A party required by a privacy policy to endorse transactions.
///
/// Parties are qualified names (`identity@node`); the node segment routes
/// endorsement requests.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub struct PartyName(pub String);

impl PartyName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The node segment of a qualified `identity@node` name, if present.
    #[must_use]
    pub fn node(&self) -> Option<NodeName> {
        self.0
            .split_once('@')
            .map(|(_, node)| NodeName::new(node))
    }
}

impl fmt::Display for PartyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartyName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_id_display_is_hex() {
        let id = StateId::new([0xAB; 32]);
        assert_eq!(id.to_string(), "ab".repeat(32));
    }

    #[test]
    fn test_state_id_debug_is_truncated() {
        let id = StateId::new([0xCD; 32]);
        assert_eq!(format!("{id:?}"), "StateId(cdcdcdcd…)");
    }

    #[test]
    fn test_transaction_id_ordering_follows_bytes() {
        let low = TransactionId(Uuid::from_bytes([0x01; 16]));
        let high = TransactionId(Uuid::from_bytes([0x02; 16]));
        assert!(low < high);
    }

    #[test]
    fn test_party_node_segment() {
        let party = PartyName::new("notary@node2");
        assert_eq!(party.node(), Some(NodeName::new("node2")));
        assert_eq!(PartyName::new("local-only").node(), None);
    }

    #[test]
    fn test_ids_serde_round_trip() {
        let id = StateId::new([7; 32]);
        let json = serde_json::to_string(&id).unwrap();
        let back: StateId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
