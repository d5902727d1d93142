//! # Private Transaction Entity
//!
//! The unit of private work flowing through the coordinator, together with
//! its lifecycle phase and the endorsement/delegation records attached to it
//! along the way.

use crate::ids::{NodeName, PartyName, StateId, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Lifecycle phase of a private transaction, as seen by one node.
///
/// Phases advance monotonically except for the explicit transition to
/// `Reverted`. `Confirmed` and `Reverted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPhase {
    /// Inputs and outputs declared by the assembling node.
    Assembled,
    /// Assembled on a remote node; tracked here for dependency edges only.
    Observed,
    /// This node has accepted sequencing ownership.
    Assigned,
    /// Two or more unsatisfied remote dependencies.
    Blocked,
    /// Ownership forwarded to another node.
    Delegated,
    /// All dependencies satisfiable here; awaiting a full endorsement set.
    Ready,
    /// Submitted to the base ledger.
    Dispatched,
    /// Anchored on the base ledger at a known block.
    Confirmed,
    /// Abandoned or lost contention.
    Reverted,
}

impl TransactionPhase {
    /// Whether the phase admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Reverted)
    }

    /// Whether a transition from `self` to `next` is legal.
    ///
    /// Every non-terminal phase may move to `Reverted`; everything else
    /// follows the lifecycle table.
    #[must_use]
    pub fn may_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Reverted {
            return true;
        }
        matches!(
            (self, next),
            (Self::Assembled, Self::Assigned)
                | (Self::Assembled, Self::Observed)
                | (Self::Observed, Self::Assigned)
                | (Self::Observed, Self::Delegated)
                | (Self::Observed, Self::Confirmed)
                | (Self::Assigned, Self::Ready)
                | (Self::Assigned, Self::Blocked)
                | (Self::Assigned, Self::Delegated)
                | (Self::Blocked, Self::Ready)
                | (Self::Blocked, Self::Delegated)
                | (Self::Ready, Self::Dispatched)
                | (Self::Dispatched, Self::Confirmed)
                | (Self::Delegated, Self::Assigned)
                | (Self::Delegated, Self::Confirmed)
        )
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("illegal phase transition for {transaction}: {from:?} -> {to:?}")]
pub struct PhaseError {
    pub transaction: TransactionId,
    pub from: TransactionPhase,
    pub to: TransactionPhase,
}

/// An endorsement received for a transaction.
///
/// Unique by `(transaction_id, party)`; later signatures from the same party
/// replace earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementRecord {
    pub transaction_id: TransactionId,
    pub party: PartyName,
    pub signature: Vec<u8>,
    pub input_states: BTreeSet<StateId>,
}

/// A delegation of sequencing ownership between nodes.
///
/// Only the latest record by `timestamp` is authoritative for a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub transaction_id: TransactionId,
    pub delegating_node: NodeName,
    pub delegate_node: NodeName,
    pub reason: String,
    pub timestamp: u64,
}

impl DelegationRecord {
    /// Whether this record supersedes `other` for the same transaction.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.timestamp >= other.timestamp
    }
}

/// A unit of private work: consumes `inputs`, produces `outputs`, references
/// `infos` without consuming them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateTransaction {
    pub id: TransactionId,
    /// The node on which the client submitted this transaction.
    pub assembling_node: NodeName,
    /// The node that must currently sequence this transaction.
    pub current_owner_node: NodeName,
    pub inputs: BTreeSet<StateId>,
    pub outputs: BTreeSet<StateId>,
    pub infos: BTreeSet<StateId>,
    pub required_endorsers: BTreeSet<PartyName>,
    pub endorsements: Vec<EndorsementRecord>,
    pub phase: TransactionPhase,
}

impl PrivateTransaction {
    /// Create a freshly assembled transaction owned by its assembler.
    #[must_use]
    pub fn assembled(id: TransactionId, assembling_node: NodeName) -> Self {
        Self {
            id,
            current_owner_node: assembling_node.clone(),
            assembling_node,
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            infos: BTreeSet::new(),
            required_endorsers: BTreeSet::new(),
            endorsements: Vec::new(),
            phase: TransactionPhase::Assembled,
        }
    }

    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = StateId>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = StateId>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_infos(mut self, infos: impl IntoIterator<Item = StateId>) -> Self {
        self.infos = infos.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_required_endorsers(
        mut self,
        parties: impl IntoIterator<Item = PartyName>,
    ) -> Self {
        self.required_endorsers = parties.into_iter().collect();
        self
    }

    /// Inputs and outputs must be disjoint.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.inputs.is_disjoint(&self.outputs)
    }

    /// Apply a lifecycle transition, rejecting illegal ones.
    pub fn transition_to(&mut self, next: TransactionPhase) -> Result<(), PhaseError> {
        if !self.phase.may_transition_to(next) {
            return Err(PhaseError {
                transaction: self.id,
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Record an endorsement, replacing any prior one from the same party.
    pub fn record_endorsement(&mut self, record: EndorsementRecord) {
        self.endorsements.retain(|e| e.party != record.party);
        self.endorsements.push(record);
    }

    /// Whether every required endorser has signed.
    #[must_use]
    pub fn endorsement_complete(&self) -> bool {
        self.required_endorsers
            .iter()
            .all(|party| self.endorsements.iter().any(|e| &e.party == party))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(n: u8) -> StateId {
        StateId::new([n; 32])
    }

    fn tx(node: &str) -> PrivateTransaction {
        PrivateTransaction::assembled(TransactionId::random(), NodeName::new(node))
    }

    #[test]
    fn test_assembled_is_owned_by_assembler() {
        let t = tx("node1");
        assert_eq!(t.assembling_node, t.current_owner_node);
        assert_eq!(t.phase, TransactionPhase::Assembled);
    }

    #[test]
    fn test_inputs_outputs_disjointness() {
        let good = tx("node1").with_inputs([state(1)]).with_outputs([state(2)]);
        assert!(good.is_well_formed());

        let bad = tx("node1").with_inputs([state(1)]).with_outputs([state(1)]);
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn test_phase_monotonic_transitions() {
        let mut t = tx("node1");
        t.transition_to(TransactionPhase::Assigned).unwrap();
        t.transition_to(TransactionPhase::Ready).unwrap();
        t.transition_to(TransactionPhase::Dispatched).unwrap();
        t.transition_to(TransactionPhase::Confirmed).unwrap();

        // Terminal: nothing further, not even revert.
        let err = t.transition_to(TransactionPhase::Reverted).unwrap_err();
        assert_eq!(err.from, TransactionPhase::Confirmed);
    }

    #[test]
    fn test_no_phase_regression() {
        let mut t = tx("node1");
        t.transition_to(TransactionPhase::Assigned).unwrap();
        assert!(t.transition_to(TransactionPhase::Assembled).is_err());
    }

    #[test]
    fn test_revert_allowed_from_any_non_terminal() {
        for phase in [
            TransactionPhase::Assembled,
            TransactionPhase::Assigned,
            TransactionPhase::Blocked,
            TransactionPhase::Ready,
            TransactionPhase::Dispatched,
        ] {
            assert!(phase.may_transition_to(TransactionPhase::Reverted), "{phase:?}");
        }
        assert!(!TransactionPhase::Reverted.may_transition_to(TransactionPhase::Reverted));
    }

    #[test]
    fn test_endorsement_uniqueness_by_party() {
        let mut t = tx("node1").with_required_endorsers([PartyName::new("notary@node2")]);
        assert!(!t.endorsement_complete());

        let record = EndorsementRecord {
            transaction_id: t.id,
            party: PartyName::new("notary@node2"),
            signature: vec![1, 2, 3],
            input_states: BTreeSet::new(),
        };
        t.record_endorsement(record.clone());
        t.record_endorsement(EndorsementRecord {
            signature: vec![4, 5, 6],
            ..record
        });

        assert_eq!(t.endorsements.len(), 1);
        assert_eq!(t.endorsements[0].signature, vec![4, 5, 6]);
        assert!(t.endorsement_complete());
    }

    #[test]
    fn test_delegation_latest_wins() {
        let id = TransactionId::random();
        let older = DelegationRecord {
            transaction_id: id,
            delegating_node: NodeName::new("node1"),
            delegate_node: NodeName::new("node2"),
            reason: "remote dependency".into(),
            timestamp: 10,
        };
        let newer = DelegationRecord {
            delegate_node: NodeName::new("node3"),
            timestamp: 11,
            ..older.clone()
        };
        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
    }
}
