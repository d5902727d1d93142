//! # The Sequencer State Machine
//!
//! One instance owns one privacy contract on one node. Handlers are
//! synchronous: they mutate local state and return [`Command`]s for the
//! runtime to execute. Events for one transaction are processed in arrival
//! order; nothing here suspends.

use crate::config::SequencerConfig;
use crate::domain::command::Command;
use crate::domain::errors::SequencerError;
use crate::domain::events::{IndexedBlockEvent, LedgerReceipt};
use crate::ports::TimeSource;
use shared_types::{
    DelegationRecord, EndorsementRecord, NodeName, PartyName, PrivateTransaction, StateId,
    TransactionId, TransactionPhase,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use veil_01_state_store::{StateRefStore, StateStoreError};
use veil_02_dep_graph::TxGraph;
use veil_04_endorsement::{EndorsementGate, EndorsementRequest, EndorsementVerdict};
use veil_05_transport::reader::InboundMessage;
use veil_05_transport::{
    CoordinatorMessage, DelegationAck, DelegationRequest, EndorsementRequestMsg,
    EndorsementResponseMsg, RevertReason, TransactionAssembled, TransactionBlocked,
    TransactionConfirmed, TransactionDelegated, TransactionEndorsed, TransactionReverted,
};

/// The per-contract-instance coordinator state machine.
pub struct Sequencer {
    node: NodeName,
    component: String,
    config: SequencerConfig,
    store: Arc<StateRefStore>,
    time: Arc<dyn TimeSource>,

    graph: TxGraph,
    transactions: HashMap<TransactionId, PrivateTransaction>,
    /// Latest authoritative delegation per transaction.
    delegations: HashMap<TransactionId, DelegationRecord>,
    /// Transactions currently in the blocked stage. Entries leave this set
    /// on every exit from `Blocked`, including delegation.
    blocked: BTreeSet<TransactionId>,
    gate: EndorsementGate,
    endorsement_retries: HashMap<(TransactionId, PartyName), u32>,
    /// Confirmed transactions and their outputs, by block, kept within the
    /// re-org window for cascade reverts.
    confirmed_by_block: BTreeMap<u64, Vec<(TransactionId, BTreeSet<StateId>)>>,
}

impl Sequencer {
    #[must_use]
    pub fn new(
        node: NodeName,
        component: impl Into<String>,
        config: SequencerConfig,
        store: Arc<StateRefStore>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            node,
            component: component.into(),
            config,
            store,
            time,
            graph: TxGraph::new(),
            transactions: HashMap::new(),
            delegations: HashMap::new(),
            blocked: BTreeSet::new(),
            gate: EndorsementGate::new(),
            endorsement_retries: HashMap::new(),
            confirmed_by_block: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn node(&self) -> &NodeName {
        &self.node
    }

    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Lifecycle phase of a transaction as this instance sees it.
    #[must_use]
    pub fn phase_of(&self, id: &TransactionId) -> Option<TransactionPhase> {
        self.transactions.get(id).map(|t| t.phase)
    }

    /// Whether a transaction sits in the blocked index.
    #[must_use]
    pub fn is_blocked(&self, id: &TransactionId) -> bool {
        self.blocked.contains(id)
    }

    /// Current sequencing owner as this instance sees it.
    #[must_use]
    pub fn owner_of(&self, id: &TransactionId) -> Option<NodeName> {
        self.transactions
            .get(id)
            .map(|t| t.current_owner_node.clone())
    }

    // ------------------------------------------------------------------
    // Event entry points
    // ------------------------------------------------------------------

    /// Route one decoded peer message to its handler.
    pub fn handle_peer(&mut self, inbound: InboundMessage) -> Result<Vec<Command>, SequencerError> {
        let sender = inbound.sender_node.clone();
        let reply_to = inbound.reply_to_node.clone();
        let correlation = Some(inbound.message_id);
        match inbound.message {
            CoordinatorMessage::TransactionAssembled(event) => {
                self.on_transaction_assembled(&sender, &event)
            }
            CoordinatorMessage::TransactionEndorsed(event) => self.on_transaction_endorsed(&event),
            CoordinatorMessage::TransactionBlocked(event) => {
                debug!(tx = %event.transaction_id, peer = %sender, "[veil-06] peer reports blocked transaction");
                Ok(Vec::new())
            }
            CoordinatorMessage::TransactionDelegated(event) => self.on_transaction_delegated(&event),
            CoordinatorMessage::TransactionConfirmed(event) => {
                self.on_transaction_confirmed(event.transaction_id, event.block_number, false)
            }
            CoordinatorMessage::TransactionReverted(event) => {
                self.revert_transaction(&event.transaction_id, event.reason, false)
            }
            CoordinatorMessage::DelegationRequest(request) => {
                self.on_delegation_request(&reply_to, correlation, request)
            }
            CoordinatorMessage::DelegationAck(ack) => self.on_delegation_ack(&ack),
            CoordinatorMessage::EndorsementRequest(request) => {
                self.on_endorsement_request(&reply_to, correlation, request)
            }
            CoordinatorMessage::EndorsementResponse(response) => {
                self.on_endorsement_response(&response)
            }
        }
    }

    /// A client on this node finished assembling a transaction.
    pub fn on_transaction_submitted(
        &mut self,
        transaction: PrivateTransaction,
    ) -> Result<Vec<Command>, SequencerError> {
        if self.transactions.contains_key(&transaction.id) {
            return Ok(Vec::new());
        }
        if !transaction.is_well_formed() {
            return Err(SequencerError::IllFormed {
                transaction: transaction.id,
            });
        }

        // Cycles are refused and reported to the submitting client.
        self.graph.insert(
            transaction.id,
            transaction.inputs.iter().copied(),
            transaction.outputs.iter().copied(),
        )?;

        for output in &transaction.outputs {
            self.store.record_output(*output, transaction.id)?;
        }

        let announce = CoordinatorMessage::TransactionAssembled(TransactionAssembled {
            transaction_id: transaction.id,
            inputs: transaction.inputs.clone(),
            outputs: transaction.outputs.clone(),
            infos: transaction.infos.clone(),
        });
        info!(tx = %transaction.id, "[veil-06] transaction assembled locally");
        self.transactions.insert(transaction.id, transaction);

        Ok(vec![Command::Broadcast { message: announce }])
    }

    /// A peer assembled a transaction; track it for dependency edges.
    pub fn on_transaction_assembled(
        &mut self,
        origin: &NodeName,
        event: &TransactionAssembled,
    ) -> Result<Vec<Command>, SequencerError> {
        if self.transactions.contains_key(&event.transaction_id) {
            return Ok(Vec::new());
        }

        let mut transaction =
            PrivateTransaction::assembled(event.transaction_id, origin.clone());
        transaction.inputs = event.inputs.clone();
        transaction.outputs = event.outputs.clone();
        transaction.infos = event.infos.clone();

        if let Err(e) = self.graph.insert(
            transaction.id,
            transaction.inputs.iter().copied(),
            transaction.outputs.iter().copied(),
        ) {
            // A remote assembly that cycles against local state is that
            // node's defect; drop it rather than poison the graph.
            warn!(tx = %transaction.id, origin = %origin, error = %e, "[veil-06] refusing remote assembly");
            return Ok(Vec::new());
        }

        if origin != &self.node {
            transaction.transition_to(TransactionPhase::Observed)?;
        }
        for output in &transaction.outputs {
            self.store.record_output(*output, transaction.id)?;
        }
        debug!(tx = %transaction.id, origin = %origin, "[veil-06] transaction observed");
        self.transactions.insert(transaction.id, transaction);
        Ok(Vec::new())
    }

    /// Accept sequencing ownership of a locally assembled transaction.
    pub fn assign_transaction(
        &mut self,
        id: &TransactionId,
    ) -> Result<Vec<Command>, SequencerError> {
        let transaction = self
            .transactions
            .get_mut(id)
            .ok_or(SequencerError::UnknownTransaction { transaction: *id })?;
        if transaction.current_owner_node != self.node {
            return Err(SequencerError::NotOwned {
                transaction: *id,
                owner: transaction.current_owner_node.to_string(),
            });
        }
        if transaction.phase == TransactionPhase::Assembled {
            transaction.transition_to(TransactionPhase::Assigned)?;
        }
        self.start_sequencing(*id)
    }

    /// An endorsement landed somewhere in the network.
    pub fn on_transaction_endorsed(
        &mut self,
        event: &TransactionEndorsed,
    ) -> Result<Vec<Command>, SequencerError> {
        let Some(transaction) = self.transactions.get_mut(&event.transaction_id) else {
            debug!(tx = %event.transaction_id, "[veil-06] endorsement for unknown transaction ignored");
            return Ok(Vec::new());
        };
        transaction.record_endorsement(EndorsementRecord {
            transaction_id: event.transaction_id,
            party: event.party.clone(),
            signature: event.signature.clone(),
            input_states: transaction.inputs.clone(),
        });
        self.refresh_endorsed_flag(&event.transaction_id)?;
        self.try_dispatch()
    }

    /// A delegation event from elsewhere in the network; latest timestamp
    /// wins.
    pub fn on_transaction_delegated(
        &mut self,
        event: &TransactionDelegated,
    ) -> Result<Vec<Command>, SequencerError> {
        let record = DelegationRecord {
            transaction_id: event.transaction_id,
            delegating_node: event.delegating_node.clone(),
            delegate_node: event.delegate_node.clone(),
            reason: "observed".into(),
            timestamp: event.timestamp,
        };
        match self.delegations.get(&event.transaction_id) {
            Some(existing) if !record.supersedes(existing) => {
                debug!(tx = %event.transaction_id, "[veil-06] stale delegation event ignored");
                return Ok(Vec::new());
            }
            _ => {
                self.delegations.insert(event.transaction_id, record);
            }
        }

        let transaction = self
            .transactions
            .entry(event.transaction_id)
            .or_insert_with(|| {
                // First news of this transaction is its delegation; track a
                // stub until an assembly event or delegation request fills
                // in the states.
                let mut stub = PrivateTransaction::assembled(
                    event.transaction_id,
                    event.delegating_node.clone(),
                );
                let _ = stub.transition_to(TransactionPhase::Observed);
                stub
            });
        transaction.current_owner_node = event.delegate_node.clone();

        // A dependency's owner moving can collapse R for blocked entries.
        self.reevaluate_blocked()
    }

    /// Terminal confirmation from the base ledger. `announce` is set when
    /// this instance owns the dispatch and must tell the network.
    pub fn on_transaction_confirmed(
        &mut self,
        id: TransactionId,
        block_number: u64,
        announce: bool,
    ) -> Result<Vec<Command>, SequencerError> {
        let Some(current) = self.transactions.get(&id) else {
            debug!(tx = %id, "[veil-06] confirmation for unknown transaction ignored");
            return Ok(Vec::new());
        };
        if !current.phase.may_transition_to(TransactionPhase::Confirmed) {
            warn!(tx = %id, phase = ?current.phase, "[veil-06] confirmation in unexpected phase ignored");
            return Ok(Vec::new());
        }
        let Some(mut transaction) = self.transactions.remove(&id) else {
            return Ok(Vec::new());
        };
        transaction.transition_to(TransactionPhase::Confirmed)?;

        for output in &transaction.outputs {
            self.store.record_confirm(*output, block_number)?;
        }
        self.confirmed_by_block
            .entry(block_number)
            .or_default()
            .push((id, transaction.outputs.clone()));
        self.prune_confirmed(block_number);

        if self.graph.contains(&id) {
            self.graph.remove(&id)?;
        }
        self.blocked.remove(&id);
        self.delegations.remove(&id);
        info!(tx = %id, block = block_number, "[veil-06] transaction confirmed");

        let mut commands = Vec::new();
        if announce {
            commands.push(Command::Broadcast {
                message: CoordinatorMessage::TransactionConfirmed(TransactionConfirmed {
                    transaction_id: id,
                    block_number,
                }),
            });
        }
        commands.extend(self.reevaluate_blocked()?);
        commands.extend(self.try_dispatch()?);
        Ok(commands)
    }

    /// Abandon a transaction and cascade to its descendants.
    ///
    /// `announce` is set when the revert originates here; reverts learned
    /// from peers are applied silently to avoid broadcast storms.
    pub fn revert_transaction(
        &mut self,
        id: &TransactionId,
        reason: RevertReason,
        announce: bool,
    ) -> Result<Vec<Command>, SequencerError> {
        if !self.transactions.contains_key(id) {
            return Ok(Vec::new());
        }
        let descendants = if self.graph.contains(id) {
            self.graph.descendants(id)?
        } else {
            Vec::new()
        };

        let mut commands = self.revert_single(id, reason, announce)?;
        for descendant in descendants {
            let announce_descendant = self
                .transactions
                .get(&descendant)
                .map(|t| t.current_owner_node == self.node)
                .unwrap_or(false);
            commands.extend(self.revert_single(
                &descendant,
                RevertReason::AncestorReverted { ancestor: *id },
                announce_descendant,
            )?);
        }
        commands.extend(self.reevaluate_blocked()?);
        commands.extend(self.try_dispatch()?);
        Ok(commands)
    }

    /// Distributed endorsement check for this node; first arrival holds its
    /// inputs until reverted.
    pub fn approve_endorsement(&mut self, request: &EndorsementRequest) -> EndorsementVerdict {
        self.gate.approve_endorsement(request)
    }

    /// Block indexer notifications, including re-org retractions.
    pub fn on_block_indexed(
        &mut self,
        event: &IndexedBlockEvent,
    ) -> Result<Vec<Command>, SequencerError> {
        match event {
            IndexedBlockEvent::Block {
                block_number,
                receipts,
                ..
            } => self.on_block_receipts(*block_number, receipts),
            IndexedBlockEvent::Retracted { block_number, .. } => self.on_block_retracted(*block_number),
        }
    }

    /// An outbound send exhausted its retries. A failed delegation returns
    /// ownership here so routing can try again; everything else is logged
    /// and absorbed.
    pub fn on_transport_failure(
        &mut self,
        destination: &NodeName,
        message_type: &str,
        transaction: Option<TransactionId>,
    ) -> Result<Vec<Command>, SequencerError> {
        warn!(
            destination = %destination,
            message_type,
            "[veil-06] outbound send failed after retries"
        );
        let Some(id) = transaction else {
            return Ok(Vec::new());
        };
        if message_type != "DelegationRequest" {
            return Ok(Vec::new());
        }
        let Some(tx) = self.transactions.get_mut(&id) else {
            return Ok(Vec::new());
        };
        if tx.phase == TransactionPhase::Delegated
            && self
                .delegations
                .get(&id)
                .map(|d| &d.delegate_node == destination)
                .unwrap_or(false)
        {
            tx.transition_to(TransactionPhase::Assigned)?;
            tx.current_owner_node = self.node.clone();
            self.delegations.remove(&id);
            info!(tx = %id, "[veil-06] delegation failed, resuming local sequencing");
            return self.start_sequencing(id);
        }
        Ok(Vec::new())
    }

    /// Rebuild in-flight state after a restart from persisted transaction
    /// bodies. Claims re-apply idempotently against the journaled store;
    /// dispatched transactions with unknown outcomes are re-queried.
    pub fn rebuild(
        &mut self,
        bodies: Vec<PrivateTransaction>,
    ) -> Result<Vec<Command>, SequencerError> {
        let mut commands = Vec::new();
        for transaction in bodies {
            if transaction.phase.is_terminal() || self.transactions.contains_key(&transaction.id) {
                continue;
            }
            self.graph.insert(
                transaction.id,
                transaction.inputs.iter().copied(),
                transaction.outputs.iter().copied(),
            )?;
            match transaction.phase {
                TransactionPhase::Blocked => {
                    self.blocked.insert(transaction.id);
                }
                TransactionPhase::Dispatched => {
                    self.graph.mark_dispatched(&transaction.id)?;
                    commands.push(Command::ObserveDispatch {
                        transaction: transaction.id,
                    });
                }
                _ => {}
            }
            if transaction.current_owner_node == self.node {
                for input in &transaction.inputs {
                    match self.store.record_claim(*input, transaction.id) {
                        Ok(()) | Err(StateStoreError::ClaimConflict { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            self.transactions.insert(transaction.id, transaction);
        }
        let ids: Vec<TransactionId> = self.transactions.keys().copied().collect();
        for id in ids {
            self.refresh_endorsed_flag(&id)?;
        }
        info!(
            transactions = self.transactions.len(),
            "[veil-06] sequencer state rebuilt"
        );
        Ok(commands)
    }

    // ------------------------------------------------------------------
    // Delegation handling
    // ------------------------------------------------------------------

    fn on_delegation_request(
        &mut self,
        reply_to: &NodeName,
        correlation_id: Option<Uuid>,
        request: DelegationRequest,
    ) -> Result<Vec<Command>, SequencerError> {
        let id = request.transaction.id;

        // If this node already handed the transaction onward, forward the
        // request rather than accepting stale ownership.
        if let Some(record) = self.delegations.get(&id) {
            if record.delegate_node != self.node {
                let delegate = record.delegate_node.clone();
                info!(tx = %id, onward = %delegate, "[veil-06] forwarding delegation request");
                return Ok(vec![
                    Command::SendDelegationRequest {
                        delegate: delegate.clone(),
                        request: DelegationRequest {
                            delegation_id: request.delegation_id,
                            delegate_node: delegate.clone(),
                            transaction: request.transaction,
                        },
                    },
                    Command::SendDelegationAck {
                        destination: reply_to.clone(),
                        ack: DelegationAck {
                            delegation_id: request.delegation_id,
                            transaction_id: id,
                            accepted_by: delegate,
                        },
                        correlation_id,
                    },
                ]);
            }
        }

        // Accept ownership: adopt the full body (the request may be the
        // first time this node sees the transaction at all).
        let mut body = request.transaction;
        body.current_owner_node = self.node.clone();
        match self.transactions.get_mut(&id) {
            Some(existing) => {
                existing.current_owner_node = self.node.clone();
                if existing.inputs.is_empty() && existing.outputs.is_empty() {
                    existing.inputs = body.inputs.clone();
                    existing.outputs = body.outputs.clone();
                    existing.infos = body.infos.clone();
                    existing.required_endorsers = body.required_endorsers.clone();
                }
                if matches!(
                    existing.phase,
                    TransactionPhase::Observed | TransactionPhase::Delegated
                ) {
                    existing.transition_to(TransactionPhase::Assigned)?;
                }
            }
            None => {
                if body.phase == TransactionPhase::Assembled {
                    body.transition_to(TransactionPhase::Assigned)?;
                } else {
                    body.phase = TransactionPhase::Assigned;
                }
                self.graph
                    .insert(id, body.inputs.iter().copied(), body.outputs.iter().copied())?;
                self.transactions.insert(id, body);
            }
        }
        if !self.graph.contains(&id) {
            let transaction = &self.transactions[&id];
            let inputs: Vec<StateId> = transaction.inputs.iter().copied().collect();
            let outputs: Vec<StateId> = transaction.outputs.iter().copied().collect();
            self.graph.insert(id, inputs, outputs)?;
        }
        self.refresh_endorsed_flag(&id)?;

        info!(tx = %id, from = %reply_to, "[veil-06] delegation accepted");
        let mut commands = self.start_sequencing(id)?;

        // If routing immediately re-delegated, the ack names the onward
        // node; otherwise this node is the owner.
        let accepted_by = self
            .delegations
            .get(&id)
            .map(|d| d.delegate_node.clone())
            .filter(|delegate| delegate != &self.node)
            .unwrap_or_else(|| self.node.clone());
        commands.push(Command::SendDelegationAck {
            destination: reply_to.clone(),
            ack: DelegationAck {
                delegation_id: request.delegation_id,
                transaction_id: id,
                accepted_by,
            },
            correlation_id,
        });
        Ok(commands)
    }

    fn on_delegation_ack(&mut self, ack: &DelegationAck) -> Result<Vec<Command>, SequencerError> {
        if let Some(transaction) = self.transactions.get_mut(&ack.transaction_id) {
            if transaction.phase == TransactionPhase::Delegated
                && transaction.current_owner_node != ack.accepted_by
            {
                debug!(
                    tx = %ack.transaction_id,
                    owner = %ack.accepted_by,
                    "[veil-06] delegation settled on forwarded owner"
                );
                transaction.current_owner_node = ack.accepted_by.clone();
                if let Some(record) = self.delegations.get_mut(&ack.transaction_id) {
                    record.delegate_node = ack.accepted_by.clone();
                }
            }
        }
        Ok(Vec::new())
    }

    // ------------------------------------------------------------------
    // Endorsement handling
    // ------------------------------------------------------------------

    fn on_endorsement_request(
        &mut self,
        reply_to: &NodeName,
        correlation_id: Option<Uuid>,
        request: EndorsementRequestMsg,
    ) -> Result<Vec<Command>, SequencerError> {
        let verdict = self.gate.approve_endorsement(&EndorsementRequest {
            transaction_id: request.transaction_id,
            input_states: request.input_states.clone(),
        });
        match verdict {
            EndorsementVerdict::Approved => Ok(vec![Command::SignAndRespond {
                destination: reply_to.clone(),
                request,
                correlation_id,
            }]),
            EndorsementVerdict::Rejected {
                contested_state,
                current_holder,
            } => {
                info!(
                    tx = %request.transaction_id,
                    state = %contested_state,
                    holder = %current_holder,
                    "[veil-06] endorsement refused, inputs contested"
                );
                Ok(vec![Command::SendEndorsementResponse {
                    destination: reply_to.clone(),
                    response: EndorsementResponseMsg {
                        transaction_id: request.transaction_id,
                        party: request.party,
                        signature: None,
                        contested_state: Some(contested_state),
                        current_holder: Some(current_holder),
                    },
                    correlation_id,
                }])
            }
        }
    }

    fn on_endorsement_response(
        &mut self,
        response: &EndorsementResponseMsg,
    ) -> Result<Vec<Command>, SequencerError> {
        let id = response.transaction_id;
        if !self.transactions.contains_key(&id) {
            debug!(tx = %id, "[veil-06] endorsement response for unknown transaction ignored");
            return Ok(Vec::new());
        }

        if let Some(signature) = &response.signature {
            let event = TransactionEndorsed {
                transaction_id: id,
                party: response.party.clone(),
                signature: signature.clone(),
            };
            let mut commands = vec![Command::Broadcast {
                message: CoordinatorMessage::TransactionEndorsed(event.clone()),
            }];
            commands.extend(self.on_transaction_endorsed(&event)?);
            return Ok(commands);
        }

        // Refusal: somebody else holds an input. The resolver decides who
        // survives; both sides compute the same verdict.
        let (Some(state), Some(holder)) = (response.contested_state, response.current_holder)
        else {
            warn!(tx = %id, "[veil-06] refusal without contention details ignored");
            return Ok(Vec::new());
        };
        let winner = veil_03_contention::resolve(&state, id, holder);
        if winner == id {
            let key = (id, response.party.clone());
            let attempts = self.endorsement_retries.entry(key).or_insert(0);
            if *attempts < self.config.endorsement_retry_limit {
                *attempts += 1;
                debug!(tx = %id, party = %response.party, attempt = *attempts, "[veil-06] re-requesting endorsement");
                return Ok(self.endorsement_request_for(&id, &response.party));
            }
            info!(tx = %id, party = %response.party, "[veil-06] endorsement retry budget spent");
            return self.revert_transaction(
                &id,
                RevertReason::EndorserRefused {
                    party: response.party.clone(),
                },
                true,
            );
        }
        info!(tx = %id, winner = %winner, state = %state, "[veil-06] lost contention");
        self.revert_transaction(&id, RevertReason::LostContention { state }, true)
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Claim inputs and route a transaction this node owns.
    fn start_sequencing(&mut self, id: TransactionId) -> Result<Vec<Command>, SequencerError> {
        let mut commands = self.claim_inputs(&id)?;
        // Claiming can revert the transaction on lost contention.
        if self.transactions.contains_key(&id) {
            commands.extend(self.route(id)?);
            commands.extend(self.try_dispatch()?);
        }
        Ok(commands)
    }

    /// Apply the delegation policy to an owned transaction.
    fn route(&mut self, id: TransactionId) -> Result<Vec<Command>, SequencerError> {
        let remote_owners = self.remote_dependency_owners(&id)?;
        match remote_owners.len() {
            0 => self.to_ready(id),
            1 => {
                let target = remote_owners
                    .into_iter()
                    .next()
                    .ok_or(SequencerError::Fatal {
                        reason: "remote owner set changed size".into(),
                    })?;
                self.delegate(id, target)
            }
            _ => self.block(id),
        }
    }

    /// Owners of unsatisfied dependencies, excluding this node.
    fn remote_dependency_owners(
        &self,
        id: &TransactionId,
    ) -> Result<BTreeSet<NodeName>, SequencerError> {
        let dependencies = self.graph.unsatisfied_dependencies(id)?;
        Ok(dependencies
            .iter()
            .filter_map(|dep| self.owner_of(dep))
            .filter(|owner| owner != &self.node)
            .collect())
    }

    fn to_ready(&mut self, id: TransactionId) -> Result<Vec<Command>, SequencerError> {
        self.blocked.remove(&id);
        let transaction = self
            .transactions
            .get_mut(&id)
            .ok_or(SequencerError::UnknownTransaction { transaction: id })?;
        if transaction.phase != TransactionPhase::Ready {
            transaction.transition_to(TransactionPhase::Ready)?;
        }
        debug!(tx = %id, "[veil-06] transaction ready");

        // Solicit any endorsements still missing.
        let missing: Vec<PartyName> = transaction
            .required_endorsers
            .iter()
            .filter(|&party| !transaction.endorsements.iter().any(|e| &e.party == party))
            .cloned()
            .collect();
        let mut commands = Vec::new();
        for party in missing {
            commands.extend(self.endorsement_request_for(&id, &party));
        }
        self.refresh_endorsed_flag(&id)?;
        Ok(commands)
    }

    fn delegate(
        &mut self,
        id: TransactionId,
        target: NodeName,
    ) -> Result<Vec<Command>, SequencerError> {
        self.blocked.remove(&id);
        let timestamp = self.time.now_millis();
        let transaction = self
            .transactions
            .get_mut(&id)
            .ok_or(SequencerError::UnknownTransaction { transaction: id })?;
        if transaction.phase != TransactionPhase::Delegated {
            transaction.transition_to(TransactionPhase::Delegated)?;
        }
        transaction.current_owner_node = target.clone();
        let body = transaction.clone();

        let record = DelegationRecord {
            transaction_id: id,
            delegating_node: self.node.clone(),
            delegate_node: target.clone(),
            reason: "remote dependency".into(),
            timestamp,
        };
        self.delegations.insert(id, record);
        info!(tx = %id, delegate = %target, "[veil-06] delegating transaction");

        Ok(vec![
            Command::SendDelegationRequest {
                delegate: target.clone(),
                request: DelegationRequest {
                    delegation_id: Uuid::new_v4(),
                    delegate_node: target.clone(),
                    transaction: body,
                },
            },
            Command::Broadcast {
                message: CoordinatorMessage::TransactionDelegated(TransactionDelegated {
                    transaction_id: id,
                    delegating_node: self.node.clone(),
                    delegate_node: target,
                    timestamp,
                }),
            },
        ])
    }

    fn block(&mut self, id: TransactionId) -> Result<Vec<Command>, SequencerError> {
        let transaction = self
            .transactions
            .get_mut(&id)
            .ok_or(SequencerError::UnknownTransaction { transaction: id })?;
        if transaction.phase == TransactionPhase::Blocked {
            return Ok(Vec::new());
        }
        transaction.transition_to(TransactionPhase::Blocked)?;
        self.blocked.insert(id);
        info!(tx = %id, "[veil-06] transaction blocked on multiple remote dependencies");
        Ok(vec![Command::Broadcast {
            message: CoordinatorMessage::TransactionBlocked(TransactionBlocked {
                transaction_id: id,
            }),
        }])
    }

    /// Re-apply routing to blocked transactions, in ascending id order for
    /// deterministic unblocking.
    fn reevaluate_blocked(&mut self) -> Result<Vec<Command>, SequencerError> {
        let mut commands = Vec::new();
        for id in self.blocked.clone() {
            if !self.transactions.contains_key(&id) {
                self.blocked.remove(&id);
                continue;
            }
            let remote_owners = self.remote_dependency_owners(&id)?;
            if remote_owners.len() >= 2 {
                continue;
            }
            commands.extend(self.route(id)?);
        }
        Ok(commands)
    }

    // ------------------------------------------------------------------
    // Claims and contention
    // ------------------------------------------------------------------

    /// Claim every input for an owned transaction, resolving contention
    /// deterministically. Losing a contest reverts the loser.
    fn claim_inputs(&mut self, id: &TransactionId) -> Result<Vec<Command>, SequencerError> {
        let inputs: Vec<StateId> = match self.transactions.get(id) {
            Some(t) => t.inputs.iter().copied().collect(),
            None => return Ok(Vec::new()),
        };
        let mut commands = Vec::new();
        for state in inputs {
            match self.store.record_claim(state, *id) {
                Ok(()) => {}
                Err(StateStoreError::ClaimConflict { holder, .. }) => {
                    let winner = veil_03_contention::resolve(&state, *id, holder);
                    if winner == *id {
                        info!(tx = %id, loser = %holder, state = %state, "[veil-06] won claim contention");
                        let announce_loser = self
                            .transactions
                            .get(&holder)
                            .map(|t| t.current_owner_node == self.node)
                            .unwrap_or(false);
                        commands.extend(self.revert_transaction(
                            &holder,
                            RevertReason::LostContention { state },
                            announce_loser,
                        )?);
                        // The loser's claims are released; retry once.
                        self.store.record_claim(state, *id)?;
                    } else {
                        info!(tx = %id, winner = %holder, state = %state, "[veil-06] lost claim contention");
                        commands.extend(self.revert_transaction(
                            id,
                            RevertReason::LostContention { state },
                            true,
                        )?);
                        return Ok(commands);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(commands)
    }

    /// Revert one transaction without cascading.
    fn revert_single(
        &mut self,
        id: &TransactionId,
        reason: RevertReason,
        announce: bool,
    ) -> Result<Vec<Command>, SequencerError> {
        let Some(mut transaction) = self.transactions.remove(id) else {
            return Ok(Vec::new());
        };
        if transaction.phase.is_terminal() {
            self.transactions.insert(*id, transaction);
            return Ok(Vec::new());
        }
        transaction.transition_to(TransactionPhase::Reverted)?;

        for input in &transaction.inputs {
            match self.store.release_claim(*input, *id) {
                Ok(()) | Err(StateStoreError::ClaimConflict { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.gate.on_transaction_reverted(id);
        if self.graph.contains(id) {
            self.graph.remove(id)?;
        }
        self.blocked.remove(id);
        self.delegations.remove(id);
        self.endorsement_retries.retain(|(tx, _), _| tx != id);
        info!(tx = %id, reason = ?reason, "[veil-06] transaction reverted");

        if announce {
            Ok(vec![Command::Broadcast {
                message: CoordinatorMessage::TransactionReverted(TransactionReverted {
                    transaction_id: *id,
                    reason,
                }),
            }])
        } else {
            Ok(Vec::new())
        }
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Dispatch the maximal endorsement-complete batch, if any.
    fn try_dispatch(&mut self) -> Result<Vec<Command>, SequencerError> {
        let batch = self.graph.dispatch_batch();
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        for id in &batch {
            let transaction = self
                .transactions
                .get_mut(id)
                .ok_or(SequencerError::UnknownTransaction { transaction: *id })?;
            // Batch eligibility implies the dependencies are locally
            // satisfied, so members still short of `Ready` step through it.
            if transaction.phase != TransactionPhase::Ready {
                transaction.transition_to(TransactionPhase::Ready)?;
            }
            transaction.transition_to(TransactionPhase::Dispatched)?;
            self.graph.mark_dispatched(id)?;
            self.blocked.remove(id);
            for input in &transaction.inputs {
                self.store.record_spend(*input, *id)?;
            }
        }
        info!(batch_len = batch.len(), "[veil-06] dispatching batch");
        Ok(vec![Command::Dispatch { batch }])
    }

    fn on_block_receipts(
        &mut self,
        block_number: u64,
        receipts: &[LedgerReceipt],
    ) -> Result<Vec<Command>, SequencerError> {
        let mut commands = Vec::new();
        for receipt in receipts {
            let id = receipt.transaction_id;
            let Some(transaction) = self.transactions.get(&id) else {
                continue;
            };
            if transaction.phase != TransactionPhase::Dispatched {
                continue;
            }
            let owned = transaction.current_owner_node == self.node;
            if receipt.success {
                commands.extend(self.on_transaction_confirmed(id, block_number, owned)?);
            } else {
                commands.extend(self.revert_transaction(
                    &id,
                    RevertReason::LedgerRejected {
                        detail: format!("rejected in block {block_number}"),
                    },
                    owned,
                )?);
            }
        }
        Ok(commands)
    }

    /// A re-org un-confirmed a block: cascade-revert in-flight dependents
    /// of every output confirmed there.
    fn on_block_retracted(&mut self, block_number: u64) -> Result<Vec<Command>, SequencerError> {
        let Some(confirmed) = self.confirmed_by_block.remove(&block_number) else {
            return Ok(Vec::new());
        };
        warn!(block = block_number, transactions = confirmed.len(), "[veil-06] block retracted by re-org");
        let mut commands = Vec::new();
        for (id, outputs) in confirmed {
            // The transaction itself goes back to pending resolution on the
            // base ledger.
            commands.push(Command::ObserveDispatch { transaction: id });
            for output in outputs {
                for consumer in self.graph.consumers_of(&output) {
                    let announce = self
                        .transactions
                        .get(&consumer)
                        .map(|t| t.current_owner_node == self.node)
                        .unwrap_or(false);
                    commands.extend(self.revert_transaction(
                        &consumer,
                        RevertReason::Reorg,
                        announce,
                    )?);
                }
            }
        }
        Ok(commands)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Keep the graph's endorsement flag in sync with the record set; only
    /// transactions this node owns ever count as endorsed here.
    fn refresh_endorsed_flag(&mut self, id: &TransactionId) -> Result<(), SequencerError> {
        let Some(transaction) = self.transactions.get(id) else {
            return Ok(());
        };
        if !self.graph.contains(id) {
            return Ok(());
        }
        let endorsed = transaction.current_owner_node == self.node
            && !matches!(
                transaction.phase,
                TransactionPhase::Observed | TransactionPhase::Delegated
            )
            && transaction.endorsement_complete();
        self.graph.set_endorsed(id, endorsed)?;
        Ok(())
    }

    fn endorsement_request_for(&self, id: &TransactionId, party: &PartyName) -> Vec<Command> {
        let Some(transaction) = self.transactions.get(id) else {
            return Vec::new();
        };
        let destination = party.node().unwrap_or_else(|| self.node.clone());
        vec![Command::SendEndorsementRequest {
            destination,
            request: EndorsementRequestMsg {
                transaction_id: *id,
                party: party.clone(),
                input_states: transaction.inputs.clone(),
                output_states: transaction.outputs.clone(),
                info_states: transaction.infos.clone(),
                attestation: Vec::new(),
            },
        }]
    }

    fn prune_confirmed(&mut self, latest_block: u64) {
        let cutoff = latest_block.saturating_sub(self.config.max_reorg_depth);
        while let Some((&block, _)) = self.confirmed_by_block.first_key_value() {
            if block >= cutoff {
                break;
            }
            self.confirmed_by_block.remove(&block);
        }
    }
}
