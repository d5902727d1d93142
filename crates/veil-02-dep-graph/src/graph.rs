//! Arena-backed transaction graph.

use crate::errors::GraphError;
use shared_types::{StateId, TransactionId};
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::warn;

/// A transaction node in the arena.
#[derive(Debug, Clone)]
pub struct TxNode {
    pub id: TransactionId,
    pub inputs: BTreeSet<StateId>,
    pub outputs: BTreeSet<StateId>,
    /// Arena indices of producers this node consumes from.
    preds: BTreeSet<usize>,
    /// Arena indices of consumers of this node's outputs.
    succs: BTreeSet<usize>,
    /// Whether the required endorsement set is complete.
    endorsed: bool,
    /// Whether the transaction has been dispatched; a dispatched predecessor
    /// no longer blocks its successors.
    dispatched: bool,
}

impl TxNode {
    fn new(
        id: TransactionId,
        inputs: BTreeSet<StateId>,
        outputs: BTreeSet<StateId>,
    ) -> Self {
        Self {
            id,
            inputs,
            outputs,
            preds: BTreeSet::new(),
            succs: BTreeSet::new(),
            endorsed: false,
            dispatched: false,
        }
    }
}

/// The per-sequencer dependency graph.
#[derive(Debug, Default)]
pub struct TxGraph {
    arena: Vec<Option<TxNode>>,
    free: Vec<usize>,
    by_id: HashMap<TransactionId, usize>,
    /// state -> arena index of its (single) producer.
    producer_index: HashMap<StateId, usize>,
    /// state -> arena indices of transactions consuming it. More than one
    /// entry means unresolved contention; the resolver sorts that out above
    /// this layer.
    consumer_index: HashMap<StateId, BTreeSet<usize>>,
}

impl TxGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &TransactionId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Insert a transaction, linking producer/consumer edges discovered in
    /// either direction through the state indices.
    ///
    /// Rejects inserts that would create a cycle, leaving the graph
    /// untouched.
    pub fn insert(
        &mut self,
        id: TransactionId,
        inputs: impl IntoIterator<Item = StateId>,
        outputs: impl IntoIterator<Item = StateId>,
    ) -> Result<(), GraphError> {
        if self.by_id.contains_key(&id) {
            return Err(GraphError::DuplicateTransaction { transaction: id });
        }
        let inputs: BTreeSet<StateId> = inputs.into_iter().collect();
        let outputs: BTreeSet<StateId> = outputs.into_iter().collect();

        // Incoming edges: producers of my inputs.
        let preds: BTreeSet<usize> = inputs
            .iter()
            .filter_map(|s| self.producer_index.get(s).copied())
            .collect();
        // Outgoing edges: existing consumers awaiting my outputs.
        let succs: BTreeSet<usize> = outputs
            .iter()
            .filter_map(|s| self.consumer_index.get(s))
            .flatten()
            .copied()
            .collect();

        // A cycle can only close through the new node: some successor must
        // already reach some predecessor.
        for &succ in &succs {
            for &pred in &preds {
                if succ == pred || self.reaches(succ, pred) {
                    return Err(GraphError::DependencyCycle { transaction: id });
                }
            }
        }

        let index = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.arena.push(None);
                self.arena.len() - 1
            }
        };

        let mut node = TxNode::new(id, inputs, outputs);
        node.preds = preds.clone();
        node.succs = succs.clone();

        for &pred in &preds {
            if let Some(p) = self.arena[pred].as_mut() {
                p.succs.insert(index);
            }
        }
        for &succ in &succs {
            if let Some(s) = self.arena[succ].as_mut() {
                s.preds.insert(index);
            }
        }

        for state in &node.inputs {
            self.consumer_index.entry(*state).or_default().insert(index);
        }
        for state in &node.outputs {
            match self.producer_index.get(state) {
                None => {
                    self.producer_index.insert(*state, index);
                }
                Some(existing) => {
                    // Content addressing makes a second producer of the same
                    // state a protocol violation upstream; keep the first.
                    warn!(
                        state = %state,
                        first = %self.arena[*existing].as_ref().map(|n| n.id).unwrap_or_default(),
                        second = %id,
                        "[veil-02] duplicate producer for state, keeping first"
                    );
                }
            }
        }

        self.arena[index] = Some(node);
        self.by_id.insert(id, index);
        Ok(())
    }

    /// Detach and drop a transaction; used on `confirmed` and `reverted`.
    pub fn remove(&mut self, id: &TransactionId) -> Result<(), GraphError> {
        let index = *self
            .by_id
            .get(id)
            .ok_or(GraphError::UnknownTransaction { transaction: *id })?;
        let node = self.arena[index]
            .take()
            .ok_or(GraphError::UnknownTransaction { transaction: *id })?;

        for pred in &node.preds {
            if let Some(p) = self.arena[*pred].as_mut() {
                p.succs.remove(&index);
            }
        }
        for succ in &node.succs {
            if let Some(s) = self.arena[*succ].as_mut() {
                s.preds.remove(&index);
            }
        }
        for state in &node.inputs {
            if let Some(consumers) = self.consumer_index.get_mut(state) {
                consumers.remove(&index);
                if consumers.is_empty() {
                    self.consumer_index.remove(state);
                }
            }
        }
        for state in &node.outputs {
            if self.producer_index.get(state) == Some(&index) {
                self.producer_index.remove(state);
            }
        }

        self.by_id.remove(id);
        self.free.push(index);
        Ok(())
    }

    /// Mark the transaction's endorsement set complete (or not).
    pub fn set_endorsed(&mut self, id: &TransactionId, endorsed: bool) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        node.endorsed = endorsed;
        Ok(())
    }

    /// Mark the transaction dispatched; it stops blocking its successors.
    pub fn mark_dispatched(&mut self, id: &TransactionId) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        node.dispatched = true;
        Ok(())
    }

    #[must_use]
    pub fn is_dispatched(&self, id: &TransactionId) -> bool {
        self.node(id).map(|n| n.dispatched).unwrap_or(false)
    }

    /// Producer of `state`, if it is in-flight in this graph.
    #[must_use]
    pub fn producer_of(&self, state: &StateId) -> Option<TransactionId> {
        self.producer_index
            .get(state)
            .and_then(|&i| self.arena[i].as_ref())
            .map(|n| n.id)
    }

    /// In-flight consumers of `state`, in ascending id order.
    #[must_use]
    pub fn consumers_of(&self, state: &StateId) -> Vec<TransactionId> {
        let mut consumers: Vec<TransactionId> = self
            .consumer_index
            .get(state)
            .into_iter()
            .flatten()
            .filter_map(|&i| self.arena[i].as_ref())
            .map(|n| n.id)
            .collect();
        consumers.sort();
        consumers
    }

    /// Direct dependencies of `id` that are still undispatched.
    pub fn unsatisfied_dependencies(
        &self,
        id: &TransactionId,
    ) -> Result<Vec<TransactionId>, GraphError> {
        let node = self
            .node(id)
            .ok_or(GraphError::UnknownTransaction { transaction: *id })?;
        Ok(node
            .preds
            .iter()
            .filter_map(|&i| self.arena[i].as_ref())
            .filter(|p| !p.dispatched)
            .map(|p| p.id)
            .collect())
    }

    /// Transactions with no unsatisfied predecessor and a complete
    /// endorsement set, in ascending id order.
    #[must_use]
    pub fn ready_roots(&self) -> Vec<TransactionId> {
        let mut roots: Vec<TransactionId> = self
            .nodes()
            .filter(|n| n.endorsed && !n.dispatched && self.preds_satisfied(n))
            .map(|n| n.id)
            .collect();
        roots.sort();
        roots
    }

    /// The maximal dispatchable batch: a topological ordering over ready
    /// roots and every endorsed descendant whose predecessors all land
    /// earlier in the same batch (or were already dispatched). Ties break by
    /// ascending id.
    #[must_use]
    pub fn dispatch_batch(&self) -> Vec<TransactionId> {
        let mut batch = Vec::new();
        let mut in_batch: BTreeSet<usize> = BTreeSet::new();
        // Min-ordered frontier keyed by (id, index) for deterministic ties.
        let mut frontier: BTreeSet<(TransactionId, usize)> = self
            .indexed_nodes()
            .filter(|(_, n)| n.endorsed && !n.dispatched && self.preds_satisfied(n))
            .map(|(i, n)| (n.id, i))
            .collect();

        while let Some(&(id, index)) = frontier.iter().next() {
            frontier.remove(&(id, index));
            in_batch.insert(index);
            batch.push(id);

            let Some(node) = self.arena[index].as_ref() else {
                continue;
            };
            for &succ in &node.succs {
                let Some(s) = self.arena[succ].as_ref() else {
                    continue;
                };
                if !s.endorsed || s.dispatched || in_batch.contains(&succ) {
                    continue;
                }
                let eligible = s.preds.iter().all(|&p| {
                    in_batch.contains(&p)
                        || self.arena[p]
                            .as_ref()
                            .map(|n| n.dispatched)
                            .unwrap_or(true)
                });
                if eligible {
                    frontier.insert((s.id, succ));
                }
            }
        }
        batch
    }

    /// Every transitive consumer of `id`'s outputs; used for revert
    /// cascades. Breadth-first, deduplicated.
    pub fn descendants(&self, id: &TransactionId) -> Result<Vec<TransactionId>, GraphError> {
        let start = *self
            .by_id
            .get(id)
            .ok_or(GraphError::UnknownTransaction { transaction: *id })?;
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(start);

        let mut result = Vec::new();
        while let Some(index) = queue.pop_front() {
            let Some(node) = self.arena[index].as_ref() else {
                continue;
            };
            for &succ in &node.succs {
                if seen.insert(succ) {
                    if let Some(s) = self.arena[succ].as_ref() {
                        result.push(s.id);
                        queue.push_back(succ);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Whether `a` is an ancestor of `b` (a path of producer edges leads
    /// from `a` to `b`).
    #[must_use]
    pub fn is_ancestor(&self, a: &TransactionId, b: &TransactionId) -> bool {
        match (self.by_id.get(a), self.by_id.get(b)) {
            (Some(&from), Some(&to)) => self.reaches(from, to),
            _ => false,
        }
    }

    fn reaches(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(from);
        while let Some(index) = queue.pop_front() {
            let Some(node) = self.arena[index].as_ref() else {
                continue;
            };
            for &succ in &node.succs {
                if succ == to {
                    return true;
                }
                if seen.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
        false
    }

    fn preds_satisfied(&self, node: &TxNode) -> bool {
        node.preds.iter().all(|&p| {
            self.arena[p]
                .as_ref()
                .map(|n| n.dispatched)
                .unwrap_or(true)
        })
    }

    fn node(&self, id: &TransactionId) -> Option<&TxNode> {
        self.by_id.get(id).and_then(|&i| self.arena[i].as_ref())
    }

    fn node_mut(&mut self, id: &TransactionId) -> Result<&mut TxNode, GraphError> {
        let index = *self
            .by_id
            .get(id)
            .ok_or(GraphError::UnknownTransaction { transaction: *id })?;
        self.arena[index]
            .as_mut()
            .ok_or(GraphError::UnknownTransaction { transaction: *id })
    }

    fn nodes(&self) -> impl Iterator<Item = &TxNode> {
        self.arena.iter().filter_map(|slot| slot.as_ref())
    }

    fn indexed_nodes(&self) -> impl Iterator<Item = (usize, &TxNode)> {
        self.arena
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|n| (i, n)))
    }
}
