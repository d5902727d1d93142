//! Domain-plugin state access.
//!
//! Backs the plugin-facing state query port with the shared state
//! reference store plus an in-memory data table. Availability means: known
//! schema, not spent, not claimed by a live transaction.

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use shared_types::StateId;
use std::collections::HashMap;
use std::sync::Arc;
use veil_01_state_store::StateRefStore;
use veil_06_sequencer::ports::outbound::{DomainState, DomainStateError, StateQuery};
use veil_06_sequencer::ports::DomainStateStore;

/// In-memory domain state table over the shared reference store.
pub struct InMemoryDomainStates {
    refs: Arc<StateRefStore>,
    by_schema: RwLock<HashMap<String, Vec<DomainState>>>,
}

impl InMemoryDomainStates {
    #[must_use]
    pub fn new(refs: Arc<StateRefStore>) -> Self {
        Self {
            refs,
            by_schema: RwLock::new(HashMap::new()),
        }
    }

    fn is_available(&self, state: &DomainState) -> bool {
        match self.refs.lookup(&state.id) {
            Ok(record) => record.spent_by.is_none() && record.claimed_by.is_none(),
            // Unknown to the reference store: nothing holds it.
            Err(_) => true,
        }
    }
}

#[async_trait]
impl DomainStateStore for InMemoryDomainStates {
    async fn find_available_states(
        &self,
        schema_id: &str,
        query: &StateQuery,
        _use_nullifiers: bool,
    ) -> Result<Vec<DomainState>, DomainStateError> {
        let by_schema = self.by_schema.read();
        let Some(states) = by_schema.get(schema_id) else {
            return Err(DomainStateError::UnknownSchema {
                schema_id: schema_id.to_owned(),
            });
        };
        let mut available: Vec<DomainState> = states
            .iter()
            .filter(|s| self.is_available(s))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            available.truncate(limit);
        }
        Ok(available)
    }

    async fn upsert_states(&self, states: Vec<DomainState>) -> Result<(), DomainStateError> {
        let mut by_schema = self.by_schema.write();
        for state in states {
            let bucket = by_schema.entry(state.schema_id.clone()).or_default();
            bucket.retain(|existing| existing.id != state.id);
            bucket.push(state);
        }
        Ok(())
    }

    async fn validate_state_hashes(
        &self,
        states: &[DomainState],
    ) -> Result<Vec<StateId>, DomainStateError> {
        let mut canonical = Vec::with_capacity(states.len());
        for state in states {
            let digest: [u8; 32] = Sha256::digest(&state.data).into();
            let id = StateId::new(digest);
            if id != state.id {
                return Err(DomainStateError::HashMismatch);
            }
            canonical.push(id);
        }
        Ok(canonical)
    }
}
