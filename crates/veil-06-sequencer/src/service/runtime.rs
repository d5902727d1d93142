//! # Sequencer Runtime
//!
//! Wraps the synchronous state machine in its concurrency shell: one task
//! drains the bounded inbound event queue and mutates state; outbound work
//! goes to a bounded worker pool whose completions and failures re-enter
//! the queue as events. Enqueueing outbound work blocks when the pool's
//! queue is full; that is the back-pressure boundary.

use crate::config::SequencerConfig;
use crate::domain::command::Command;
use crate::domain::errors::SequencerError;
use crate::domain::events::{IndexedBlockEvent, LedgerReceipt, SequencerEvent};
use crate::ports::{
    BaseLedgerSubmitter, BlockIndexer, KeyManager, PeerDirectory, SubmissionStatus, SubmitterError,
};
use crate::service::sequencer::Sequencer;
use shared_types::{PrivateTransaction, TransactionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use veil_05_transport::reader::InboundMessage;
use veil_05_transport::{EndorsementResponseMsg, TransportWriter};

/// Signing algorithm requested from the key manager for endorsements.
const ENDORSEMENT_ALGORITHM: &str = "ecdsa:secp256k1";
/// Verifier representation requested alongside the key.
const ENDORSEMENT_VERIFIER_TYPE: &str = "eth_address";
/// Poll interval while a dispatched batch's outcome is unknown.
const OBSERVE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Everything the runtime needs besides the state machine itself.
pub struct RuntimeDeps {
    pub writer: Arc<TransportWriter>,
    pub submitter: Arc<dyn BaseLedgerSubmitter>,
    pub keys: Arc<dyn KeyManager>,
    pub peers: Arc<dyn PeerDirectory>,
    pub indexer: Option<Arc<dyn BlockIndexer>>,
    /// Key-manager identifier that signs base-ledger submissions.
    pub signer: String,
}

/// Cheap cloneable handle for feeding events to a running instance.
#[derive(Clone)]
pub struct SequencerHandle {
    events: mpsc::Sender<SequencerEvent>,
}

impl SequencerHandle {
    /// Queue a locally assembled transaction.
    pub async fn submit(&self, transaction: PrivateTransaction) -> bool {
        self.events
            .send(SequencerEvent::Submitted { transaction })
            .await
            .is_ok()
    }

    /// Queue an ownership assignment.
    pub async fn assign(&self, transaction_id: TransactionId) -> bool {
        self.events
            .send(SequencerEvent::Assign { transaction_id })
            .await
            .is_ok()
    }

    /// Queue an arbitrary event.
    pub async fn post(&self, event: SequencerEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// A sender suitable for registering with the transport reader; peer
    /// messages feed the same serialized queue as everything else.
    #[must_use]
    pub fn peer_queue(&self) -> mpsc::Sender<InboundMessage> {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(64);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                if events.send(SequencerEvent::Peer(inbound)).await.is_err() {
                    break;
                }
            }
        });
        tx
    }
}

/// A running sequencer instance.
pub struct SequencerRuntime {
    handle: SequencerHandle,
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<Result<(), SequencerError>>,
}

impl SequencerRuntime {
    /// Spawn the event loop and outbound pool for one instance.
    #[must_use]
    pub fn spawn(sequencer: Sequencer, deps: RuntimeDeps, config: &SequencerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Some(indexer) = &deps.indexer {
            let mut blocks = indexer.subscribe();
            let events = events_tx.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        block = blocks.recv() => {
                            let Ok(event) = block else { break };
                            if events
                                .send(SequencerEvent::BlockIndexed(event))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
            });
        }

        let shared = Arc::new(OutboundShared {
            writer: Arc::clone(&deps.writer),
            submitter: Arc::clone(&deps.submitter),
            keys: Arc::clone(&deps.keys),
            peers: Arc::clone(&deps.peers),
            signer: deps.signer.clone(),
            events: events_tx.clone(),
            outbound: outbound_tx.clone(),
            dispatched_hashes: Mutex::new(HashMap::new()),
        });
        let outbound_rx = Arc::new(Mutex::new(outbound_rx));
        for _ in 0..config.outbound_workers.max(1) {
            tokio::spawn(run_outbound_worker(
                Arc::clone(&shared),
                Arc::clone(&outbound_rx),
                shutdown_rx.clone(),
            ));
        }

        let worker = tokio::spawn(run_event_loop(
            sequencer,
            events_rx,
            outbound_tx,
            shutdown_rx,
        ));
        Self {
            handle: SequencerHandle { events: events_tx },
            shutdown: shutdown_tx,
            worker,
        }
    }

    #[must_use]
    pub fn handle(&self) -> SequencerHandle {
        self.handle.clone()
    }

    /// Graceful shutdown: signal every task, wait for the event loop to
    /// quiesce. Outbound work still queued is cancelled.
    pub async fn shutdown(self) -> Result<(), SequencerError> {
        let _ = self.shutdown.send(true);
        match self.worker.await {
            Ok(result) => result,
            Err(join_error) => Err(SequencerError::Fatal {
                reason: format!("event loop panicked: {join_error}"),
            }),
        }
    }
}

/// The serialized event loop: the only place sequencer state mutates.
async fn run_event_loop(
    mut sequencer: Sequencer,
    mut events: mpsc::Receiver<SequencerEvent>,
    outbound: mpsc::Sender<Command>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SequencerError> {
    info!(
        node = %sequencer.node(),
        component = sequencer.component(),
        "[veil-06] sequencer event loop started"
    );
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let result = dispatch_event(&mut sequencer, event);
        match result {
            Ok(commands) => {
                for command in commands {
                    // Blocks when the outbound queue is full: back-pressure.
                    if outbound.send(command).await.is_err() {
                        warn!("[veil-06] outbound pool gone, dropping remaining commands");
                        break;
                    }
                }
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "[veil-06] fatal error, stopping instance");
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "[veil-06] event handling failed, instance continues");
            }
        }
    }
    info!(node = %sequencer.node(), "[veil-06] sequencer event loop stopped");
    Ok(())
}

fn dispatch_event(
    sequencer: &mut Sequencer,
    event: SequencerEvent,
) -> Result<Vec<Command>, SequencerError> {
    match event {
        SequencerEvent::Peer(inbound) => sequencer.handle_peer(inbound),
        SequencerEvent::Submitted { transaction } => {
            sequencer.on_transaction_submitted(transaction)
        }
        SequencerEvent::Assign { transaction_id } => sequencer.assign_transaction(&transaction_id),
        SequencerEvent::Recover { transactions } => sequencer.rebuild(transactions),
        SequencerEvent::BlockIndexed(block_event) => sequencer.on_block_indexed(&block_event),
        SequencerEvent::DispatchCompleted { batch, tx_hash } => {
            debug!(
                batch_len = batch.len(),
                tx_hash = ?tx_hash,
                "[veil-06] dispatch accepted by base ledger"
            );
            Ok(Vec::new())
        }
        SequencerEvent::DispatchFailed { batch, reason } => {
            warn!(reason, "[veil-06] dispatch failed, reverting batch");
            let mut commands = Vec::new();
            for id in batch {
                commands.extend(sequencer.revert_transaction(
                    &id,
                    veil_05_transport::RevertReason::LedgerRejected {
                        detail: reason.clone(),
                    },
                    true,
                )?);
            }
            Ok(commands)
        }
        SequencerEvent::TransportFailure {
            destination,
            message_type,
            transaction,
        } => sequencer.on_transport_failure(&destination, &message_type, transaction),
    }
}

/// State shared by the outbound workers.
struct OutboundShared {
    writer: Arc<TransportWriter>,
    submitter: Arc<dyn BaseLedgerSubmitter>,
    keys: Arc<dyn KeyManager>,
    peers: Arc<dyn PeerDirectory>,
    signer: String,
    events: mpsc::Sender<SequencerEvent>,
    outbound: mpsc::Sender<Command>,
    /// Base-ledger hash of the batch each transaction dispatched in; feeds
    /// outcome queries after restarts and re-orgs.
    dispatched_hashes: Mutex<HashMap<TransactionId, [u8; 32]>>,
}

async fn run_outbound_worker(
    shared: Arc<OutboundShared>,
    rx: Arc<Mutex<mpsc::Receiver<Command>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            _ = shutdown.changed() => return,
            command = async { rx.lock().await.recv().await } => command,
        };
        let Some(command) = command else {
            return;
        };
        execute_command(&shared, command).await;
    }
}

async fn execute_command(shared: &OutboundShared, command: Command) {
    match command {
        Command::SendDelegationRequest { delegate, request } => {
            let transaction = request.transaction.id;
            if let Err(e) = shared.writer.send_delegation_request(&delegate, request).await {
                warn!(error = %e, "[veil-06] delegation request failed");
                let _ = shared
                    .events
                    .send(SequencerEvent::TransportFailure {
                        destination: delegate,
                        message_type: "DelegationRequest".into(),
                        transaction: Some(transaction),
                    })
                    .await;
            }
        }
        Command::SendDelegationAck {
            destination,
            ack,
            correlation_id,
        } => {
            if let Err(e) = shared
                .writer
                .send_delegation_ack(&destination, ack, correlation_id)
                .await
            {
                warn!(error = %e, "[veil-06] delegation ack failed");
            }
        }
        Command::SendEndorsementRequest {
            destination,
            request,
        } => {
            let transaction = request.transaction_id;
            if let Err(e) = shared
                .writer
                .send_endorsement_request(&destination, request)
                .await
            {
                warn!(error = %e, "[veil-06] endorsement request failed");
                let _ = shared
                    .events
                    .send(SequencerEvent::TransportFailure {
                        destination,
                        message_type: "EndorsementRequest".into(),
                        transaction: Some(transaction),
                    })
                    .await;
            }
        }
        Command::SignAndRespond {
            destination,
            request,
            correlation_id,
        } => {
            let response = match sign_endorsement(shared, &request).await {
                Ok(signature) => EndorsementResponseMsg {
                    transaction_id: request.transaction_id,
                    party: request.party.clone(),
                    signature: Some(signature),
                    contested_state: None,
                    current_holder: None,
                },
                Err(reason) => {
                    warn!(
                        tx = %request.transaction_id,
                        party = %request.party,
                        reason,
                        "[veil-06] endorsement signing failed, refusing"
                    );
                    EndorsementResponseMsg {
                        transaction_id: request.transaction_id,
                        party: request.party.clone(),
                        signature: None,
                        contested_state: None,
                        current_holder: None,
                    }
                }
            };
            if let Err(e) = shared
                .writer
                .send_endorsement_response(&destination, response, correlation_id)
                .await
            {
                warn!(error = %e, "[veil-06] endorsement response failed");
            }
        }
        Command::SendEndorsementResponse {
            destination,
            response,
            correlation_id,
        } => {
            if let Err(e) = shared
                .writer
                .send_endorsement_response(&destination, response, correlation_id)
                .await
            {
                warn!(error = %e, "[veil-06] endorsement response failed");
            }
        }
        Command::Broadcast { message } => {
            let peers = shared.peers.peers();
            let failures = shared.writer.broadcast(&peers, &message).await;
            for (peer, _) in failures {
                let _ = shared
                    .events
                    .send(SequencerEvent::TransportFailure {
                        destination: peer,
                        message_type: message.message_type().into(),
                        transaction: None,
                    })
                    .await;
            }
        }
        Command::Dispatch { batch } => {
            match shared.submitter.submit(&batch, &shared.signer).await {
                Ok(tx_hash) => {
                    let mut hashes = shared.dispatched_hashes.lock().await;
                    for id in &batch {
                        hashes.insert(*id, tx_hash);
                    }
                    drop(hashes);
                    let _ = shared
                        .events
                        .send(SequencerEvent::DispatchCompleted { batch, tx_hash })
                        .await;
                }
                Err(SubmitterError::Duplicate { .. }) => {
                    // The earlier submission stands; idempotency at the
                    // submitter absorbs our at-least-once dispatch.
                    debug!("[veil-06] duplicate dispatch absorbed by submitter");
                }
                Err(SubmitterError::Unavailable { reason }) => {
                    let _ = shared
                        .events
                        .send(SequencerEvent::DispatchFailed { batch, reason })
                        .await;
                }
            }
        }
        Command::ObserveDispatch { transaction } => {
            observe_dispatch(shared, transaction).await;
        }
    }
}

async fn sign_endorsement(
    shared: &OutboundShared,
    request: &veil_05_transport::EndorsementRequestMsg,
) -> Result<Vec<u8>, String> {
    let (key, _verifier) = shared
        .keys
        .resolve_key(
            request.party.as_str(),
            ENDORSEMENT_ALGORITHM,
            ENDORSEMENT_VERIFIER_TYPE,
        )
        .await
        .map_err(|e| e.to_string())?;
    // Sign over the attestation and the transaction id so a signature
    // cannot be replayed for another transaction.
    let mut payload = request.attestation.clone();
    payload.extend_from_slice(request.transaction_id.as_bytes());
    shared
        .keys
        .sign(&key, &payload)
        .await
        .map_err(|e| e.to_string())
}

async fn observe_dispatch(shared: &OutboundShared, transaction: TransactionId) {
    let hash = {
        let hashes = shared.dispatched_hashes.lock().await;
        hashes.get(&transaction).copied()
    };
    let Some(hash) = hash else {
        debug!(tx = %transaction, "[veil-06] no recorded dispatch hash to observe");
        return;
    };
    match shared.submitter.observe(&hash).await {
        Ok(SubmissionStatus::Confirmed { block_number }) => {
            let _ = shared
                .events
                .send(SequencerEvent::BlockIndexed(IndexedBlockEvent::Block {
                    block_number,
                    block_hash: [0; 32],
                    parent_hash: [0; 32],
                    receipts: vec![LedgerReceipt {
                        transaction_id: transaction,
                        success: true,
                    }],
                }))
                .await;
        }
        Ok(SubmissionStatus::Reverted { reason }) => {
            warn!(tx = %transaction, reason, "[veil-06] dispatched batch reverted on base ledger");
            let _ = shared
                .events
                .send(SequencerEvent::BlockIndexed(IndexedBlockEvent::Block {
                    block_number: 0,
                    block_hash: [0; 32],
                    parent_hash: [0; 32],
                    receipts: vec![LedgerReceipt {
                        transaction_id: transaction,
                        success: false,
                    }],
                }))
                .await;
        }
        Ok(SubmissionStatus::Pending) => {
            // Still pending: poll again shortly.
            tokio::time::sleep(OBSERVE_POLL_INTERVAL).await;
            let _ = shared
                .outbound
                .send(Command::ObserveDispatch { transaction })
                .await;
        }
        Err(e) => {
            warn!(tx = %transaction, error = %e, "[veil-06] base ledger observation failed");
        }
    }
}

/// Wire a runtime's peer queue into a transport reader under this
/// instance's component name.
pub fn register_with_reader(
    reader: &veil_05_transport::TransportReader,
    component: &str,
    handle: &SequencerHandle,
) {
    reader.register_component(component, handle.peer_queue());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::{KeyHandle, KeyManagerError, SystemTimeSource};
    use shared_types::{NodeName, StateId};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use veil_01_state_store::{StateRefStore, StateStoreConfig};
    use veil_05_transport::adapters::InMemoryNetwork;
    use veil_05_transport::TransportConfig;

    struct RecordingSubmitter {
        batches: SyncMutex<Vec<Vec<TransactionId>>>,
    }

    #[async_trait]
    impl BaseLedgerSubmitter for RecordingSubmitter {
        async fn submit(
            &self,
            batch: &[TransactionId],
            _signer: &str,
        ) -> Result<[u8; 32], SubmitterError> {
            self.batches.lock().push(batch.to_vec());
            Ok([7; 32])
        }

        async fn observe(&self, _tx_hash: &[u8; 32]) -> Result<SubmissionStatus, SubmitterError> {
            Ok(SubmissionStatus::Pending)
        }
    }

    struct NoKeys;

    #[async_trait]
    impl KeyManager for NoKeys {
        async fn resolve_key(
            &self,
            identifier: &str,
            _algorithm: &str,
            _verifier_type: &str,
        ) -> Result<(KeyHandle, String), KeyManagerError> {
            Ok((KeyHandle(identifier.to_owned()), "0x0".into()))
        }

        async fn sign(&self, _key: &KeyHandle, _payload: &[u8]) -> Result<Vec<u8>, KeyManagerError> {
            Ok(vec![0x55])
        }
    }

    struct NoPeers;

    impl PeerDirectory for NoPeers {
        fn peers(&self) -> Vec<NodeName> {
            Vec::new()
        }
    }

    fn deps(submitter: Arc<RecordingSubmitter>) -> RuntimeDeps {
        let network = Arc::new(InMemoryNetwork::default());
        RuntimeDeps {
            writer: Arc::new(TransportWriter::new(
                NodeName::new("node1"),
                "contract-1",
                network,
                TransportConfig::default(),
            )),
            submitter,
            keys: Arc::new(NoKeys),
            peers: Arc::new(NoPeers),
            indexer: None,
            signer: "submitter@node1".into(),
        }
    }

    #[tokio::test]
    async fn test_submit_assign_dispatch_through_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            StateRefStore::open(&StateStoreConfig {
                journal_path: dir.path().join("journal.bin"),
                ..Default::default()
            })
            .unwrap(),
        );
        let sequencer = Sequencer::new(
            NodeName::new("node1"),
            "contract-1",
            SequencerConfig::default(),
            store,
            Arc::new(SystemTimeSource),
        );
        let submitter = Arc::new(RecordingSubmitter {
            batches: SyncMutex::new(Vec::new()),
        });
        let runtime = SequencerRuntime::spawn(
            sequencer,
            deps(Arc::clone(&submitter)),
            &SequencerConfig::default(),
        );
        let handle = runtime.handle();

        // No required endorsers: ready and dispatchable on assignment.
        let tx = PrivateTransaction::assembled(TransactionId::random(), NodeName::new("node1"))
            .with_outputs([StateId::new([1; 32])]);
        let id = tx.id;
        assert!(handle.submit(tx).await);
        assert!(handle.assign(id).await);

        // Let the loop and the outbound pool turn over.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if !submitter.batches.lock().is_empty() {
                break;
            }
        }
        assert_eq!(submitter.batches.lock().clone(), vec![vec![id]]);

        runtime.shutdown().await.unwrap();
    }
}
