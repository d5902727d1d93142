//! # Node Container
//!
//! Builds and owns everything that runs on one node: the shared state
//! store, the transport reader, one sequencer runtime per privacy
//! contract, the registry, and the transaction log used for restart
//! recovery.

use crate::adapters::{build_key_manager, InMemoryDomainStates, StaticPeerDirectory, TransactionLog};
use crate::config::NodeConfig;
use crate::registry::TransportDetailsRegistry;
use anyhow::Context;
use shared_types::{NodeName, PrivateTransaction, TransactionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use veil_01_state_store::StateRefStore;
use veil_05_transport::adapters::memory::NodeInbox;
use veil_05_transport::{TransportReader, TransportWriter, WireTransport};
use veil_06_sequencer::ports::{
    BaseLedgerSubmitter, BlockIndexer, PeerDirectory, SystemTimeSource,
};
use veil_06_sequencer::service::runtime::{register_with_reader, RuntimeDeps};
use veil_06_sequencer::{Sequencer, SequencerEvent, SequencerHandle, SequencerRuntime};

/// External collaborators a node runs against.
pub struct CollaboratorSet {
    pub wire: Arc<dyn WireTransport>,
    pub submitter: Arc<dyn BaseLedgerSubmitter>,
    pub indexer: Option<Arc<dyn BlockIndexer>>,
}

/// One running node.
pub struct NodeContainer {
    node: NodeName,
    store: Arc<StateRefStore>,
    reader: Arc<TransportReader>,
    registry: Arc<TransportDetailsRegistry>,
    txlog: Arc<TransactionLog>,
    domain_states: Arc<InMemoryDomainStates>,
    runtimes: HashMap<String, SequencerRuntime>,
}

impl NodeContainer {
    /// Build every component and spawn one sequencer runtime per contract,
    /// recovering in-flight transactions from the transaction log.
    pub async fn start(
        config: &NodeConfig,
        collaborators: CollaboratorSet,
    ) -> anyhow::Result<Self> {
        let node = NodeName::new(&config.node_name);
        info!(node = %node, contracts = config.contracts.len(), "[veil-node] starting node container");

        let store =
            Arc::new(StateRefStore::open(&config.state_store).context("opening state store")?);
        let reader = Arc::new(TransportReader::new(node.clone(), &config.transport));
        let registry = Arc::new(TransportDetailsRegistry::new());
        let keys = build_key_manager(&config.key_manager);
        let peers: Arc<dyn PeerDirectory> = Arc::new(StaticPeerDirectory::new(
            config.peers.iter().map(NodeName::new).collect(),
        ));
        let txlog = Arc::new(TransactionLog::new(
            config.data_dir.join("transactions.log"),
        ));
        let recovered = txlog.load().context("loading transaction log")?;

        let mut runtimes = HashMap::new();
        for contract in &config.contracts {
            let sequencer = Sequencer::new(
                node.clone(),
                contract.clone(),
                config.sequencer.clone(),
                Arc::clone(&store),
                Arc::new(SystemTimeSource),
            );
            let writer = Arc::new(TransportWriter::new(
                node.clone(),
                contract.clone(),
                Arc::clone(&collaborators.wire),
                config.transport.clone(),
            ));
            let runtime = SequencerRuntime::spawn(
                sequencer,
                RuntimeDeps {
                    writer,
                    submitter: Arc::clone(&collaborators.submitter),
                    keys: Arc::clone(&keys),
                    peers: Arc::clone(&peers),
                    indexer: collaborators.indexer.clone(),
                    signer: config.submitter_identifier.clone(),
                },
                &config.sequencer,
            );
            let handle = runtime.handle();
            register_with_reader(&reader, contract, &handle);
            if !recovered.is_empty() {
                handle
                    .post(SequencerEvent::Recover {
                        transactions: recovered.clone(),
                    })
                    .await;
            }
            runtimes.insert(contract.clone(), runtime);
        }

        let domain_states = Arc::new(InMemoryDomainStates::new(Arc::clone(&store)));
        Ok(Self {
            node,
            store,
            reader,
            registry,
            txlog,
            domain_states,
            runtimes,
        })
    }

    #[must_use]
    pub fn node(&self) -> &NodeName {
        &self.node
    }

    #[must_use]
    pub fn store(&self) -> Arc<StateRefStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn registry(&self) -> Arc<TransportDetailsRegistry> {
        Arc::clone(&self.registry)
    }

    /// Plugin-facing state access for domains assembling on this node.
    #[must_use]
    pub fn domain_states(&self) -> Arc<InMemoryDomainStates> {
        Arc::clone(&self.domain_states)
    }

    /// Handle for one contract's sequencer, if configured.
    #[must_use]
    pub fn handle(&self, contract: &str) -> Option<SequencerHandle> {
        self.runtimes.get(contract).map(|r| r.handle())
    }

    /// Client entry point: log the body for recovery, announce assembly,
    /// and take ownership.
    pub async fn submit_transaction(
        &self,
        contract: &str,
        transaction: PrivateTransaction,
    ) -> anyhow::Result<TransactionId> {
        let handle = self
            .handle(contract)
            .with_context(|| format!("no sequencer for contract {contract:?}"))?;
        let id = transaction.id;
        self.txlog
            .append(&transaction)
            .context("appending to transaction log")?;
        anyhow::ensure!(handle.submit(transaction).await, "sequencer stopped");
        anyhow::ensure!(handle.assign(id).await, "sequencer stopped");
        Ok(id)
    }

    /// Drain an inbox from the wire into the transport reader.
    pub fn spawn_inbox_pump(&self, inbox: NodeInbox) -> JoinHandle<()> {
        let reader = Arc::clone(&self.reader);
        tokio::spawn(async move {
            reader.pump(inbox).await;
        })
    }

    /// Graceful shutdown of every sequencer instance.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        for (contract, runtime) in self.runtimes {
            info!(contract, "[veil-node] shutting down sequencer");
            runtime.shutdown().await?;
        }
        Ok(())
    }
}
