//! Multi-node test harness.
//!
//! Every node gets its own data directory, journal, and sequencer runtime;
//! all nodes share one in-memory wire and one in-memory base ledger. The
//! single contract instance is named `contract-1` throughout.

use node_runtime::adapters::InMemoryLedger;
use node_runtime::config::NodeConfig;
use node_runtime::container::{CollaboratorSet, NodeContainer};
use shared_types::{NodeName, PartyName, PrivateTransaction, StateId, TransactionId};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use veil_05_transport::adapters::InMemoryNetwork;
use veil_06_sequencer::ports::{BaseLedgerSubmitter, BlockIndexer};

/// The contract every cluster test runs against.
pub const CONTRACT: &str = "contract-1";

struct ClusterNode {
    container: NodeContainer,
    _pump: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

/// A set of nodes sharing one wire and one base ledger.
pub struct Cluster {
    pub ledger: Arc<InMemoryLedger>,
    pub network: Arc<InMemoryNetwork>,
    nodes: BTreeMap<String, ClusterNode>,
}

impl Cluster {
    /// Start one container per name; every node peers with all the others.
    pub async fn start(names: &[&str]) -> Self {
        let network = Arc::new(InMemoryNetwork::default());
        let ledger = Arc::new(InMemoryLedger::new());

        let mut nodes = BTreeMap::new();
        for name in names {
            let dir = tempfile::tempdir().expect("tempdir");
            let mut config = NodeConfig {
                node_name: (*name).to_owned(),
                data_dir: dir.path().to_path_buf(),
                contracts: vec![CONTRACT.to_owned()],
                peers: names
                    .iter()
                    .filter(|peer| *peer != name)
                    .map(|peer| (*peer).to_owned())
                    .collect(),
                submitter_identifier: format!("submitter@{name}"),
                ..Default::default()
            };
            config.state_store.journal_path = dir.path().join("journal.bin");

            let inbox = network.register(NodeName::new(*name));
            let container = NodeContainer::start(
                &config,
                CollaboratorSet {
                    wire: Arc::clone(&network) as Arc<dyn veil_05_transport::WireTransport>,
                    submitter: Arc::clone(&ledger) as Arc<dyn BaseLedgerSubmitter>,
                    indexer: Some(Arc::clone(&ledger) as Arc<dyn BlockIndexer>),
                },
            )
            .await
            .expect("container start");
            let pump = container.spawn_inbox_pump(inbox);
            nodes.insert(
                (*name).to_owned(),
                ClusterNode {
                    container,
                    _pump: pump,
                    _dir: dir,
                },
            );
        }

        Self {
            ledger,
            network,
            nodes,
        }
    }

    #[must_use]
    pub fn node(&self, name: &str) -> &NodeContainer {
        &self.nodes[name].container
    }

    /// Submit and assign a transaction on one node.
    pub async fn submit(&self, node: &str, transaction: PrivateTransaction) -> TransactionId {
        self.node(node)
            .submit_transaction(CONTRACT, transaction)
            .await
            .expect("submission")
    }

    /// Let the cluster make progress: alternate short waits with mining
    /// rounds so dispatches land and confirmations propagate.
    pub async fn settle(&self, rounds: usize) {
        for _ in 0..rounds {
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.ledger.mine_block();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    /// Let messages propagate without mining, so in-flight dependencies
    /// stay unconfirmed.
    pub async fn propagate(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    /// Shut every node down.
    pub async fn shutdown(self) {
        for (_, node) in self.nodes {
            node.container.shutdown().await.expect("shutdown");
        }
    }
}

/// A transaction assembled on `node`, endorsed by that node's endorser.
#[must_use]
pub fn tx_on(node: &str, inputs: &[u8], outputs: &[u8]) -> PrivateTransaction {
    PrivateTransaction::assembled(TransactionId::random(), NodeName::new(node))
        .with_inputs(inputs.iter().map(|&n| StateId::new([n; 32])))
        .with_outputs(outputs.iter().map(|&n| StateId::new([n; 32])))
        .with_required_endorsers([PartyName::new(format!("endorser@{node}"))])
}

/// Position of a transaction in global mining order.
#[must_use]
pub fn mined_position(ledger: &InMemoryLedger, id: TransactionId) -> Option<usize> {
    ledger.mined_transactions().iter().position(|tx| *tx == id)
}
