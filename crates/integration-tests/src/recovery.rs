//! Restart rebuild and re-org retraction flows.

use crate::cluster::{tx_on, Cluster, CONTRACT};
use node_runtime::adapters::InMemoryLedger;
use node_runtime::config::NodeConfig;
use node_runtime::container::{CollaboratorSet, NodeContainer};
use shared_types::NodeName;
use std::sync::Arc;
use std::time::Duration;
use veil_01_state_store::{StateRefStore, StateStoreConfig};
use veil_05_transport::adapters::InMemoryNetwork;
use veil_06_sequencer::ports::{BaseLedgerSubmitter, BlockIndexer};

fn node_config(dir: &std::path::Path) -> NodeConfig {
    let mut config = NodeConfig {
        node_name: "node1".into(),
        data_dir: dir.to_path_buf(),
        contracts: vec![CONTRACT.to_owned()],
        submitter_identifier: "submitter@node1".into(),
        ..Default::default()
    };
    config.state_store.journal_path = dir.join("journal.bin");
    config
}

async fn start_node(
    config: &NodeConfig,
    network: &Arc<InMemoryNetwork>,
    ledger: &Arc<InMemoryLedger>,
) -> NodeContainer {
    let inbox = network.register(NodeName::new("node1"));
    let container = NodeContainer::start(
        config,
        CollaboratorSet {
            wire: Arc::clone(network) as Arc<dyn veil_05_transport::WireTransport>,
            submitter: Arc::clone(ledger) as Arc<dyn BaseLedgerSubmitter>,
            indexer: Some(Arc::clone(ledger) as Arc<dyn BlockIndexer>),
        },
    )
    .await
    .expect("container start");
    container.spawn_inbox_pump(inbox);
    container
}

#[tokio::test]
async fn test_restart_rebuilds_and_completes_in_flight_work() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path());
    let network = Arc::new(InMemoryNetwork::default());
    let ledger = Arc::new(InMemoryLedger::new());

    // Submit, then stop the node before anything is mined.
    let first = start_node(&config, &network, &ledger).await;
    let id = first
        .submit_transaction(CONTRACT, tx_on("node1", &[], &[1]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    first.shutdown().await.unwrap();

    // A fresh container on the same data directory picks the body up from
    // the transaction log; assignment resumes the lifecycle.
    let second = start_node(&config, &network, &ledger).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let handle = second.handle(CONTRACT).unwrap();
    assert!(handle.assign(id).await);

    let mut mined = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger.mine_block();
        if ledger.mined_transactions().contains(&id) {
            mined = true;
            break;
        }
    }
    assert!(mined, "recovered transaction never dispatched");
    second.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_journal_replay_reproduces_identical_tables() {
    let dir = tempfile::tempdir().unwrap();
    let config = node_config(dir.path());
    let network = Arc::new(InMemoryNetwork::default());
    let ledger = Arc::new(InMemoryLedger::new());

    let node = start_node(&config, &network, &ledger).await;
    node.submit_transaction(CONTRACT, tx_on("node1", &[], &[1]))
        .await
        .unwrap();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        ledger.mine_block();
    }
    let tables_live = node.store().tables();
    node.shutdown().await.unwrap();

    // Rebuilding a store from the journal alone reproduces the tables
    // byte for byte.
    let replayed = StateRefStore::open(&StateStoreConfig {
        journal_path: dir.path().join("journal.bin"),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(replayed.tables(), tables_live);

    assert!(!tables_live.state_confirms.is_empty(), "nothing confirmed");
}

#[tokio::test]
async fn test_reorg_retraction_and_remine() {
    let cluster = Cluster::start(&["node1"]).await;

    let id = cluster.submit("node1", tx_on("node1", &[], &[1])).await;
    cluster.settle(20).await;
    let history = cluster.ledger.mined_history();
    assert_eq!(history.len(), 1);
    let block = history[0].0;

    // Retract the block; the batch returns to pending and is re-mined in
    // a later block.
    cluster.ledger.retract_block(block);
    cluster.settle(20).await;

    let history = cluster.ledger.mined_history();
    assert_eq!(history.len(), 2, "batch was not re-mined after retraction");
    assert!(history[1].0 > block);
    assert_eq!(history[1].2, vec![id]);

    cluster.shutdown().await;
}
