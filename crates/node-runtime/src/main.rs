//! # Veil Node
//!
//! Binary entry point. Runs a single node against the in-memory
//! collaborators: the in-process wire and the on-demand-mining base
//! ledger. Real deployments swap collaborators behind the same ports.

use anyhow::Result;
use node_runtime::adapters::InMemoryLedger;
use node_runtime::config::NodeConfig;
use node_runtime::container::{CollaboratorSet, NodeContainer};
use shared_types::NodeName;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veil_05_transport::adapters::InMemoryNetwork;
use veil_06_sequencer::ports::{BaseLedgerSubmitter, BlockIndexer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => NodeConfig::load(&PathBuf::from(path))?,
        None => NodeConfig::default(),
    };
    info!(node = config.node_name, "[veil-node] starting veil node");

    let network = Arc::new(InMemoryNetwork::default());
    let inbox = network.register(NodeName::new(&config.node_name));
    let ledger = Arc::new(InMemoryLedger::new());

    let container = NodeContainer::start(
        &config,
        CollaboratorSet {
            wire: network,
            submitter: Arc::clone(&ledger) as Arc<dyn BaseLedgerSubmitter>,
            indexer: Some(Arc::clone(&ledger) as Arc<dyn BlockIndexer>),
        },
    )
    .await?;
    let pump = container.spawn_inbox_pump(inbox);

    // Mine pending dispatches on a steady cadence.
    let miner = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(2)).await;
                ledger.mine_block();
            }
        })
    };

    info!("[veil-node] node is running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("[veil-node] shutting down");
    miner.abort();
    pump.abort();
    container.shutdown().await?;
    info!("[veil-node] shutdown complete");
    Ok(())
}
