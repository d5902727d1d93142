//! End-to-end coordination scenarios.

use crate::cluster::{mined_position, tx_on, Cluster};
use shared_types::{PartyName, StateId};

#[tokio::test]
async fn test_solo_transaction_dispatches_and_confirms() {
    let cluster = Cluster::start(&["node1"]).await;

    let id = cluster.submit("node1", tx_on("node1", &[], &[1])).await;
    cluster.settle(20).await;

    assert_eq!(cluster.ledger.mined_transactions(), vec![id]);
    // The confirmation landed in the journal-backed tables.
    let tables = cluster.node("node1").store().tables();
    assert!(tables.state_confirms.contains_key(&StateId::new([1; 32])));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_local_chain_dispatches_in_dependency_order() {
    let cluster = Cluster::start(&["node1"]).await;

    let first = cluster.submit("node1", tx_on("node1", &[], &[1])).await;
    let second = cluster.submit("node1", tx_on("node1", &[1], &[2])).await;
    cluster.settle(20).await;

    let first_at = mined_position(&cluster.ledger, first).expect("first mined");
    let second_at = mined_position(&cluster.ledger, second).expect("second mined");
    assert!(first_at < second_at, "dependency order violated in dispatch");

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_single_remote_dependency_is_delegated() {
    let cluster = Cluster::start(&["node1", "node2"]).await;

    // The minter lives on node2; give its assembly event time to reach
    // node1 before the spender arrives there.
    let minter = cluster.submit("node2", tx_on("node2", &[], &[1])).await;
    cluster.propagate().await;
    let spender = cluster.submit("node1", tx_on("node1", &[1], &[])).await;
    cluster.settle(30).await;

    let minter_at = mined_position(&cluster.ledger, minter).expect("minter mined");
    let spender_at = mined_position(&cluster.ledger, spender).expect("spender mined");
    assert!(minter_at < spender_at);

    // Every batch was submitted by node2: node1 delegated instead of
    // dispatching.
    for (_, signer, _) in cluster.ledger.mined_history() {
        assert_eq!(signer, "submitter@node2");
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_transitive_delegation_settles_on_root_owner() {
    let cluster = Cluster::start(&["local", "r1", "r2"]).await;

    // r1 mints Sa; r2 spends Sa into Sb, which delegates r2's transaction
    // to r1; local spends Sb and must end up on r1 as well, directly or
    // via a forwarding hop through r2.
    let t1 = cluster.submit("r1", tx_on("r1", &[], &[0xA])).await;
    cluster.propagate().await;
    let t2 = cluster.submit("r2", tx_on("r2", &[0xA], &[0xB])).await;
    cluster.propagate().await;
    let t3 = cluster.submit("local", tx_on("local", &[0xB], &[])).await;
    cluster.settle(40).await;

    for id in [t1, t2, t3] {
        assert!(
            mined_position(&cluster.ledger, id).is_some(),
            "transaction {id} never dispatched"
        );
    }
    assert!(mined_position(&cluster.ledger, t1) < mined_position(&cluster.ledger, t2));
    assert!(mined_position(&cluster.ledger, t2) < mined_position(&cluster.ledger, t3));

    // Sequencing converged on r1, the root owner.
    for (_, signer, _) in cluster.ledger.mined_history() {
        assert_eq!(signer, "submitter@r1");
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_diamond_dependency_respects_both_parents() {
    let cluster = Cluster::start(&["local", "r1", "r2"]).await;

    // Two independent minters on different remote nodes, then one local
    // spender of both outputs. The spender blocks until at most one
    // remote dependency remains, and must dispatch after both parents.
    let left = cluster.submit("r1", tx_on("r1", &[], &[1])).await;
    let right = cluster.submit("r2", tx_on("r2", &[], &[2])).await;
    cluster.propagate().await;
    let join = cluster.submit("local", tx_on("local", &[1, 2], &[3])).await;
    cluster.settle(40).await;

    let left_at = mined_position(&cluster.ledger, left).expect("left parent mined");
    let right_at = mined_position(&cluster.ledger, right).expect("right parent mined");
    let join_at = mined_position(&cluster.ledger, join).expect("join mined");
    assert!(left_at < join_at);
    assert!(right_at < join_at);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_contention_for_one_state_mines_exactly_one() {
    let cluster = Cluster::start(&["node1", "node2"]).await;

    // Both transactions consume state 5 and share one endorser, so the
    // endorsement gate on node1 sees both requests and refuses the second.
    let endorser = PartyName::new("endorser@node1");
    let a = cluster
        .submit(
            "node1",
            tx_on("node1", &[5], &[6]).with_required_endorsers([endorser.clone()]),
        )
        .await;
    let b = cluster
        .submit(
            "node2",
            tx_on("node2", &[5], &[7]).with_required_endorsers([endorser]),
        )
        .await;
    cluster.settle(40).await;

    let mined = cluster.ledger.mined_transactions();
    let a_mined = mined.contains(&a);
    let b_mined = mined.contains(&b);
    assert!(
        a_mined ^ b_mined,
        "exactly one contender must dispatch, got a={a_mined} b={b_mined}"
    );

    cluster.shutdown().await;
}
