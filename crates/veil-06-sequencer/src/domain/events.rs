//! Inbound events.
//!
//! Everything that can wake the sequencer: decoded peer messages, local API
//! calls, block indexer notifications, and completions or failures posted
//! back by the outbound pool.

use shared_types::{NodeName, PrivateTransaction, TransactionId};
use veil_05_transport::reader::InboundMessage;

/// A base-ledger receipt attributing a coordinator transaction to a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub transaction_id: TransactionId,
    pub success: bool,
}

/// Block indexer notifications, including re-org retractions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexedBlockEvent {
    /// A block with receipts for transactions this instance dispatched.
    Block {
        block_number: u64,
        block_hash: [u8; 32],
        parent_hash: [u8; 32],
        receipts: Vec<LedgerReceipt>,
    },
    /// A previously emitted block was retracted by a re-org.
    Retracted {
        block_number: u64,
        block_hash: [u8; 32],
    },
}

/// Everything the event loop can dequeue.
#[derive(Debug)]
pub enum SequencerEvent {
    /// A decoded message from a peer node.
    Peer(InboundMessage),
    /// A client on this node finished assembling a transaction.
    Submitted { transaction: PrivateTransaction },
    /// Local instruction to accept sequencing ownership.
    Assign { transaction_id: TransactionId },
    /// Restart recovery: rebuild in-flight state from persisted bodies.
    Recover {
        transactions: Vec<PrivateTransaction>,
    },
    /// Notification from the block indexer.
    BlockIndexed(IndexedBlockEvent),
    /// A dispatch completed on the base ledger submitter.
    DispatchCompleted {
        batch: Vec<TransactionId>,
        tx_hash: [u8; 32],
    },
    /// A dispatch could not be handed to the base ledger.
    DispatchFailed {
        batch: Vec<TransactionId>,
        reason: String,
    },
    /// An outbound send exhausted its retry budget or deadline.
    TransportFailure {
        destination: NodeName,
        message_type: String,
        transaction: Option<TransactionId>,
    },
}
