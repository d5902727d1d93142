//! Outbound commands.
//!
//! Handlers mutate state and return commands; the runtime executes them on
//! the outbound pool. Keeping I/O out of the handlers makes every
//! transition synchronously testable.

use shared_types::{NodeName, TransactionId};
use uuid::Uuid;
use veil_05_transport::{
    CoordinatorMessage, DelegationAck, DelegationRequest, EndorsementRequestMsg,
    EndorsementResponseMsg,
};

/// One unit of outbound work.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Hand sequencing of a transaction to another node.
    SendDelegationRequest {
        delegate: NodeName,
        request: DelegationRequest,
    },
    /// Answer a delegation request, naming the final owner.
    SendDelegationAck {
        destination: NodeName,
        ack: DelegationAck,
        correlation_id: Option<Uuid>,
    },
    /// Ask a party on another node to endorse.
    SendEndorsementRequest {
        destination: NodeName,
        request: EndorsementRequestMsg,
    },
    /// Sign locally (as the endorsing node) and answer the requester. The
    /// runtime resolves the key and produces the signature.
    SignAndRespond {
        destination: NodeName,
        request: EndorsementRequestMsg,
        correlation_id: Option<Uuid>,
    },
    /// Answer an endorsement request with a refusal.
    SendEndorsementResponse {
        destination: NodeName,
        response: EndorsementResponseMsg,
        correlation_id: Option<Uuid>,
    },
    /// Fan an event out to every peer node.
    Broadcast { message: CoordinatorMessage },
    /// Submit a dependency-ordered batch to the base ledger.
    Dispatch { batch: Vec<TransactionId> },
    /// Query the base ledger for the outcome of an earlier dispatch whose
    /// result is unknown (crash recovery).
    ObserveDispatch { transaction: TransactionId },
}
