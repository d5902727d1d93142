pub mod outbound;

pub use outbound::{
    BaseLedgerSubmitter, BlockIndexer, DomainState, DomainStateStore, KeyHandle, KeyManager,
    PeerDirectory, StateQuery, SubmissionStatus, SubmitterError, SystemTimeSource, TimeSource,
};
