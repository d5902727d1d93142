pub mod domain_states;
pub mod keys;
pub mod ledger;
pub mod peers;
pub mod txlog;

pub use domain_states::InMemoryDomainStates;
pub use keys::build_key_manager;
pub use ledger::InMemoryLedger;
pub use peers::{RegistryPeerDirectory, StaticPeerDirectory};
pub use txlog::TransactionLog;
