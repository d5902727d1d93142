//! # Veil Node Runtime
//!
//! Wires one node together: the shared state reference store, a transport
//! reader/writer pair per node, one sequencer instance per privacy
//! contract, the transport-details registry, and the collaborator adapters
//! (base ledger, key manager, peer directory, transaction log).
//!
//! The coordinator crates know nothing about configuration files or
//! concrete collaborators; everything concrete lives here.

pub mod adapters;
pub mod config;
pub mod container;
pub mod registry;

pub use config::{KeyManagerConfig, NodeConfig};
pub use container::NodeContainer;
pub use registry::{TransportDetails, TransportDetailsRegistry};
