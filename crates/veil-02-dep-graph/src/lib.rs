//! # Dependency Graph
//!
//! In-memory DAG of in-flight transactions, one per sequencer instance.
//! Nodes are transactions; an edge `p -> t` records that `t` consumes a
//! state produced by `p`. Gives the sequencer O(1)-ish answers to "what may
//! dispatch now?" and "who is blocked on whom?".
//!
//! Nodes live in an arena with stable indices and a free list; edges are
//! index pairs. The graph is single-owner and needs no locking.

pub mod errors;
pub mod graph;

pub use errors::GraphError;
pub use graph::{TxGraph, TxNode};
