//! # Integration Tests Crate
//!
//! Multi-node, end-to-end scenarios for the coordinator: several node
//! containers share one in-memory wire and one in-memory base ledger, and
//! the tests assert on externally observable outcomes (what got mined, in
//! which order, submitted by whom, and what the journaled tables say).
//!
//! ## Structure
//!
//! - [`cluster`] — the multi-node harness
//! - `scenarios` — delegation, dependency-ordering, and contention flows
//! - `recovery` — restart rebuild and re-org retraction flows

pub mod cluster;

#[cfg(test)]
mod recovery;
#[cfg(test)]
mod scenarios;
