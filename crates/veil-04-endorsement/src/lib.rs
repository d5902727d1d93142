//! # Endorsement Gate
//!
//! Per-node guard over endorsement signing: a node never signs two
//! transactions whose input-state sets intersect, unless the earlier one has
//! been reverted. Whichever transaction this node sees first holds its
//! inputs; the distributed contention resolver may later overrule that
//! choice, which arrives here as a revert.
//!
//! Rejection is a value, not an error: callers branch on the verdict.

pub mod gate;

pub use gate::{EndorsementGate, EndorsementRequest, EndorsementVerdict};
