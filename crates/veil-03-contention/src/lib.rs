//! # Contention Resolver
//!
//! When two transactions claim the same private state, every honest node
//! must agree on the winner without communicating. The verdict is a pure
//! function of the state id and the two transaction ids: hash
//! `state || min(a, b) || max(a, b)` and let one digest bit pick a side.
//!
//! The pair is sorted before hashing, so the verdict is order-independent;
//! the state id participates in the digest, so the same two transactions
//! contesting different states can see different winners.

use sha2::{Digest, Sha256};
use shared_types::{StateId, TransactionId};

/// Digest bit that picks the winner: the least-significant bit of the last
/// SHA-256 byte. Fixed for the life of the network; changing it is a
/// consensus-breaking event.
const DECISION_BIT_MASK: u8 = 0x01;

/// Deterministically pick the winner of a contest for `state` between `a`
/// and `b`.
///
/// Symmetric in its transaction arguments: `resolve(s, a, b) ==
/// resolve(s, b, a)`. Contesting a state with itself is a programming error
/// upstream but resolves harmlessly to the same id.
#[must_use]
pub fn resolve(state: &StateId, a: TransactionId, b: TransactionId) -> TransactionId {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };

    let mut hasher = Sha256::new();
    hasher.update(state.as_bytes());
    hasher.update(low.as_bytes());
    hasher.update(high.as_bytes());
    let digest = hasher.finalize();

    if digest[digest.len() - 1] & DECISION_BIT_MASK == 0 {
        low
    } else {
        high
    }
}
