//! Commit-reveal proof hash.
//!
//! The commit half of the two-phase submission binds the final proof bytes to
//! the committing aggregator:
//!
//! ```text
//! hash = keccak256( keccak256(proof_bytes) || sender_address )
//! ```
//!
//! Tight concatenation: the inner digest contributes exactly 32 bytes and the
//! address exactly 20, with no ABI padding in between.

use alloy::primitives::{keccak256, Address, B256};

/// Computes the proof hash committed on L1 during the hash epoch.
pub fn proof_commitment_hash(proof: &str, sender: Address) -> B256 {
    let inner = keccak256(proof.as_bytes());
    let mut packed = [0u8; 52];
    packed[..32].copy_from_slice(inner.as_slice());
    packed[32..].copy_from_slice(sender.as_slice());
    keccak256(packed)
}
