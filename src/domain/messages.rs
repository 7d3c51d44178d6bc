//! Channel messages exchanged between the arranger, the sender and the
//! reveal monitors, plus the monitored-tx id templates they are keyed by.

use alloy::primitives::B256;

use crate::infra::{AggregatorError, Result};
use crate::proto;

use super::Proof;

/// A final proof ready for the commit phase, emitted by the arranger in
/// strictly increasing `batch_number_final` order.
#[derive(Debug, Clone)]
pub struct FinalProofMsg {
    pub prover_name: String,
    pub prover_id: String,
    pub recursive_proof: Proof,
    pub final_proof: proto::FinalProof,
}

/// A committed proof hash whose reveal window is open (or being retried).
#[derive(Debug, Clone)]
pub struct ProofHashMsg {
    pub hash: B256,
    pub batch_number: u64,
    pub batch_number_final: u64,
    pub monitored_proof_hash_tx_id: String,
}

/// Emitted by the sender when a commit-reveal round is abandoned; the
/// arranger rewinds and schedules a fresh commit.
#[derive(Debug, Clone, Copy)]
pub struct SendFailProofMsg {
    pub batch_number: u64,
    pub batch_number_final: u64,
}

/// Monitored tx id for the reveal phase: `"proof-from-{from}-to-{to}"`.
pub fn reveal_tx_id(batch_number: u64, batch_number_final: u64) -> String {
    format!("proof-from-{batch_number}-to-{batch_number_final}")
}

/// Monitored tx id for the commit phase: `"proof-hash-from-{from}-to-{to}"`.
pub fn commit_tx_id(batch_number: u64, batch_number_final: u64) -> String {
    format!("proof-hash-from-{batch_number}-to-{batch_number_final}")
}

/// Parses a reveal id. Batch numbers sit at dash-separated positions 2 and 4.
pub fn parse_reveal_tx_id(id: &str) -> Result<(u64, u64)> {
    parse_tx_id(id, "proof-from-", 2, 4)
}

/// Parses a commit id. Batch numbers sit at dash-separated positions 3 and 5.
pub fn parse_commit_tx_id(id: &str) -> Result<(u64, u64)> {
    parse_tx_id(id, "proof-hash-from-", 3, 5)
}

/// True if the id belongs to the commit phase. Checked before the reveal
/// parser because every commit id also starts with a `proof-` prefix match.
pub fn is_commit_tx_id(id: &str) -> bool {
    id.starts_with("proof-hash-from-")
}

pub fn is_reveal_tx_id(id: &str) -> bool {
    id.starts_with("proof-from-")
}

fn parse_tx_id(id: &str, prefix: &str, from_pos: usize, to_pos: usize) -> Result<(u64, u64)> {
    if !id.starts_with(prefix) {
        return Err(AggregatorError::Internal(format!(
            "monitored tx id {id} does not match template {prefix}*"
        )));
    }
    let parts: Vec<&str> = id.split('-').collect();
    let parse = |pos: usize| -> Result<u64> {
        parts
            .get(pos)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                AggregatorError::Internal(format!("malformed monitored tx id: {id}"))
            })
    };
    Ok((parse(from_pos)?, parse(to_pos)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_id_round_trip() {
        let id = reveal_tx_id(7, 42);
        assert_eq!(id, "proof-from-7-to-42");
        assert_eq!(parse_reveal_tx_id(&id).unwrap(), (7, 42));
    }

    #[test]
    fn commit_id_round_trip() {
        let id = commit_tx_id(7, 42);
        assert_eq!(id, "proof-hash-from-7-to-42");
        assert_eq!(parse_commit_tx_id(&id).unwrap(), (7, 42));
    }

    #[test]
    fn id_positions_match_wire_contract() {
        // External consumers split on '-' and read fixed positions.
        let reveal: Vec<&str> = "proof-from-1-to-9".split('-').collect();
        assert_eq!(reveal[2], "1");
        assert_eq!(reveal[4], "9");

        let commit: Vec<&str> = "proof-hash-from-1-to-9".split('-').collect();
        assert_eq!(commit[3], "1");
        assert_eq!(commit[5], "9");
    }

    #[test]
    fn commit_prefix_is_checked_first() {
        assert!(is_commit_tx_id("proof-hash-from-1-to-2"));
        assert!(!is_commit_tx_id("proof-from-1-to-2"));
        assert!(is_reveal_tx_id("proof-from-1-to-2"));
    }

    #[test]
    fn parse_rejects_foreign_ids() {
        assert!(parse_reveal_tx_id("sequence-from-1-to-2").is_err());
        assert!(parse_commit_tx_id("proof-from-1-to-2").is_err());
        assert!(parse_reveal_tx_id("proof-from-x-to-2").is_err());
    }
}
