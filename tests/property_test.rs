//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for any valid input.

use proptest::prelude::*;

use alloy::primitives::{keccak256, Address};
use zkevm_aggregator::crypto::proof_commitment_hash;
use zkevm_aggregator::domain::{
    commit_tx_id, parse_commit_tx_id, parse_reveal_tx_id, reveal_tx_id,
};

fn arb_address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from)
}

proptest! {
    #[test]
    fn reveal_tx_id_round_trips(from in any::<u64>(), to in any::<u64>()) {
        let id = reveal_tx_id(from, to);
        prop_assert_eq!(parse_reveal_tx_id(&id).unwrap(), (from, to));
        // external consumers split on '-' and read positions 2 and 4
        let parts: Vec<&str> = id.split('-').collect();
        prop_assert_eq!(parts[2].parse::<u64>().unwrap(), from);
        prop_assert_eq!(parts[4].parse::<u64>().unwrap(), to);
    }

    #[test]
    fn commit_tx_id_round_trips(from in any::<u64>(), to in any::<u64>()) {
        let id = commit_tx_id(from, to);
        prop_assert_eq!(parse_commit_tx_id(&id).unwrap(), (from, to));
        let parts: Vec<&str> = id.split('-').collect();
        prop_assert_eq!(parts[3].parse::<u64>().unwrap(), from);
        prop_assert_eq!(parts[5].parse::<u64>().unwrap(), to);
    }

    #[test]
    fn commit_ids_never_parse_as_reveal_ids(from in any::<u64>(), to in any::<u64>()) {
        prop_assert!(parse_reveal_tx_id(&commit_tx_id(from, to)).is_err());
    }

    #[test]
    fn proof_hash_matches_tight_concatenation(
        proof in "[ -~]{0,256}",
        sender in arb_address(),
    ) {
        let mut packed = Vec::with_capacity(52);
        packed.extend_from_slice(keccak256(proof.as_bytes()).as_slice());
        packed.extend_from_slice(sender.as_slice());
        prop_assert_eq!(proof_commitment_hash(&proof, sender), keccak256(&packed));
    }

    #[test]
    fn proof_hash_binds_proof_and_sender(
        proof_a in "[a-z]{1,32}",
        proof_b in "[a-z]{1,32}",
        sender_a in arb_address(),
        sender_b in arb_address(),
    ) {
        prop_assume!(proof_a != proof_b);
        prop_assume!(sender_a != sender_b);
        prop_assert_ne!(
            proof_commitment_hash(&proof_a, sender_a),
            proof_commitment_hash(&proof_b, sender_a)
        );
        prop_assert_ne!(
            proof_commitment_hash(&proof_a, sender_a),
            proof_commitment_hash(&proof_a, sender_b)
        );
    }
}
