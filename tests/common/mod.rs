//! Common fixtures for integration tests.

#![allow(dead_code)]

use alloy::primitives::{Address, B256};
use chrono::Utc;

use zkevm_aggregator::{Batch, Proof, VerifiedBatch};

/// Test aggregator address
pub fn test_sender() -> Address {
    "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
        .parse()
        .unwrap()
}

/// A recursive proof row covering `[from, to]` with valid JSON bytes.
pub fn proof(from: u64, to: u64) -> Proof {
    Proof {
        batch_number: from,
        batch_number_final: to,
        proof: format!("{{\"recursive\":{from}}}"),
        proof_id: Some(format!("id-{from}-{to}")),
        prover: Some("test-prover".to_string()),
        prover_id: Some("test-prover-id".to_string()),
        input_prover: String::new(),
        generating_since: None,
    }
}

pub fn batch(n: u64) -> Batch {
    Batch {
        batch_number: n,
        coinbase: test_sender(),
        batch_l2_data: vec![n as u8; 8],
        state_root: B256::repeat_byte(n as u8),
        local_exit_root: B256::repeat_byte(0x40),
        acc_input_hash: B256::repeat_byte(0x41),
        global_exit_root: B256::repeat_byte(0x42),
        timestamp: Utc::now(),
    }
}

pub fn verified_batch(n: u64, block: u64) -> VerifiedBatch {
    VerifiedBatch {
        block_number: block,
        batch_number: n,
        aggregator: test_sender(),
        tx_hash: B256::repeat_byte(0x50),
        state_root: B256::repeat_byte(n as u8),
    }
}
