//! L2 batch, sequence and verification mirror types.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An L2 batch as captured by the synchronizer. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_number: u64,
    pub coinbase: Address,
    pub batch_l2_data: Vec<u8>,
    pub state_root: B256,
    pub local_exit_root: B256,
    pub acc_input_hash: B256,
    pub global_exit_root: B256,
    pub timestamp: DateTime<Utc>,
}

/// Inclusive range of batches committed on L1 in one sequencing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub from_batch_number: u64,
    pub to_batch_number: u64,
}

impl Sequence {
    pub fn new(from_batch_number: u64, to_batch_number: u64) -> Self {
        Self {
            from_batch_number,
            to_batch_number,
        }
    }
}

/// A batch verification observed on L1, mirrored by the synchronizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedBatch {
    pub block_number: u64,
    pub batch_number: u64,
    pub aggregator: Address,
    pub tx_hash: B256,
    pub state_root: B256,
}

/// A proof hash commit observed on L1, mirrored by the synchronizer. Decides
/// which aggregator holds the reveal right in the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofHashEvent {
    pub block_number: u64,
    pub sender: Address,
    pub init_num_batch: u64,
    pub final_new_batch: u64,
    pub proof_hash: B256,
}
