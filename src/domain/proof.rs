//! Proof records: the scheduling row, the commit-reveal payload and the
//! final-proof handle.

use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The core scheduling record. One row covers the inclusive batch range
/// `[batch_number, batch_number_final]`; a non-null `generating_since` means
/// the row is leased by exactly one worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Proof {
    pub batch_number: u64,
    pub batch_number_final: u64,

    /// Recursive proof bytes; empty until the prover wait completes.
    pub proof: String,

    /// Prover-assigned handle for the in-flight computation.
    pub proof_id: Option<String>,

    /// Identity of the last prover that touched this row.
    pub prover: Option<String>,
    pub prover_id: Option<String>,

    /// Serialized request that produced this proof.
    pub input_prover: String,

    /// Row lease: set while a worker is generating, cleared on completion.
    /// Rows leased longer than the janitor interval are reclaimed.
    pub generating_since: Option<DateTime<Utc>>,
}

impl Proof {
    /// `"{from}-{to}"`, the form used in structured log fields.
    pub fn batch_range(&self) -> String {
        format!("{}-{}", self.batch_number, self.batch_number_final)
    }
}

/// Final-proof payload staged for the commit phase, keyed by
/// `(proof_hash, final_new_batch)`. Written right before the hash is
/// committed, read back at reveal time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProverProof {
    pub init_num_batch: u64,
    pub final_new_batch: u64,
    pub new_state_root: B256,
    pub local_exit_root: B256,
    pub proof: String,
    pub proof_hash: B256,
}

/// Aggregator-assigned handle linking a monitored tx id to the wrapped proof
/// returned by the prover. The `monitored_id` is the arranger's idempotency
/// key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalProofRecord {
    pub monitored_id: String,
    pub final_proof: String,
    pub final_proof_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Monitored tx result as reported by the L1 tx monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitoredTxStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct MonitoredTxResult {
    pub id: String,
    pub status: MonitoredTxStatus,
    pub tx_hash: Option<B256>,
}
