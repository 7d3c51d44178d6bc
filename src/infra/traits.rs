//! Trait definitions for the aggregator's collaborators.
//!
//! The proof store is the sole shared mutable state; every multi-row mutation
//! below is documented as atomic and implemented inside a single database
//! transaction. The L1 client and tx monitor wrap the settlement chain; both
//! are mocked in tests.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::domain::{
    Batch, FinalProofRecord, MonitoredTxResult, Proof, ProverProof, Sequence, VerifiedBatch,
};

use super::Result;

/// Transactional store of proofs, sequences and commit-reveal state.
///
/// Invariants upheld by implementations:
/// - at most one `proof` row exists per `(batch_number, batch_number_final)`;
/// - two live rows never cover overlapping ranges except inside the
///   aggregation swap of [`replace_aggregated_proofs`];
/// - a non-null `generating_since` leases the row to exactly one worker.
///
/// [`replace_aggregated_proofs`]: ProofStore::replace_aggregated_proofs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProofStore: Send + Sync {
    /// Returns the adjacent unlocked pair with the lowest starting batch:
    /// `p1.batch_number_final + 1 == p2.batch_number`.
    async fn get_proofs_to_aggregate(&self) -> Result<(Proof, Proof)>;

    /// Leases (or releases, with `None`) both rows of a pair in one
    /// transaction.
    async fn set_proof_pair_generating(
        &self,
        proof1: &Proof,
        proof2: &Proof,
        generating_since: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Returns an unlocked proof whose range starts at
    /// `last_verified_batch + 1`, or one that already contains that batch.
    async fn get_proof_ready_to_verify(&self, last_verified_batch: u64) -> Result<Proof>;

    /// Returns the lowest sequenced-but-unproven batch above `after_batch`.
    async fn get_virtual_batch_to_prove(&self, after_batch: u64) -> Result<Batch>;

    async fn get_batch_by_number(&self, batch_number: u64) -> Result<Batch>;

    /// Fails with `Conflict` if a row with the same range already exists.
    async fn add_generated_proof(&self, proof: &Proof) -> Result<()>;

    /// Updates a row in place; used both to set and to clear the lease.
    async fn update_generated_proof(&self, proof: &Proof) -> Result<()>;

    /// Deletes every row fully covered by `[batch_number, batch_number_final]`.
    async fn delete_generated_proofs(&self, batch_number: u64, batch_number_final: u64)
        -> Result<()>;

    /// Boot-time reset: drops rows that were leased but never produced proof
    /// bytes.
    async fn delete_ungenerated_proofs(&self) -> Result<()>;

    /// Atomically removes every row covered by `[batch_number,
    /// batch_number_final]` and inserts the aggregate in their place.
    async fn replace_aggregated_proofs(
        &self,
        batch_number: u64,
        batch_number_final: u64,
        proof: &Proof,
    ) -> Result<()>;

    /// Deletes every row with `batch_number_final <= upto_batch`.
    async fn cleanup_generated_proofs(&self, upto_batch: u64) -> Result<()>;

    /// Unlocks rows leased longer than `max_age`; returns how many.
    async fn cleanup_locked_proofs(&self, max_age: Duration) -> Result<u64>;

    /// True iff a set of sequences exactly tiles the proof's range.
    async fn check_proof_contains_complete_sequences(&self, proof: &Proof) -> Result<bool>;

    async fn get_last_verified_batch(&self) -> Result<VerifiedBatch>;

    /// Returns the sequence containing `batch_number`.
    /// `StateNotSynchronized` when the synchronizer has not seen it yet.
    async fn get_sequence(&self, batch_number: u64) -> Result<Sequence>;

    /// Idempotent on `(proof_hash, final_new_batch)`.
    async fn add_prover_proof(&self, prover_proof: &ProverProof) -> Result<()>;

    async fn get_prover_proof_by_hash(
        &self,
        proof_hash: B256,
        batch_number_final: u64,
    ) -> Result<ProverProof>;

    /// Upserts on `monitored_id`.
    async fn add_final_proof(&self, final_proof: &FinalProofRecord) -> Result<()>;

    async fn get_final_proof_by_monitored_id(&self, monitored_id: &str)
        -> Result<FinalProofRecord>;

    /// Returns the hash `sender` committed for `batch_number_final` if the
    /// commit is still within the allowed window of `min_commit` blocks
    /// behind `latest_block`; `ProofNotCommit` otherwise.
    async fn get_proof_hash_by_sender(
        &self,
        sender: Address,
        batch_number_final: u64,
        min_commit: u64,
        latest_block: u64,
    ) -> Result<B256>;

    /// Largest confirmed reveal: the `proof-from-*` monitored tx id with the
    /// highest final batch. `NotFound` when nothing was ever revealed.
    async fn get_last_proof_submission(&self) -> Result<String>;

    async fn have_monitored_tx(&self, id: &str) -> Result<bool>;
}

/// Read/build operations on the L1 settlement contract. Nothing is sent from
/// here; submission goes through [`L1TxMonitor`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait L1Client: Send + Sync {
    async fn get_latest_verified_batch_num(&self) -> Result<u64>;

    async fn get_latest_block_number(&self) -> Result<u64>;

    /// Returns the L1 block at which the sequence ending at
    /// `batch_number_final` first received a proof hash commit, and whether a
    /// matching proof has already been revealed by anyone.
    async fn get_sequenced_batch(&self, batch_number_final: u64) -> Result<(u64, bool)>;

    async fn build_proof_hash_tx_data(
        &self,
        last_verified_batch: u64,
        new_verified_batch: u64,
        proof_hash: B256,
    ) -> Result<(Address, Vec<u8>)>;

    async fn build_untrusted_verify_batches_tx_data(
        &self,
        last_verified_batch: u64,
        new_verified_batch: u64,
        inputs: &FinalProofInputs,
    ) -> Result<(Address, Vec<u8>)>;

    /// Alternate path for the trusted-aggregator mode.
    async fn build_trusted_verify_batches_tx_data(
        &self,
        last_verified_batch: u64,
        new_verified_batch: u64,
        inputs: &FinalProofInputs,
    ) -> Result<(Address, Vec<u8>)>;

    /// True iff `account` has staked the required collateral.
    async fn judge_aggregator_deposit(&self, account: Address) -> Result<bool>;

    /// Commit-reveal window constants, in L1 blocks.
    async fn get_proof_hash_commit_epoch(&self) -> Result<u8>;
    async fn get_proof_commit_epoch(&self) -> Result<u8>;
}

/// Inputs for the reveal-phase verification calldata.
#[derive(Debug, Clone)]
pub struct FinalProofInputs {
    pub final_proof: String,
    pub new_local_exit_root: B256,
    pub new_state_root: B256,
}

/// Pending-transaction monitor: owns signing, nonce handling and resends for
/// L1 submissions identified by string ids.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait L1TxMonitor: Send + Sync {
    /// Registers a tx for submission; idempotent on `id`.
    async fn add(&self, id: &str, from: Address, to: Address, data: Vec<u8>) -> Result<()>;

    /// Drives every non-final tx one step (submit / poll receipt) and returns
    /// the current status of each monitored tx.
    async fn process_pending(&self) -> Result<Vec<MonitoredTxResult>>;

    /// Retires the monitored id so the slot can be reused by a retry.
    async fn update_tx_id(&self, id: &str) -> Result<()>;
}

/// Pluggable predicate deciding whether proving a batch is worth it.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProfitabilityChecker: Send + Sync {
    async fn is_profitable(&self, collateral: U256) -> Result<bool>;
}
