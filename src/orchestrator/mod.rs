//! Proof orchestrator.
//!
//! One cooperative loop per connected prover. Each iteration gates on the
//! aggregator's L1 collateral and the prover being idle, then tries in order:
//! promote an existing proof to a final proof, aggregate an adjacent pair,
//! generate a fresh batch proof. Row leases are taken under a process-wide
//! lock so two provers never race for the same work item, and every
//! unlock/cleanup path runs on a detached task so a dropped prover stream
//! cannot strand a lease.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{b256, Address, B256, U256};
use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{reveal_tx_id, Batch, FinalProofRecord, Proof, Sequence};
use crate::infra::{
    AggregatorError, L1Client, ProfitabilityChecker, ProofStore, Result,
};
use crate::metrics;
use crate::prover::ProverSession;
use crate::proto::InputProver;

// Roots returned by the mock prover; replaced with the executor-captured
// values before the final proof leaves the orchestrator.
const MOCKED_STATE_ROOT: B256 =
    b256!("090bcaf734c4f06c93954a827b45a6e8c67b8e0fd1e0a35a1c5982d6961828f9");
const MOCKED_LOCAL_EXIT_ROOT: B256 =
    b256!("17c04c3760510b48c6012742c540a81aba4bca2f78b9d14bfd2f123e2e53ea3e");

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub sender_address: Address,
    pub chain_id: u64,
    pub fork_id: u64,
    pub retry_time: Duration,
}

/// Verify progression shared by every prover session: the highest batch a
/// final proof was requested for, plus sequences that were skipped on the
/// way and must be reclaimed.
#[derive(Debug, Default)]
pub struct VerifyProgress {
    pub build_final_proof_batch_num: u64,
    pub skipped: VecDeque<Sequence>,
}

/// Outcome of the final-proof eligibility rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Covers the next batch to verify and tiles complete sequences.
    Eligible,
    /// Keep the row; it may become eligible later.
    Defer,
    /// Entirely below the verified head; delete the row.
    Discard,
}

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    store: Arc<dyn ProofStore>,
    l1: Arc<dyn L1Client>,
    profitability: Arc<dyn ProfitabilityChecker>,
    /// Serializes every pick+lock critical section across sessions.
    state_db_lock: Mutex<()>,
    progress: Mutex<VerifyProgress>,
    /// Bootstrap anchor: never prove or verify below this sequence.
    start_sequence: Option<Sequence>,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        store: Arc<dyn ProofStore>,
        l1: Arc<dyn L1Client>,
        profitability: Arc<dyn ProfitabilityChecker>,
        start_sequence: Option<Sequence>,
    ) -> Self {
        Self {
            cfg,
            store,
            l1,
            profitability,
            state_db_lock: Mutex::new(()),
            progress: Mutex::new(VerifyProgress::default()),
            start_sequence,
        }
    }

    /// Work loop for one prover session; returns when the session or the
    /// process is cancelled.
    pub async fn run(&self, session: &dyn ProverSession, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(AggregatorError::Cancelled);
            }

            match self.l1.judge_aggregator_deposit(self.cfg.sender_address).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(sender = %self.cfg.sender_address, "Aggregator collateral below minimum");
                    if !self.idle_wait(&cancel).await {
                        return Err(AggregatorError::Cancelled);
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Failed to check aggregator deposit");
                    if !self.idle_wait(&cancel).await {
                        return Err(AggregatorError::Cancelled);
                    }
                    continue;
                }
            }

            match session.is_idle().await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(prover = session.name(), "Prover is not idle");
                    if !self.idle_wait(&cancel).await {
                        return Err(AggregatorError::Cancelled);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            }

            let final_built = match self.try_build_final_proof(session, None).await {
                Ok(built) => built,
                Err(AggregatorError::Cancelled) => return Err(AggregatorError::Cancelled),
                Err(e) => {
                    error!(prover = session.name(), error = %e, "Error checking proofs to verify");
                    false
                }
            };
            if final_built {
                continue;
            }

            let mut worked = match self.try_aggregate_proofs(session).await {
                Ok(worked) => worked,
                Err(AggregatorError::Cancelled) => return Err(AggregatorError::Cancelled),
                Err(e) => {
                    error!(prover = session.name(), error = %e, "Error trying to aggregate proofs");
                    false
                }
            };

            if !worked {
                worked = match self.try_generate_batch_proof(session).await {
                    Ok(worked) => worked,
                    Err(AggregatorError::Cancelled) => return Err(AggregatorError::Cancelled),
                    Err(e) => {
                        error!(prover = session.name(), error = %e, "Error trying to generate batch proof");
                        false
                    }
                };
            }

            if !worked && !self.idle_wait(&cancel).await {
                return Err(AggregatorError::Cancelled);
            }
        }
    }

    /// Attempts to promote a proof into the final proof. With `None` the
    /// candidate is looked up (and leased) from the store; with `Some` the
    /// caller already holds the lease.
    pub async fn try_build_final_proof(
        &self,
        session: &dyn ProverSession,
        candidate: Option<Proof>,
    ) -> Result<bool> {
        match candidate {
            None => {
                let Some(proof) = self.try_get_to_verify_proof(session).await? else {
                    return Ok(false);
                };
                match self.build_final_proof(session, &proof).await {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        self.unlock_proof_detached(proof);
                        Err(e)
                    }
                }
            }
            Some(proof) => {
                let monitored_id = reveal_tx_id(proof.batch_number, proof.batch_number_final);
                match self.store.get_final_proof_by_monitored_id(&monitored_id).await {
                    Ok(_) => {
                        debug!(%monitored_id, "Final proof already generated");
                        return Ok(true);
                    }
                    Err(AggregatorError::NotFound) => {}
                    Err(e) => return Err(e),
                }

                let last_verified = self.last_verified_batch_num().await?;
                match self.validate_eligible_final_proof(&proof, last_verified).await? {
                    Eligibility::Eligible => {
                        self.build_final_proof(session, &proof).await?;
                        Ok(true)
                    }
                    Eligibility::Discard => {
                        warn!(
                            batches = %proof.batch_range(),
                            last_verified, "Proof below the verified head, deleting it"
                        );
                        self.store
                            .delete_generated_proofs(proof.batch_number, proof.batch_number_final)
                            .await?;
                        Ok(false)
                    }
                    Eligibility::Defer => Ok(false),
                }
            }
        }
    }

    /// Spec rules for whether `proof` may become the final proof given the
    /// last verified batch.
    pub async fn validate_eligible_final_proof(
        &self,
        proof: &Proof,
        last_verified: u64,
    ) -> Result<Eligibility> {
        let batch_to_verify = last_verified + 1;

        if proof.batch_number_final < batch_to_verify {
            return Ok(Eligibility::Discard);
        }

        let covers_next = proof.batch_number == batch_to_verify
            || (proof.batch_number < batch_to_verify && proof.batch_number_final >= batch_to_verify);
        if !covers_next {
            return Ok(Eligibility::Defer);
        }

        if !self.store.check_proof_contains_complete_sequences(proof).await? {
            info!(
                batches = %proof.batch_range(),
                "Proof not eligible: does not contain complete sequences"
            );
            return Ok(Eligibility::Defer);
        }
        Ok(Eligibility::Eligible)
    }

    async fn try_get_to_verify_proof(&self, session: &dyn ProverSession) -> Result<Option<Proof>> {
        let mut progress = self.progress.lock().await;
        let skipped = progress.skipped.pop_front();
        let last_verified = self.last_verified_batch_num().await?;

        let mut batch_num = progress.build_final_proof_batch_num + 1;
        if let Some(skipped) = skipped {
            batch_num = skipped.from_batch_number;
        } else if progress.build_final_proof_batch_num <= last_verified {
            batch_num = last_verified + 1;
            if let Some(start) = self.start_sequence {
                if start.from_batch_number > batch_num {
                    batch_num = start.from_batch_number;
                }
            }
        }

        let sequence = match self.store.get_sequence(batch_num).await {
            Ok(sequence) => sequence,
            Err(AggregatorError::StateNotSynchronized) => {
                debug!(batch_num, "No sequence for batch yet");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let proof = {
            let _guard = self.state_db_lock.lock().await;
            match self.store.get_proof_ready_to_verify(batch_num - 1).await {
                Ok(mut proof) => {
                    proof.generating_since = Some(Utc::now());
                    self.store.update_generated_proof(&proof).await?;
                    proof
                }
                Err(AggregatorError::NotFound) => {
                    debug!(batch_num, "No proof ready to verify");
                    progress.build_final_proof_batch_num = sequence.to_batch_number;
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        };

        if !json_valid(&proof.proof) {
            warn!(
                batches = %proof.batch_range(),
                prover = session.name(),
                "Discarding proof with invalid JSON"
            );
            self.store
                .delete_generated_proofs(proof.batch_number, proof.batch_number_final)
                .await?;
            return Ok(None);
        }

        progress.build_final_proof_batch_num = proof.batch_number_final;
        Ok(Some(proof))
    }

    async fn build_final_proof(
        &self,
        session: &dyn ProverSession,
        proof: &Proof,
    ) -> Result<()> {
        info!(
            prover = session.name(),
            prover_id = session.id(),
            prover_addr = session.addr(),
            batches = %proof.batch_range(),
            "Generating final proof"
        );

        let final_proof_id = session
            .final_proof(&proof.proof, &self.cfg.sender_address.to_string())
            .await?;
        info!(
            batches = %proof.batch_range(),
            %final_proof_id,
            "Final proof id received"
        );

        let mut final_proof = session.wait_final_proof(&final_proof_id).await?;

        if let Some(public) = final_proof.public.as_mut() {
            if public.new_state_root == MOCKED_STATE_ROOT.as_slice()
                && public.new_local_exit_root == MOCKED_LOCAL_EXIT_ROOT.as_slice()
            {
                let final_batch = self
                    .store
                    .get_batch_by_number(proof.batch_number_final)
                    .await?;
                warn!(
                    batches = %proof.batch_range(),
                    state_root = %final_batch.state_root,
                    local_exit_root = %final_batch.local_exit_root,
                    "Mock prover roots detected, using executor values instead"
                );
                public.new_state_root = final_batch.state_root.to_vec();
                public.new_local_exit_root = final_batch.local_exit_root.to_vec();
            }
        }

        let monitored_id = reveal_tx_id(proof.batch_number, proof.batch_number_final);
        let now = Utc::now();
        self.store
            .add_final_proof(&FinalProofRecord {
                monitored_id: monitored_id.clone(),
                final_proof: final_proof.proof.clone(),
                final_proof_id,
                created_at: now,
                updated_at: now,
            })
            .await?;

        metrics::final_proof_generated();
        info!(%monitored_id, "Final proof generated");
        Ok(())
    }

    async fn try_aggregate_proofs(&self, session: &dyn ProverSession) -> Result<bool> {
        let (proof1, proof2) = {
            let _guard = self.state_db_lock.lock().await;
            let (proof1, proof2) = match self.store.get_proofs_to_aggregate().await {
                Ok(pair) => pair,
                Err(AggregatorError::NotFound) => {
                    debug!("Nothing to aggregate");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };
            self.store
                .set_proof_pair_generating(&proof1, &proof2, Some(Utc::now()))
                .await?;
            (proof1, proof2)
        };

        let batches = format!("{}-{}", proof1.batch_number, proof2.batch_number_final);
        info!(
            prover = session.name(),
            prover_id = session.id(),
            %batches, "Aggregating proofs"
        );

        let monitored_id = reveal_tx_id(proof1.batch_number, proof2.batch_number_final);
        match self.store.get_final_proof_by_monitored_id(&monitored_id).await {
            Ok(_) => {
                debug!(%monitored_id, "Final proof already covers this range");
                self.unlock_pair_detached(proof1, proof2);
                return Ok(true);
            }
            Err(AggregatorError::NotFound) => {}
            Err(e) => {
                self.unlock_pair_detached(proof1, proof2);
                return Err(e);
            }
        }

        if !json_valid(&proof1.proof) {
            warn!(
                batches = %proof1.batch_range(),
                "Discarding aggregation input with invalid JSON"
            );
            self.store
                .delete_generated_proofs(proof1.batch_number, proof1.batch_number_final)
                .await?;
            self.unlock_proof_detached(proof2);
            return Ok(false);
        }
        if !json_valid(&proof2.proof) {
            warn!(
                batches = %proof2.batch_range(),
                "Discarding aggregation input with invalid JSON"
            );
            self.store
                .delete_generated_proofs(proof2.batch_number, proof2.batch_number_final)
                .await?;
            self.unlock_proof_detached(proof1);
            return Ok(false);
        }

        let input_prover = json!({
            "recursive_proof_1": proof1.proof,
            "recursive_proof_2": proof2.proof,
        })
        .to_string();

        let mut proof = Proof {
            batch_number: proof1.batch_number,
            batch_number_final: proof2.batch_number_final,
            prover: Some(session.name().to_string()),
            prover_id: Some(session.id().to_string()),
            input_prover,
            ..Default::default()
        };

        let proof_id = match session.aggregated_proof(&proof1.proof, &proof2.proof).await {
            Ok(id) => id,
            Err(e) => {
                self.unlock_pair_detached(proof1, proof2);
                return Err(e);
            }
        };
        proof.proof_id = Some(proof_id.clone());
        info!(%batches, %proof_id, "Aggregated proof id received");

        let recursive_proof = match session.wait_recursive_proof(&proof_id).await {
            Ok(recursive) => recursive,
            Err(e) => {
                self.unlock_pair_detached(proof1, proof2);
                return Err(e);
            }
        };
        proof.proof = recursive_proof;
        proof.generating_since = Some(Utc::now());

        // One transaction: the two inputs disappear and the aggregate takes
        // their place, still leased by this session.
        if let Err(e) = self
            .store
            .replace_aggregated_proofs(proof1.batch_number, proof2.batch_number_final, &proof)
            .await
        {
            self.unlock_pair_detached(proof1, proof2);
            return Err(e);
        }

        metrics::proof_aggregated();
        info!(%batches, "Aggregated proof generated");

        let final_built = match self
            .try_build_final_proof(session, Some(proof.clone()))
            .await
        {
            Ok(built) => built,
            Err(e) => {
                error!(%batches, error = %e, "Failed trying to build final proof from aggregate");
                false
            }
        };

        if !final_built {
            proof.generating_since = None;
            self.store.update_generated_proof(&proof).await?;
        }
        Ok(true)
    }

    async fn try_generate_batch_proof(&self, session: &dyn ProverSession) -> Result<bool> {
        let (batch, mut proof) = {
            let _guard = self.state_db_lock.lock().await;
            let last_verified = self.last_verified_batch_num().await?;

            let mut after_batch = last_verified;
            if let Some(start) = self.start_sequence {
                if start.from_batch_number > 0 && after_batch + 1 < start.from_batch_number {
                    after_batch = start.from_batch_number - 1;
                }
            }

            let batch = match self.store.get_virtual_batch_to_prove(after_batch).await {
                Ok(batch) => batch,
                Err(AggregatorError::NotFound) => {
                    debug!("No batch pending to generate proof");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            };

            // Collateral is not defined by the contract yet, pass zero.
            if !self.profitability.is_profitable(U256::ZERO).await? {
                info!(batch = batch.batch_number, "Batch is not profitable");
                return Ok(false);
            }

            let proof = Proof {
                batch_number: batch.batch_number,
                batch_number_final: batch.batch_number,
                prover: Some(session.name().to_string()),
                prover_id: Some(session.id().to_string()),
                generating_since: Some(Utc::now()),
                ..Default::default()
            };
            // Claim the batch before talking to the prover.
            self.store.add_generated_proof(&proof).await?;
            (batch, proof)
        };

        info!(
            prover = session.name(),
            prover_id = session.id(),
            batch = batch.batch_number,
            "Generating proof from batch"
        );

        let input = match self.build_input_prover(&batch).await {
            Ok(input) => input,
            Err(e) => {
                self.delete_proof_detached(&proof);
                return Err(e);
            }
        };
        proof.input_prover = serialize_input_prover(&input);

        let sequence = match self.store.get_sequence(proof.batch_number_final).await {
            Ok(sequence) => sequence,
            Err(e) => {
                self.delete_proof_detached(&proof);
                return Err(e);
            }
        };
        let monitored_id = reveal_tx_id(sequence.from_batch_number, sequence.to_batch_number);
        match self.store.get_final_proof_by_monitored_id(&monitored_id).await {
            Ok(_) => {
                debug!(%monitored_id, "Final proof already covers this batch");
                self.store
                    .delete_generated_proofs(proof.batch_number, proof.batch_number_final)
                    .await?;
                return Ok(true);
            }
            Err(AggregatorError::NotFound) => {}
            Err(e) => {
                self.delete_proof_detached(&proof);
                return Err(e);
            }
        }

        let proof_id = match session.batch_proof(input).await {
            Ok(id) => id,
            Err(e) => {
                self.delete_proof_detached(&proof);
                return Err(e);
            }
        };
        proof.proof_id = Some(proof_id.clone());
        info!(batch = batch.batch_number, %proof_id, "Batch proof id received");

        let recursive_proof = match session.wait_recursive_proof(&proof_id).await {
            Ok(recursive) => recursive,
            Err(e) => {
                self.delete_proof_detached(&proof);
                return Err(e);
            }
        };
        proof.proof = recursive_proof;

        if let Err(e) = self.store.update_generated_proof(&proof).await {
            self.delete_proof_detached(&proof);
            return Err(e);
        }

        metrics::batch_proof_generated();
        info!(batch = batch.batch_number, "Batch proof generated");

        let final_built = match self
            .try_build_final_proof(session, Some(proof.clone()))
            .await
        {
            Ok(built) => built,
            Err(e) => {
                error!(batch = batch.batch_number, error = %e, "Failed trying to build final proof from batch proof");
                false
            }
        };

        if !final_built {
            proof.generating_since = None;
            self.store.update_generated_proof(&proof).await?;
        }
        Ok(true)
    }

    async fn build_input_prover(&self, batch: &Batch) -> Result<InputProver> {
        let previous = self.store.get_batch_by_number(batch.batch_number - 1).await?;

        Ok(InputProver {
            public_inputs: Some(crate::proto::PublicInputs {
                old_state_root: previous.state_root.to_vec(),
                old_acc_input_hash: previous.acc_input_hash.to_vec(),
                old_batch_num: previous.batch_number,
                chain_id: self.cfg.chain_id,
                fork_id: self.cfg.fork_id,
                batch_l2_data: batch.batch_l2_data.clone(),
                global_exit_root: batch.global_exit_root.to_vec(),
                eth_timestamp: batch.timestamp.timestamp().max(0) as u64,
                sequencer_addr: batch.coinbase.to_string(),
                aggregator_addr: self.cfg.sender_address.to_string(),
            }),
            db: Default::default(),
            contracts_bytecode: Default::default(),
        })
    }

    async fn last_verified_batch_num(&self) -> Result<u64> {
        match self.store.get_last_verified_batch().await {
            Ok(batch) => Ok(batch.batch_number),
            Err(AggregatorError::NotFound) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Sweeps the window between the verified head and the verify
    /// progression for sequences whose final proof never landed: their stale
    /// recursive proofs are dropped and the sequence is queued for a retry.
    pub async fn reclaim_skipped_sequences(&self) -> Result<()> {
        let last_verified = self.last_verified_batch_num().await?;
        let mut progress = self.progress.lock().await;

        let mut batch = last_verified;
        if let Some(start) = self.start_sequence {
            if start.from_batch_number > last_verified {
                batch = start.from_batch_number - 1;
            }
        }
        let target = progress.build_final_proof_batch_num;

        while batch < target {
            let sequence = match self.store.get_sequence(batch + 1).await {
                Ok(sequence) => sequence,
                Err(AggregatorError::StateNotSynchronized) => break,
                Err(e) => return Err(e),
            };
            let monitored_id =
                reveal_tx_id(sequence.from_batch_number, sequence.to_batch_number);
            match self.store.get_final_proof_by_monitored_id(&monitored_id).await {
                Ok(_) => {}
                Err(AggregatorError::NotFound) => {
                    if !progress.skipped.contains(&sequence) {
                        info!(
                            from = sequence.from_batch_number,
                            to = sequence.to_batch_number,
                            "Requeueing skipped sequence"
                        );
                        self.store
                            .delete_generated_proofs(
                                sequence.from_batch_number,
                                sequence.to_batch_number,
                            )
                            .await?;
                        progress.skipped.push_back(sequence);
                    }
                }
                Err(e) => return Err(e),
            }
            batch = sequence.to_batch_number;
        }

        progress
            .skipped
            .make_contiguous()
            .sort_by_key(|s| s.from_batch_number);
        Ok(())
    }

    async fn idle_wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.cfg.retry_time) => true,
        }
    }

    fn unlock_proof_detached(&self, mut proof: Proof) {
        let store = self.store.clone();
        tokio::spawn(async move {
            proof.generating_since = None;
            if let Err(e) = store.update_generated_proof(&proof).await {
                error!(batches = %proof.batch_range(), error = %e, "Failed to unlock proof");
            }
        });
    }

    fn unlock_pair_detached(&self, proof1: Proof, proof2: Proof) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.set_proof_pair_generating(&proof1, &proof2, None).await {
                error!(
                    batches = %format!("{}-{}", proof1.batch_number, proof2.batch_number_final),
                    error = %e,
                    "Failed to unlock proof pair"
                );
            }
        });
    }

    fn delete_proof_detached(&self, proof: &Proof) {
        let store = self.store.clone();
        let (from, to) = (proof.batch_number, proof.batch_number_final);
        tokio::spawn(async move {
            if let Err(e) = store.delete_generated_proofs(from, to).await {
                error!(batches = %format!("{from}-{to}"), error = %e, "Failed to delete proof in progress");
            }
        });
    }
}

fn json_valid(s: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(s).is_ok()
}

fn serialize_input_prover(input: &InputProver) -> String {
    let Some(public) = input.public_inputs.as_ref() else {
        return String::new();
    };
    json!({
        "oldStateRoot": format!("0x{}", hex::encode(&public.old_state_root)),
        "oldAccInputHash": format!("0x{}", hex::encode(&public.old_acc_input_hash)),
        "oldBatchNum": public.old_batch_num,
        "chainId": public.chain_id,
        "forkId": public.fork_id,
        "batchL2Data": format!("0x{}", hex::encode(&public.batch_l2_data)),
        "globalExitRoot": format!("0x{}", hex::encode(&public.global_exit_root)),
        "ethTimestamp": public.eth_timestamp,
        "sequencerAddr": public.sequencer_addr,
        "aggregatorAddr": public.aggregator_addr,
    })
    .to_string()
}

/// Unlocks proof rows whose lease outlived `interval`.
pub async fn run_locked_proof_janitor(
    store: Arc<dyn ProofStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match store.cleanup_locked_proofs(interval).await {
            Ok(0) => {}
            Ok(unlocked) => info!(unlocked, "Unlocked proofs left in generating state"),
            Err(e) => error!(error = %e, "Failed to cleanup locked proofs"),
        }
    }
}

/// Periodic sweep feeding the orchestrator's skipped-sequence queue.
pub async fn run_skipped_sequence_watchdog(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if let Err(e) = orchestrator.reclaim_skipped_sequences().await {
            debug!(error = %e, "Skipped sequence sweep failed");
        }
    }
}

#[cfg(test)]
mod tests;
