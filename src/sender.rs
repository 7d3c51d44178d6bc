//! Proof sender.
//!
//! Single-threaded two-phase L1 submitter. Phase H commits the proof hash
//! inside the hash-epoch window of the target sequence; phase P reveals the
//! proof in the subsequent proof-epoch window. The task owns one commit slot
//! and one reveal slot (a new round never starts while its slot is occupied),
//! an ordered cache for messages that arrived ahead of the L1-observed commit
//! progression, and one background ticker per in-flight reveal.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::crypto::proof_commitment_hash;
use crate::domain::{
    commit_tx_id, is_commit_tx_id, is_reveal_tx_id, parse_commit_tx_id, parse_reveal_tx_id,
    reveal_tx_id, FinalProofMsg, MonitoredTxStatus, Proof, ProofHashMsg, ProverProof,
    SendFailProofMsg,
};
use crate::infra::traits::FinalProofInputs;
use crate::infra::{AggregatorError, L1Client, L1TxMonitor, ProofStore, Result};
use crate::metrics;
use crate::proto;

const TICK: Duration = Duration::from_secs(1);
const BLOCK_ADVANCE_BACKOFF: Duration = Duration::from_secs(3);
const REVEAL_MONITOR_TICK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub sender_address: Address,
    pub retry_time: Duration,
}

/// Commit slot: the message being committed plus the block/batch progression
/// carried across iterations.
struct CommitTask {
    msg: Option<FinalProofMsg>,
    block_number: u64,
    commit_proof_hash_batch_num: u64,
}

/// Heap entry ordered by `batch_number_final` (then `batch_number`).
struct OrderedMsg(FinalProofMsg);

impl OrderedMsg {
    fn key(&self) -> (u64, u64) {
        (
            self.0.recursive_proof.batch_number_final,
            self.0.recursive_proof.batch_number,
        )
    }
}

impl PartialEq for OrderedMsg {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for OrderedMsg {}
impl PartialOrd for OrderedMsg {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedMsg {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

pub struct ProofSender {
    cfg: SenderConfig,
    store: Arc<dyn ProofStore>,
    l1: Arc<dyn L1Client>,
    monitor: Arc<dyn L1TxMonitor>,
    final_proof_rx: mpsc::Receiver<FinalProofMsg>,
    proof_hash_rx: mpsc::Receiver<ProofHashMsg>,
    /// Kept for the reveal monitors and for re-enqueueing failed reveals.
    proof_hash_tx: mpsc::Sender<ProofHashMsg>,
    send_fail_tx: mpsc::Sender<SendFailProofMsg>,
    future_msgs: BinaryHeap<Reverse<OrderedMsg>>,
    hash_epoch: u8,
    proof_epoch: u8,
}

impl ProofSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: SenderConfig,
        store: Arc<dyn ProofStore>,
        l1: Arc<dyn L1Client>,
        monitor: Arc<dyn L1TxMonitor>,
        final_proof_rx: mpsc::Receiver<FinalProofMsg>,
        proof_hash_rx: mpsc::Receiver<ProofHashMsg>,
        proof_hash_tx: mpsc::Sender<ProofHashMsg>,
        send_fail_tx: mpsc::Sender<SendFailProofMsg>,
        hash_epoch: u8,
        proof_epoch: u8,
    ) -> Self {
        Self {
            cfg,
            store,
            l1,
            monitor,
            final_proof_rx,
            proof_hash_rx,
            proof_hash_tx,
            send_fail_tx,
            future_msgs: BinaryHeap::new(),
            hash_epoch,
            proof_epoch,
        }
    }

    fn cycle(&self) -> u64 {
        self.hash_epoch as u64 + self.proof_epoch as u64
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            hash_epoch = self.hash_epoch,
            proof_epoch = self.proof_epoch,
            "Proof sender started"
        );

        let mut commit_task = CommitTask {
            msg: None,
            block_number: 0,
            commit_proof_hash_batch_num: 0,
        };
        let mut reveal_task: Option<ProofHashMsg> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(TICK) => {}
            }

            if let Err(e) = self.update_epoch_info().await {
                warn!(error = %e, "Failed to refresh epoch constants");
                continue;
            }

            // Drain at most one item; the reveal queue has priority.
            if reveal_task.is_none() {
                match self.proof_hash_rx.try_recv() {
                    Ok(msg) => reveal_task = Some(msg),
                    Err(_) => {
                        if let Ok(msg) = self.final_proof_rx.try_recv() {
                            self.park_future_msg(msg);
                        }
                    }
                }
            }

            if reveal_task.is_none() && commit_task.msg.is_none() {
                commit_task.msg = self.pop_future_msg();
            }

            if let Some(task) = reveal_task.take() {
                reveal_task = self.send_proof(task, &cancel).await;
            }

            if commit_task.msg.is_some() {
                if let Err(e) = self.send_proof_hash(&mut commit_task, &cancel).await {
                    warn!(error = %e, "Commit phase iteration failed");
                }
            }
        }
    }

    fn park_future_msg(&mut self, msg: FinalProofMsg) {
        self.future_msgs.push(Reverse(OrderedMsg(msg)));
    }

    fn pop_future_msg(&mut self) -> Option<FinalProofMsg> {
        self.future_msgs.pop().map(|Reverse(OrderedMsg(msg))| msg)
    }

    async fn update_epoch_info(&mut self) -> Result<()> {
        self.hash_epoch = self.l1.get_proof_hash_commit_epoch().await?;
        self.proof_epoch = self.l1.get_proof_commit_epoch().await?;
        Ok(())
    }

    /// Phase H: commit `keccak256(keccak256(proof) || sender)` for the batch
    /// range at the head of the ordered progression.
    async fn send_proof_hash(
        &mut self,
        task: &mut CommitTask,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(msg) = task.msg.clone() else {
            return Ok(());
        };

        let last_verified_eth = self.l1.get_latest_verified_batch_num().await?;
        if task.commit_proof_hash_batch_num <= last_verified_eth {
            task.commit_proof_hash_batch_num = last_verified_eth;
        }

        let cur_block = self.l1.get_latest_block_number().await?;
        if task.block_number > 0 && task.block_number + 1 > cur_block {
            // advance with L1
            tokio::time::sleep(BLOCK_ADVANCE_BACKOFF).await;
            return Ok(());
        }
        task.block_number = cur_block;

        let expected = task.commit_proof_hash_batch_num + 1;
        let proof = msg.recursive_proof.clone();
        if expected > proof.batch_number {
            warn!(
                expected,
                got = proof.batch_number,
                "Receive pre msg, dropping"
            );
            task.msg = None;
            return Ok(());
        }
        if expected < proof.batch_number {
            warn!(
                expected,
                got = proof.batch_number,
                "Receive future msg, parking"
            );
            if let Some(msg) = task.msg.take() {
                self.park_future_msg(msg);
            }
            return Ok(());
        }

        let (seq_block, _) = self.l1.get_sequenced_batch(proof.batch_number_final).await?;
        if seq_block > 0 && (cur_block - seq_block) % self.cycle() > self.hash_epoch as u64 {
            warn!(
                cur_block,
                seq_block,
                batches = %proof.batch_range(),
                "Commit window for this sequence has closed, dropping"
            );
            task.msg = None;
            return Ok(());
        }

        let hash = proof_commitment_hash(&msg.final_proof.proof, self.cfg.sender_address);
        let monitored_tx_id = commit_tx_id(proof.batch_number, proof.batch_number_final);

        let final_batch = self
            .store
            .get_batch_by_number(proof.batch_number_final)
            .await?;

        match self
            .store
            .get_prover_proof_by_hash(hash, proof.batch_number_final)
            .await
        {
            Ok(_) => {}
            Err(AggregatorError::NotFound) => {
                self.store
                    .add_prover_proof(&ProverProof {
                        init_num_batch: proof.batch_number,
                        final_new_batch: proof.batch_number_final,
                        new_state_root: final_batch.state_root,
                        local_exit_root: final_batch.local_exit_root,
                        proof: msg.final_proof.proof.clone(),
                        proof_hash: hash,
                    })
                    .await?;
            }
            Err(e) => return Err(e),
        }

        let (to, data) = self
            .l1
            .build_proof_hash_tx_data(proof.batch_number - 1, proof.batch_number_final, hash)
            .await?;
        self.monitor
            .add(&monitored_tx_id, self.cfg.sender_address, to, data)
            .await?;
        debug!(monitored_tx_id = %monitored_tx_id, hash = %hash, "Proof hash commit registered");

        let results = self.monitor.process_pending().await?;
        let mut resend: Option<FinalProofMsg> = None;
        let mut confirmed = false;
        for result in results {
            if !is_commit_tx_id(&result.id) {
                continue;
            }
            match result.status {
                MonitoredTxStatus::Confirmed if result.id == monitored_tx_id => {
                    confirmed = true;
                }
                MonitoredTxStatus::Failed => {
                    error!(tx_id = %result.id, "Failed to send proof hash");
                    if let Err(e) = self.monitor.update_tx_id(&result.id).await {
                        error!(tx_id = %result.id, error = %e, "Failed to retire monitored tx id");
                    }
                    let Ok((from, to_batch)) = parse_commit_tx_id(&result.id) else {
                        continue;
                    };
                    let reveal_id = reveal_tx_id(from, to_batch);
                    if let Ok(record) =
                        self.store.get_final_proof_by_monitored_id(&reveal_id).await
                    {
                        resend = Some(FinalProofMsg {
                            prover_name: String::new(),
                            prover_id: String::new(),
                            recursive_proof: Proof {
                                batch_number: from,
                                batch_number_final: to_batch,
                                proof_id: Some(record.final_proof_id),
                                ..Default::default()
                            },
                            final_proof: proto::FinalProof {
                                proof: record.final_proof,
                                public: None,
                            },
                        });
                    }
                }
                _ => {}
            }
        }

        if let Some(resend_msg) = resend {
            warn!(
                batches = %resend_msg.recursive_proof.batch_range(),
                "Requeueing failed proof hash commit"
            );
            task.msg = Some(resend_msg);
            return Ok(());
        }

        if confirmed {
            metrics::proof_hash_committed();
            task.commit_proof_hash_batch_num = proof.batch_number_final;
            task.msg = None;
            self.spawn_reveal_monitor(
                proof.batch_number,
                proof.batch_number_final,
                monitored_tx_id,
                cancel,
            );
        }
        // Still pending: the slot stays occupied and the next tick drives the
        // monitored tx further.
        Ok(())
    }

    /// Phase P: reveal the committed proof. Returns the task when it must be
    /// retried on the next tick.
    async fn send_proof(
        &mut self,
        task: ProofHashMsg,
        cancel: &CancellationToken,
    ) -> Option<ProofHashMsg> {
        let (seq_block, proof_submitted) =
            match self.l1.get_sequenced_batch(task.batch_number_final).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "Failed to get sequenced batch for reveal");
                    return Some(task);
                }
            };
        let cur_block = match self.l1.get_latest_block_number().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to get latest block for reveal");
                return Some(task);
            }
        };

        // A whole cycle has passed and nobody revealed: the system is in a
        // fresh hash epoch, so this round is lost. Signal the arranger.
        if seq_block + self.cycle() < cur_block
            && !proof_submitted
            && (cur_block - seq_block) % self.cycle() < self.hash_epoch as u64
        {
            warn!(
                cur_block,
                seq_block,
                batches = %format!("{}-{}", task.batch_number, task.batch_number_final),
                "Reveal window expired without a proof, scheduling fresh commit"
            );
            self.emit_send_fail(task.batch_number, task.batch_number_final)
                .await;
            return None;
        }

        let prover_proof = match self
            .store
            .get_prover_proof_by_hash(task.hash, task.batch_number_final)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                error!(hash = %task.hash, error = %e, "Failed to load prover proof for reveal");
                return Some(task);
            }
        };

        info!(
            batches = %format!("{}-{}", prover_proof.init_num_batch, prover_proof.final_new_batch),
            "Verifying final proof with settlement contract"
        );

        let inputs = FinalProofInputs {
            final_proof: prover_proof.proof.clone(),
            new_local_exit_root: prover_proof.local_exit_root,
            new_state_root: prover_proof.new_state_root,
        };
        let (to, data) = match self
            .l1
            .build_untrusted_verify_batches_tx_data(
                prover_proof.init_num_batch - 1,
                prover_proof.final_new_batch,
                &inputs,
            )
            .await
        {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Failed to build verify batches calldata");
                return Some(task);
            }
        };

        let reveal_id = reveal_tx_id(prover_proof.init_num_batch, prover_proof.final_new_batch);
        if let Err(e) = self
            .monitor
            .add(&reveal_id, self.cfg.sender_address, to, data)
            .await
        {
            error!(tx_id = %reveal_id, error = %e, "Failed to register reveal tx");
            return Some(task);
        }

        let results = match self.monitor.process_pending().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to process pending monitored txs");
                return Some(task);
            }
        };

        let mut retained = None;
        for result in results {
            if !is_reveal_tx_id(&result.id) || is_commit_tx_id(&result.id) {
                continue;
            }
            match result.status {
                MonitoredTxStatus::Confirmed => {
                    let Ok((_, to_batch)) = parse_reveal_tx_id(&result.id) else {
                        continue;
                    };
                    info!(tx_id = %result.id, "Final proof verified");
                    metrics::proof_revealed();
                    self.wait_synced_and_cleanup(to_batch, cancel).await;
                }
                MonitoredTxStatus::Failed => {
                    error!(tx_id = %result.id, "Failed to send batch verification");
                    self.handle_failed_reveal(&result.id, cur_block).await;
                }
                MonitoredTxStatus::Pending if result.id == reveal_id => {
                    retained = Some(task.clone());
                }
                MonitoredTxStatus::Pending => {}
            }
        }
        retained
    }

    /// A reveal tx failed on L1: retire both monitored ids and either retry
    /// the reveal (hash is still committed) or abandon the round when the
    /// window is about to close.
    async fn handle_failed_reveal(&mut self, failed_id: &str, cur_block: u64) {
        if let Err(e) = self.monitor.update_tx_id(failed_id).await {
            error!(tx_id = %failed_id, error = %e, "Failed to retire monitored tx id");
        }
        let Ok((from, to_batch)) = parse_reveal_tx_id(failed_id) else {
            return;
        };
        let commit_id = commit_tx_id(from, to_batch);
        if let Err(e) = self.monitor.update_tx_id(&commit_id).await {
            error!(tx_id = %commit_id, error = %e, "Failed to retire monitored tx id");
        }

        let record = match self.store.get_final_proof_by_monitored_id(&reveal_tx_id(from, to_batch)).await {
            Ok(record) => record,
            Err(e) => {
                error!(error = %e, "No stored final proof for failed reveal");
                return;
            }
        };

        let seq_block = match self.l1.get_sequenced_batch(to_batch).await {
            Ok((seq_block, _)) => seq_block,
            Err(e) => {
                warn!(error = %e, "Failed to get sequenced batch for reveal retry");
                return;
            }
        };

        if seq_block + self.cycle() < cur_block + 2 {
            warn!(
                batches = %format!("{from}-{to_batch}"),
                "Reveal retry window closed, scheduling fresh commit"
            );
            self.emit_send_fail(from, to_batch).await;
            return;
        }

        let hash = proof_commitment_hash(&record.final_proof, self.cfg.sender_address);
        let msg = ProofHashMsg {
            hash,
            batch_number: from,
            batch_number_final: to_batch,
            monitored_proof_hash_tx_id: commit_id,
        };
        if self.proof_hash_tx.send(msg).await.is_err() {
            warn!("Proof hash channel closed while requeueing reveal");
        }
    }

    async fn emit_send_fail(&self, batch_number: u64, batch_number_final: u64) {
        let msg = SendFailProofMsg {
            batch_number,
            batch_number_final,
        };
        if self.send_fail_tx.send(msg).await.is_err() {
            warn!("Send fail channel closed");
        }
    }

    /// Never clean up proofs before the local synchronizer has seen the
    /// verification.
    async fn wait_synced_and_cleanup(&self, batch_number_final: u64, cancel: &CancellationToken) {
        loop {
            if self.is_synced(batch_number_final).await {
                break;
            }
            debug!(
                batch_number_final,
                "A final proof has been sent, waiting for the network to be synced"
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.cfg.retry_time) => {}
            }
        }

        if let Err(e) = self.store.cleanup_generated_proofs(batch_number_final).await {
            error!(batch_number_final, error = %e, "Failed to cleanup generated proofs");
        }
    }

    async fn is_synced(&self, batch_number_final: u64) -> bool {
        let local = match self.store.get_last_verified_batch().await {
            Ok(batch) => batch.batch_number,
            Err(_) => return false,
        };
        if local < batch_number_final {
            return false;
        }
        let eth = match self.l1.get_latest_verified_batch_num().await {
            Ok(num) => num,
            Err(e) => {
                warn!(error = %e, "Failed to get latest verified batch from L1");
                return false;
            }
        };
        local >= eth
    }

    fn spawn_reveal_monitor(
        &self,
        batch_number: u64,
        batch_number_final: u64,
        monitored_tx_id: String,
        cancel: &CancellationToken,
    ) {
        let l1 = self.l1.clone();
        let store = self.store.clone();
        let proof_hash_tx = self.proof_hash_tx.clone();
        let sender = self.cfg.sender_address;
        let hash_epoch = self.hash_epoch;
        let proof_epoch = self.proof_epoch;
        let cancel = cancel.clone();
        tokio::spawn(monitor_send_proof(
            l1,
            store,
            proof_hash_tx,
            sender,
            hash_epoch,
            proof_epoch,
            batch_number,
            batch_number_final,
            monitored_tx_id,
            cancel,
        ));
    }
}

/// Waits for the reveal window of `[batch_number, batch_number_final]` to
/// open, then pushes the committed hash to the reveal queue. Stops when
/// someone (possibly us) reveals, or when this aggregator lost the commit
/// race.
#[allow(clippy::too_many_arguments)]
async fn monitor_send_proof(
    l1: Arc<dyn L1Client>,
    store: Arc<dyn ProofStore>,
    proof_hash_tx: mpsc::Sender<ProofHashMsg>,
    sender: Address,
    hash_epoch: u8,
    proof_epoch: u8,
    batch_number: u64,
    batch_number_final: u64,
    monitored_tx_id: String,
    cancel: CancellationToken,
) {
    info!(
        batch_number,
        batch_number_final,
        monitored_tx_id = %monitored_tx_id,
        "Start monitoring reveal window"
    );
    let cycle = hash_epoch as u64 + proof_epoch as u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(REVEAL_MONITOR_TICK) => {}
        }

        let cur_block = match l1.get_latest_block_number().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to get latest block in reveal monitor");
                continue;
            }
        };
        let last_verified_eth = match l1.get_latest_verified_batch_num().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to get latest verified batch in reveal monitor");
                continue;
            }
        };

        if last_verified_eth >= batch_number_final {
            debug!(monitored_tx_id = %monitored_tx_id, "Batch already verified, reveal monitor done");
            return;
        }
        if last_verified_eth + 1 != batch_number {
            debug!(
                last_verified_eth,
                batch_number, "Not our turn to reveal yet"
            );
            continue;
        }

        let seq_block = match l1.get_sequenced_batch(batch_number_final).await {
            Ok((seq_block, _)) => seq_block,
            Err(e) => {
                warn!(error = %e, "Failed to get sequenced batch in reveal monitor");
                continue;
            }
        };
        if seq_block == 0 || (cur_block - seq_block) % cycle < hash_epoch as u64 {
            // reveal window not open yet
            continue;
        }

        match store
            .get_proof_hash_by_sender(sender, batch_number_final, hash_epoch as u64, cur_block)
            .await
        {
            Ok(hash) => {
                info!(
                    hash = %hash,
                    batch_number_final,
                    monitored_tx_id = %monitored_tx_id,
                    "Reveal window open, queueing proof"
                );
                let msg = ProofHashMsg {
                    hash,
                    batch_number,
                    batch_number_final,
                    monitored_proof_hash_tx_id: monitored_tx_id.clone(),
                };
                let _ = proof_hash_tx.send(msg).await;
                return;
            }
            Err(AggregatorError::ProofNotCommit) => {
                warn!(
                    batch_number_final,
                    "Lost the commit race for this batch, stopping reveal monitor"
                );
                return;
            }
            Err(e) => {
                debug!(batch_number_final, error = %e, "Proof hash not available yet");
                continue;
            }
        }
    }
}
