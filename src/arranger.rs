//! Proof arranger.
//!
//! Single long-lived task that feeds the sender. At boot it replays rounds
//! whose hash was committed before the last shutdown but whose reveal never
//! landed. In steady state it walks the sequences above the verified head in
//! order, emitting exactly one final-proof message per sequence once the
//! orchestrator has persisted the wrapped proof. The sender reports abandoned
//! rounds back on the fail channel and the arranger rewinds to re-emit them.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crypto::proof_commitment_hash;
use crate::domain::{
    commit_tx_id, parse_reveal_tx_id, reveal_tx_id, FinalProofMsg, Proof, ProofHashMsg,
    SendFailProofMsg,
};
use crate::infra::{AggregatorError, ProofStore, Result};
use crate::proto;

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ArrangerConfig {
    pub sender_address: Address,
}

pub struct ProofArranger {
    cfg: ArrangerConfig,
    store: Arc<dyn ProofStore>,
    final_proof_tx: mpsc::Sender<FinalProofMsg>,
    proof_hash_tx: mpsc::Sender<ProofHashMsg>,
    send_fail_rx: mpsc::Receiver<SendFailProofMsg>,
}

impl ProofArranger {
    pub fn new(
        cfg: ArrangerConfig,
        store: Arc<dyn ProofStore>,
        final_proof_tx: mpsc::Sender<FinalProofMsg>,
        proof_hash_tx: mpsc::Sender<ProofHashMsg>,
        send_fail_rx: mpsc::Receiver<SendFailProofMsg>,
    ) -> Self {
        Self {
            cfg,
            store,
            final_proof_tx,
            proof_hash_tx,
            send_fail_rx,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Proof arranger started");

        if let Err(e) = self.submit_pending_proofs().await {
            warn!(error = %e, "Unable to replay pending proof submissions");
        }

        let mut next_batch_num: u64 = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                fail = self.send_fail_rx.recv() => {
                    if let Some(fail) = fail {
                        warn!(
                            from = fail.batch_number,
                            to = fail.batch_number_final,
                            "Commit-reveal round abandoned, rewinding"
                        );
                        next_batch_num = fail.batch_number;
                    }
                }
                _ = tokio::time::sleep(TICK) => {
                    match self.tick(next_batch_num).await {
                        Ok(Some(advanced_to)) => next_batch_num = advanced_to,
                        Ok(None) => {}
                        Err(e) => debug!(error = %e, "Arranger tick"),
                    }
                }
            }
        }
    }

    /// One steady-state step. Returns the new `next_batch_num` after an
    /// emission or fast-forward, `None` when there is nothing to do yet.
    async fn tick(&self, next_batch_num: u64) -> Result<Option<u64>> {
        let last_verified = match self.store.get_last_verified_batch().await {
            Ok(batch) => batch.batch_number,
            Err(AggregatorError::NotFound) => {
                debug!("Last verified batch not found, waiting for sync");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut next = next_batch_num;
        // Another aggregator may have verified past us; never re-emit below
        // the verified head.
        if last_verified >= next {
            next = last_verified + 1;
        }

        let msg = match self.fetch_proof_to_send(next).await {
            Ok(msg) => msg,
            Err(AggregatorError::NotFound) => {
                debug!(batch_num = next, "Waiting for final proof to be generated");
                return Ok(Some(next));
            }
            Err(AggregatorError::StateNotSynchronized) => {
                debug!(batch_num = next, "No newer sequences");
                return Ok(Some(next));
            }
            Err(e) => {
                warn!(batch_num = next, error = %e, "Failed to fetch final proof");
                return Ok(Some(next));
            }
        };

        let advanced_to = msg.recursive_proof.batch_number_final + 1;
        info!(
            monitored_id = %reveal_tx_id(
                msg.recursive_proof.batch_number,
                msg.recursive_proof.batch_number_final
            ),
            "Dispatching final proof to sender"
        );
        if self.final_proof_tx.send(msg).await.is_err() {
            return Err(AggregatorError::Cancelled);
        }
        Ok(Some(advanced_to))
    }

    async fn fetch_proof_to_send(&self, batch_num: u64) -> Result<FinalProofMsg> {
        let sequence = self.store.get_sequence(batch_num).await?;
        let monitored_id = reveal_tx_id(sequence.from_batch_number, sequence.to_batch_number);
        let record = self.store.get_final_proof_by_monitored_id(&monitored_id).await?;

        Ok(FinalProofMsg {
            prover_name: String::new(),
            prover_id: String::new(),
            recursive_proof: Proof {
                batch_number: sequence.from_batch_number,
                batch_number_final: sequence.to_batch_number,
                proof_id: Some(record.final_proof_id),
                ..Default::default()
            },
            final_proof: proto::FinalProof {
                proof: record.final_proof,
                public: None,
            },
        })
    }

    /// Boot replay: for every sequence above the last confirmed reveal whose
    /// commit tx exists, push the reconstructed proof-hash message so the
    /// two-phase round resumes at the reveal.
    async fn submit_pending_proofs(&self) -> Result<()> {
        let submitted_final = match self.store.get_last_proof_submission().await {
            Ok(monitored_id) => parse_reveal_tx_id(&monitored_id)?.1,
            Err(AggregatorError::NotFound) => 0,
            Err(e) => return Err(e),
        };

        let mut pending_batch = submitted_final + 1;
        loop {
            let sequence = match self.store.get_sequence(pending_batch).await {
                Ok(sequence) => sequence,
                Err(AggregatorError::StateNotSynchronized) | Err(AggregatorError::NotFound) => {
                    debug!("No newer sequence, pending proof replay complete");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let commit_id = commit_tx_id(sequence.from_batch_number, sequence.to_batch_number);
            if !self.store.have_monitored_tx(&commit_id).await? {
                debug!("No pending proof hash, pending proof replay complete");
                return Ok(());
            }

            let reveal_id = reveal_tx_id(sequence.from_batch_number, sequence.to_batch_number);
            let record = match self.store.get_final_proof_by_monitored_id(&reveal_id).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(monitored_id = %reveal_id, error = %e, "Committed hash without stored final proof");
                    return Ok(());
                }
            };

            let hash = proof_commitment_hash(&record.final_proof, self.cfg.sender_address);
            info!(monitored_id = %commit_id, "Replaying pending commit-reveal round");
            let msg = ProofHashMsg {
                hash,
                batch_number: sequence.from_batch_number,
                batch_number_final: sequence.to_batch_number,
                monitored_proof_hash_tx_id: commit_id,
            };
            if self.proof_hash_tx.send(msg).await.is_err() {
                return Err(AggregatorError::Cancelled);
            }

            pending_batch = sequence.to_batch_number + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use alloy::primitives::B256;
    use chrono::Utc;

    use crate::domain::{FinalProofRecord, Sequence, VerifiedBatch};
    use crate::infra::MockProofStore;

    fn record(monitored_id: &str, proof: &str) -> FinalProofRecord {
        FinalProofRecord {
            monitored_id: monitored_id.to_string(),
            final_proof: proof.to_string(),
            final_proof_id: "fp-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn verified(n: u64) -> VerifiedBatch {
        VerifiedBatch {
            block_number: 1,
            batch_number: n,
            aggregator: Address::ZERO,
            tx_hash: B256::ZERO,
            state_root: B256::ZERO,
        }
    }

    fn arranger_with(
        store: MockProofStore,
    ) -> (
        ProofArranger,
        mpsc::Receiver<FinalProofMsg>,
        mpsc::Receiver<ProofHashMsg>,
    ) {
        let (final_proof_tx, final_proof_rx) = mpsc::channel(16);
        let (proof_hash_tx, proof_hash_rx) = mpsc::channel(16);
        let (_send_fail_tx, send_fail_rx) = mpsc::channel(16);
        let arranger = ProofArranger::new(
            ArrangerConfig {
                sender_address: Address::ZERO,
            },
            Arc::new(store),
            final_proof_tx,
            proof_hash_tx,
            send_fail_rx,
        );
        (arranger, final_proof_rx, proof_hash_rx)
    }

    #[tokio::test]
    async fn emits_sequences_in_order() {
        let mut store = MockProofStore::new();
        store
            .expect_get_last_verified_batch()
            .returning(|| Ok(verified(0)));
        store.expect_get_sequence().returning(|n| match n {
            1..=3 => Ok(Sequence::new(1, 3)),
            4..=6 => Ok(Sequence::new(4, 6)),
            _ => Err(AggregatorError::StateNotSynchronized),
        });
        store
            .expect_get_final_proof_by_monitored_id()
            .returning(|id| Ok(record(id, "{\"wrapped\":1}")));

        let (arranger, mut final_proof_rx, _hash_rx) = arranger_with(store);

        let next = arranger.tick(0).await.unwrap().unwrap();
        assert_eq!(next, 4);
        let next = arranger.tick(next).await.unwrap().unwrap();
        assert_eq!(next, 7);
        // nothing sequenced past batch 6 yet
        let next = arranger.tick(next).await.unwrap().unwrap();
        assert_eq!(next, 7);

        let first = final_proof_rx.try_recv().unwrap();
        let second = final_proof_rx.try_recv().unwrap();
        assert_eq!(first.recursive_proof.batch_number_final, 3);
        assert_eq!(second.recursive_proof.batch_number_final, 6);
        assert!(
            first.recursive_proof.batch_number_final
                < second.recursive_proof.batch_number_final
        );
        assert!(final_proof_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn waits_when_final_proof_is_missing() {
        let mut store = MockProofStore::new();
        store
            .expect_get_last_verified_batch()
            .returning(|| Ok(verified(0)));
        store
            .expect_get_sequence()
            .returning(|_| Ok(Sequence::new(1, 3)));
        store
            .expect_get_final_proof_by_monitored_id()
            .returning(|_| Err(AggregatorError::NotFound));

        let (arranger, mut final_proof_rx, _hash_rx) = arranger_with(store);

        let next = arranger.tick(0).await.unwrap().unwrap();
        assert_eq!(next, 1);
        assert!(final_proof_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fast_forwards_past_externally_verified_batches() {
        let mut store = MockProofStore::new();
        store
            .expect_get_last_verified_batch()
            .returning(|| Ok(verified(6)));
        store.expect_get_sequence().returning(|n| {
            assert_eq!(n, 7);
            Err(AggregatorError::StateNotSynchronized)
        });

        let (arranger, mut final_proof_rx, _hash_rx) = arranger_with(store);
        let next = arranger.tick(1).await.unwrap().unwrap();
        assert_eq!(next, 7);
        assert!(final_proof_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn boot_replay_resumes_committed_rounds() {
        let mut store = MockProofStore::new();
        store
            .expect_get_last_proof_submission()
            .returning(|| Ok("proof-from-1-to-3".to_string()));
        store.expect_get_sequence().returning(|n| match n {
            4 => Ok(Sequence::new(4, 6)),
            _ => Err(AggregatorError::StateNotSynchronized),
        });
        store
            .expect_have_monitored_tx()
            .withf(|id| id == "proof-hash-from-4-to-6")
            .returning(|_| Ok(true));
        store
            .expect_get_final_proof_by_monitored_id()
            .withf(|id| id == "proof-from-4-to-6")
            .returning(|id| Ok(record(id, "{\"wrapped\":4}")));

        let (arranger, _final_rx, mut hash_rx) = arranger_with(store);
        arranger.submit_pending_proofs().await.unwrap();

        let queued = hash_rx.try_recv().unwrap();
        assert_eq!(queued.batch_number, 4);
        assert_eq!(queued.batch_number_final, 6);
        assert_eq!(queued.monitored_proof_hash_tx_id, "proof-hash-from-4-to-6");
        assert_eq!(
            queued.hash,
            proof_commitment_hash("{\"wrapped\":4}", Address::ZERO)
        );
        assert!(hash_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn boot_replay_stops_without_committed_hash() {
        let mut store = MockProofStore::new();
        store
            .expect_get_last_proof_submission()
            .returning(|| Err(AggregatorError::NotFound));
        store
            .expect_get_sequence()
            .returning(|_| Ok(Sequence::new(1, 3)));
        store.expect_have_monitored_tx().returning(|_| Ok(false));

        let (arranger, _final_rx, mut hash_rx) = arranger_with(store);
        arranger.submit_pending_proofs().await.unwrap();
        assert!(hash_rx.try_recv().is_err());
    }
}
