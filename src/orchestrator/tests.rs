use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::Utc;

use crate::domain::{Batch, FinalProofRecord, Proof, Sequence, VerifiedBatch};
use crate::infra::{
    AcceptAllProfitabilityChecker, AggregatorError, MockL1Client, MockProofStore,
    ProfitabilityChecker,
};
use crate::prover::MockProverSession;
use crate::proto;

use super::*;

fn orchestrator_with(
    store: MockProofStore,
    l1: MockL1Client,
    start_sequence: Option<Sequence>,
) -> Orchestrator {
    Orchestrator::new(
        OrchestratorConfig {
            sender_address: Address::ZERO,
            chain_id: 1101,
            fork_id: 6,
            retry_time: Duration::from_millis(10),
        },
        Arc::new(store),
        Arc::new(l1),
        Arc::new(AcceptAllProfitabilityChecker) as Arc<dyn ProfitabilityChecker>,
        start_sequence,
    )
}

fn proof(from: u64, to: u64, bytes: &str) -> Proof {
    Proof {
        batch_number: from,
        batch_number_final: to,
        proof: bytes.to_string(),
        ..Default::default()
    }
}

fn batch(n: u64) -> Batch {
    Batch {
        batch_number: n,
        coinbase: Address::ZERO,
        batch_l2_data: vec![n as u8],
        state_root: alloy::primitives::B256::repeat_byte(n as u8),
        local_exit_root: alloy::primitives::B256::repeat_byte(0x10 + n as u8),
        acc_input_hash: alloy::primitives::B256::repeat_byte(0x20 + n as u8),
        global_exit_root: alloy::primitives::B256::repeat_byte(0x30 + n as u8),
        timestamp: Utc::now(),
    }
}

fn verified(n: u64) -> VerifiedBatch {
    VerifiedBatch {
        block_number: 1,
        batch_number: n,
        aggregator: Address::ZERO,
        tx_hash: alloy::primitives::B256::ZERO,
        state_root: alloy::primitives::B256::ZERO,
    }
}

fn final_proof_record(monitored_id: &str) -> FinalProofRecord {
    FinalProofRecord {
        monitored_id: monitored_id.to_string(),
        final_proof: "{\"wrapped\":1}".to_string(),
        final_proof_id: "fp-1".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

mod eligibility {
    use super::*;

    #[tokio::test]
    async fn adjacent_proof_with_complete_sequences_is_eligible() {
        let mut store = MockProofStore::new();
        store
            .expect_check_proof_contains_complete_sequences()
            .returning(|_| Ok(true));
        let orch = orchestrator_with(store, MockL1Client::new(), None);

        let result = orch
            .validate_eligible_final_proof(&proof(1, 1, "{}"), 0)
            .await
            .unwrap();
        assert_eq!(result, Eligibility::Eligible);
    }

    #[tokio::test]
    async fn proof_containing_next_batch_is_eligible() {
        let mut store = MockProofStore::new();
        store
            .expect_check_proof_contains_complete_sequences()
            .returning(|_| Ok(true));
        let orch = orchestrator_with(store, MockL1Client::new(), None);

        // starts below the verified head but still covers batch 3
        let result = orch
            .validate_eligible_final_proof(&proof(1, 5, "{}"), 2)
            .await
            .unwrap();
        assert_eq!(result, Eligibility::Eligible);
    }

    #[tokio::test]
    async fn proof_below_verified_head_is_discarded() {
        let orch = orchestrator_with(MockProofStore::new(), MockL1Client::new(), None);

        let result = orch
            .validate_eligible_final_proof(&proof(1, 3, "{}"), 5)
            .await
            .unwrap();
        assert_eq!(result, Eligibility::Discard);
    }

    #[tokio::test]
    async fn proof_ahead_of_next_batch_is_deferred() {
        let orch = orchestrator_with(MockProofStore::new(), MockL1Client::new(), None);

        let result = orch
            .validate_eligible_final_proof(&proof(8, 9, "{}"), 5)
            .await
            .unwrap();
        assert_eq!(result, Eligibility::Defer);
    }

    #[tokio::test]
    async fn incomplete_sequences_defer() {
        let mut store = MockProofStore::new();
        store
            .expect_check_proof_contains_complete_sequences()
            .returning(|_| Ok(false));
        let orch = orchestrator_with(store, MockL1Client::new(), None);

        let result = orch
            .validate_eligible_final_proof(&proof(1, 1, "{}"), 0)
            .await
            .unwrap();
        assert_eq!(result, Eligibility::Defer);
    }
}

mod aggregation {
    use super::*;

    fn session() -> MockProverSession {
        let mut session = MockProverSession::new();
        session.expect_name().return_const("prover-1".to_owned());
        session.expect_id().return_const("id-1".to_owned());
        session.expect_addr().return_const("1.2.3.4:5".to_owned());
        session
    }

    #[tokio::test]
    async fn aggregates_adjacent_pair_and_promotes_to_final() {
        let mut store = MockProofStore::new();
        let p1 = proof(1, 1, "{\"p\":1}");
        let p2 = proof(2, 2, "{\"p\":2}");

        {
            let (p1, p2) = (p1.clone(), p2.clone());
            store
                .expect_get_proofs_to_aggregate()
                .times(1)
                .returning(move || Ok((p1.clone(), p2.clone())));
        }
        store
            .expect_set_proof_pair_generating()
            .withf(|p1, p2, since| {
                p1.batch_number == 1 && p2.batch_number == 2 && since.is_some()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        // pre-check and candidate check both miss
        store
            .expect_get_final_proof_by_monitored_id()
            .withf(|id| id == "proof-from-1-to-2")
            .times(2)
            .returning(|_| Err(AggregatorError::NotFound));
        // the swap: both inputs deleted, the aggregate inserted, still leased
        store
            .expect_replace_aggregated_proofs()
            .withf(|from, to, proof| {
                *from == 1
                    && *to == 2
                    && proof.batch_number == 1
                    && proof.batch_number_final == 2
                    && proof.proof == "{\"agg\":1}"
                    && proof.generating_since.is_some()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_get_last_verified_batch()
            .returning(|| Err(AggregatorError::NotFound));
        store
            .expect_check_proof_contains_complete_sequences()
            .returning(|_| Ok(true));
        store
            .expect_add_final_proof()
            .withf(|record| record.monitored_id == "proof-from-1-to-2")
            .times(1)
            .returning(|_| Ok(()));

        let mut session = session();
        session
            .expect_aggregated_proof()
            .withf(|a, b| a == "{\"p\":1}" && b == "{\"p\":2}")
            .times(1)
            .returning(|_, _| Ok("agg-id".to_string()));
        session
            .expect_wait_recursive_proof()
            .withf(|id| id == "agg-id")
            .times(1)
            .returning(|_| Ok("{\"agg\":1}".to_string()));
        session
            .expect_final_proof()
            .times(1)
            .returning(|_, _| Ok("final-id".to_string()));
        session
            .expect_wait_final_proof()
            .withf(|id| id == "final-id")
            .times(1)
            .returning(|_| {
                Ok(proto::FinalProof {
                    proof: "{\"wrapped\":1}".to_string(),
                    public: None,
                })
            });

        let orch = orchestrator_with(store, MockL1Client::new(), None);
        let worked = orch.try_aggregate_proofs(&session).await.unwrap();
        assert!(worked);
    }

    #[tokio::test]
    async fn nothing_to_aggregate_is_not_an_error() {
        let mut store = MockProofStore::new();
        store
            .expect_get_proofs_to_aggregate()
            .returning(|| Err(AggregatorError::NotFound));
        let orch = orchestrator_with(store, MockL1Client::new(), None);

        let worked = orch.try_aggregate_proofs(&session()).await.unwrap();
        assert!(!worked);
    }

    #[tokio::test]
    async fn invalid_json_input_is_deleted() {
        let mut store = MockProofStore::new();
        let p1 = proof(1, 1, "not json");
        let p2 = proof(2, 2, "{\"p\":2}");
        {
            let (p1, p2) = (p1.clone(), p2.clone());
            store
                .expect_get_proofs_to_aggregate()
                .returning(move || Ok((p1.clone(), p2.clone())));
        }
        store
            .expect_set_proof_pair_generating()
            .returning(|_, _, _| Ok(()));
        store
            .expect_get_final_proof_by_monitored_id()
            .returning(|_| Err(AggregatorError::NotFound));
        store
            .expect_delete_generated_proofs()
            .withf(|from, to| *from == 1 && *to == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        // the healthy proof is released by a detached task
        store
            .expect_update_generated_proof()
            .withf(|p| p.batch_number == 2 && p.generating_since.is_none())
            .returning(|_| Ok(()));

        let orch = orchestrator_with(store, MockL1Client::new(), None);
        let worked = orch.try_aggregate_proofs(&session()).await.unwrap();
        assert!(!worked);
        // let the detached unlock run
        tokio::task::yield_now().await;
    }
}

mod batch_proving {
    use super::*;

    fn session() -> MockProverSession {
        let mut session = MockProverSession::new();
        session.expect_name().return_const("prover-1".to_owned());
        session.expect_id().return_const("id-1".to_owned());
        session.expect_addr().return_const("1.2.3.4:5".to_owned());
        session
    }

    #[tokio::test]
    async fn generates_batch_proof_and_promotes_to_final() {
        let mut store = MockProofStore::new();

        store
            .expect_get_last_verified_batch()
            .returning(|| Err(AggregatorError::NotFound));
        store
            .expect_get_virtual_batch_to_prove()
            .withf(|after| *after == 0)
            .times(1)
            .returning(|_| Ok(batch(1)));
        store
            .expect_add_generated_proof()
            .withf(|p| {
                p.batch_number == 1 && p.batch_number_final == 1 && p.generating_since.is_some()
            })
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_get_batch_by_number()
            .withf(|n| *n == 0)
            .returning(|_| Ok(batch(0)));
        store
            .expect_get_sequence()
            .withf(|n| *n == 1)
            .returning(|_| Ok(Sequence::new(1, 1)));
        store
            .expect_get_final_proof_by_monitored_id()
            .withf(|id| id == "proof-from-1-to-1")
            .times(2)
            .returning(|_| Err(AggregatorError::NotFound));
        store
            .expect_update_generated_proof()
            .withf(|p| p.proof == "{\"p\":1}" && p.generating_since.is_some())
            .times(1)
            .returning(|_| Ok(()));
        store
            .expect_check_proof_contains_complete_sequences()
            .returning(|_| Ok(true));
        store
            .expect_add_final_proof()
            .withf(|record| record.monitored_id == "proof-from-1-to-1")
            .times(1)
            .returning(|_| Ok(()));

        let mut session = session();
        session
            .expect_batch_proof()
            .withf(|input| {
                let public = input.public_inputs.as_ref().unwrap();
                public.old_batch_num == 0 && public.chain_id == 1101 && public.fork_id == 6
            })
            .times(1)
            .returning(|_| Ok("batch-id".to_string()));
        session
            .expect_wait_recursive_proof()
            .withf(|id| id == "batch-id")
            .times(1)
            .returning(|_| Ok("{\"p\":1}".to_string()));
        session
            .expect_final_proof()
            .times(1)
            .returning(|_, _| Ok("final-id".to_string()));
        session
            .expect_wait_final_proof()
            .times(1)
            .returning(|_| {
                Ok(proto::FinalProof {
                    proof: "{\"wrapped\":1}".to_string(),
                    public: None,
                })
            });

        let orch = orchestrator_with(store, MockL1Client::new(), None);
        let worked = orch.try_generate_batch_proof(&session).await.unwrap();
        assert!(worked);
    }

    #[tokio::test]
    async fn prover_failure_deletes_claimed_proof() {
        let mut store = MockProofStore::new();
        store
            .expect_get_last_verified_batch()
            .returning(|| Ok(verified(0)));
        store
            .expect_get_virtual_batch_to_prove()
            .returning(|_| Ok(batch(1)));
        store.expect_add_generated_proof().returning(|_| Ok(()));
        store
            .expect_get_batch_by_number()
            .returning(|_| Ok(batch(0)));
        store
            .expect_get_sequence()
            .returning(|_| Ok(Sequence::new(1, 1)));
        store
            .expect_get_final_proof_by_monitored_id()
            .returning(|_| Err(AggregatorError::NotFound));
        store
            .expect_delete_generated_proofs()
            .withf(|from, to| *from == 1 && *to == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut session = session();
        session
            .expect_batch_proof()
            .returning(|_| Err(AggregatorError::Prover("boom".to_string())));

        let orch = orchestrator_with(store, MockL1Client::new(), None);
        let result = orch.try_generate_batch_proof(&session).await;
        assert!(matches!(result, Err(AggregatorError::Prover(_))));
        tokio::task::yield_now().await;
    }
}

mod verify_progression {
    use super::*;

    #[tokio::test]
    async fn candidate_below_head_is_deleted() {
        let mut store = MockProofStore::new();
        store
            .expect_get_final_proof_by_monitored_id()
            .returning(|_| Err(AggregatorError::NotFound));
        store
            .expect_get_last_verified_batch()
            .returning(|| Ok(verified(5)));
        store
            .expect_delete_generated_proofs()
            .withf(|from, to| *from == 1 && *to == 3)
            .times(1)
            .returning(|_, _| Ok(()));

        let orch = orchestrator_with(store, MockL1Client::new(), None);
        let session = MockProverSession::new();
        let built = orch
            .try_build_final_proof(&session, Some(proof(1, 3, "{}")))
            .await
            .unwrap();
        assert!(!built);
    }

    #[tokio::test]
    async fn existing_final_proof_short_circuits() {
        let mut store = MockProofStore::new();
        store
            .expect_get_final_proof_by_monitored_id()
            .withf(|id| id == "proof-from-1-to-3")
            .returning(|id| Ok(final_proof_record(id)));

        let orch = orchestrator_with(store, MockL1Client::new(), None);
        let session = MockProverSession::new();
        let built = orch
            .try_build_final_proof(&session, Some(proof(1, 3, "{}")))
            .await
            .unwrap();
        assert!(built);
    }
}
