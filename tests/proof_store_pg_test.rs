//! PostgreSQL proof store integration tests.
//!
//! These run against a real database and are skipped unless `DATABASE_URL`
//! is set. The two tests touch disjoint tables so they can run in parallel.

mod common;

use std::time::Duration;

use alloy::primitives::B256;
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use common::{batch, proof, test_sender, verified_batch};
use zkevm_aggregator::crypto::proof_commitment_hash;
use zkevm_aggregator::infra::{PgProofStore, PgTxMonitor};
use zkevm_aggregator::{AggregatorError, L1TxMonitor, ProofStore, ProverProof};

const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

async fn pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("failed to connect to test database");
    zkevm_aggregator::migrations::run_postgres(&pool)
        .await
        .expect("failed to run migrations");
    Some(pool)
}

async fn seed_batches(pool: &PgPool, upto: u64) {
    for n in 0..=upto {
        let b = batch(n);
        sqlx::query(
            r#"
            INSERT INTO batch (batch_number, coinbase, batch_l2_data, state_root,
                               local_exit_root, acc_input_hash, global_exit_root,
                               timestamp, virtualized)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)
            ON CONFLICT (batch_number) DO NOTHING
            "#,
        )
        .bind(n as i64)
        .bind(b.coinbase.to_string())
        .bind(&b.batch_l2_data)
        .bind(b.state_root.to_string())
        .bind(b.local_exit_root.to_string())
        .bind(b.acc_input_hash.to_string())
        .bind(b.global_exit_root.to_string())
        .bind(b.timestamp)
        .execute(pool)
        .await
        .unwrap();
    }
}

async fn seed_sequence(pool: &PgPool, from: u64, to: u64) {
    sqlx::query(
        r#"
        INSERT INTO sequence (from_batch_number, to_batch_number)
        VALUES ($1, $2)
        ON CONFLICT (from_batch_number) DO NOTHING
        "#,
    )
    .bind(from as i64)
    .bind(to as i64)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn proof_row_lifecycle() {
    let Some(pool) = pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    sqlx::query("TRUNCATE proof, sequence, batch, verified_batch")
        .execute(&pool)
        .await
        .unwrap();

    seed_batches(&pool, 3).await;
    seed_sequence(&pool, 1, 2).await;
    seed_sequence(&pool, 3, 3).await;

    let store = PgProofStore::new(pool.clone());

    // no verified batch yet
    assert!(matches!(
        store.get_last_verified_batch().await,
        Err(AggregatorError::NotFound)
    ));

    store.add_generated_proof(&proof(1, 1)).await.unwrap();
    // at most one row per range
    assert!(matches!(
        store.add_generated_proof(&proof(1, 1)).await,
        Err(AggregatorError::Conflict(_))
    ));
    store.add_generated_proof(&proof(2, 2)).await.unwrap();

    // adjacent unlocked pair with the lowest starting batch
    let (p1, p2) = store.get_proofs_to_aggregate().await.unwrap();
    assert_eq!(
        (p1.batch_number, p2.batch_number, p1.batch_number_final + 1),
        (1, 2, p2.batch_number)
    );

    // leasing both hides the pair from other workers
    store
        .set_proof_pair_generating(&p1, &p2, Some(chrono::Utc::now()))
        .await
        .unwrap();
    assert!(matches!(
        store.get_proofs_to_aggregate().await,
        Err(AggregatorError::NotFound)
    ));

    // the janitor reclaims expired leases
    let unlocked = store.cleanup_locked_proofs(Duration::ZERO).await.unwrap();
    assert_eq!(unlocked, 2);

    // aggregation swap: two rows out, one in, atomically
    let mut aggregate = proof(1, 2);
    aggregate.generating_since = Some(chrono::Utc::now());
    store
        .replace_aggregated_proofs(1, 2, &aggregate)
        .await
        .unwrap();
    assert!(matches!(
        store.get_proofs_to_aggregate().await,
        Err(AggregatorError::NotFound)
    ));

    aggregate.generating_since = None;
    store.update_generated_proof(&aggregate).await.unwrap();

    // ready to verify once it covers lastVerified + 1
    let ready = store.get_proof_ready_to_verify(0).await.unwrap();
    assert_eq!((ready.batch_number, ready.batch_number_final), (1, 2));

    // sequence tiling
    assert!(store
        .check_proof_contains_complete_sequences(&ready)
        .await
        .unwrap());
    let partial = proof(1, 1);
    assert!(!store
        .check_proof_contains_complete_sequences(&partial)
        .await
        .unwrap());

    // the lowest unproven virtualized batch above the head
    let to_prove = store.get_virtual_batch_to_prove(0).await.unwrap();
    assert_eq!(to_prove.batch_number, 3);

    assert_eq!(store.get_sequence(2).await.unwrap().from_batch_number, 1);
    assert!(matches!(
        store.get_sequence(9).await,
        Err(AggregatorError::StateNotSynchronized)
    ));

    // verified head drives cleanup
    let verified = verified_batch(2, 77);
    sqlx::query(
        r#"
        INSERT INTO verified_batch (block_number, batch_number, aggregator, tx_hash, state_root)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(verified.block_number as i64)
    .bind(verified.batch_number as i64)
    .bind(verified.aggregator.to_string())
    .bind(verified.tx_hash.to_string())
    .bind(verified.state_root.to_string())
    .execute(&pool)
    .await
    .unwrap();
    assert_eq!(
        store.get_last_verified_batch().await.unwrap().batch_number,
        2
    );

    store.cleanup_generated_proofs(2).await.unwrap();
    assert!(matches!(
        store.get_proof_ready_to_verify(0).await,
        Err(AggregatorError::NotFound)
    ));
}

#[tokio::test]
async fn commit_reveal_tables() {
    let Some(pool) = pool().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    sqlx::query("TRUNCATE prover_proof, final_proof, proof_hash, monitored_txs")
        .execute(&pool)
        .await
        .unwrap();

    let store = PgProofStore::new(pool.clone());
    let sender = test_sender();
    let hash = proof_commitment_hash("{\"wrapped\":1}", sender);

    // prover proof: idempotent on (hash, final batch)
    let prover_proof = ProverProof {
        init_num_batch: 4,
        final_new_batch: 6,
        new_state_root: B256::repeat_byte(1),
        local_exit_root: B256::repeat_byte(2),
        proof: "{\"wrapped\":1}".to_string(),
        proof_hash: hash,
    };
    store.add_prover_proof(&prover_proof).await.unwrap();
    store.add_prover_proof(&prover_proof).await.unwrap();
    let loaded = store.get_prover_proof_by_hash(hash, 6).await.unwrap();
    assert_eq!(loaded.init_num_batch, 4);
    assert_eq!(loaded.proof_hash, hash);
    assert!(matches!(
        store.get_prover_proof_by_hash(hash, 7).await,
        Err(AggregatorError::NotFound)
    ));

    // final proof: upsert on monitored id
    let mut record = zkevm_aggregator::FinalProofRecord {
        monitored_id: "proof-from-4-to-6".to_string(),
        final_proof: "{\"wrapped\":1}".to_string(),
        final_proof_id: "fp-1".to_string(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    store.add_final_proof(&record).await.unwrap();
    record.final_proof_id = "fp-2".to_string();
    store.add_final_proof(&record).await.unwrap();
    let loaded = store
        .get_final_proof_by_monitored_id("proof-from-4-to-6")
        .await
        .unwrap();
    assert_eq!(loaded.final_proof_id, "fp-2");

    // proof hash commits mirrored from L1
    assert!(matches!(
        store.get_proof_hash_by_sender(sender, 6, 3, 100).await,
        Err(AggregatorError::ProofNotCommit)
    ));
    sqlx::query(
        r#"
        INSERT INTO proof_hash (id, block_num, sender, init_num_batch, final_new_batch, proof_hash)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(90i64)
    .bind(sender.to_string())
    .bind(4i64)
    .bind(6i64)
    .bind(hash.to_string())
    .execute(&pool)
    .await
    .unwrap();
    // matured past the hash epoch
    assert_eq!(
        store.get_proof_hash_by_sender(sender, 6, 3, 100).await.unwrap(),
        hash
    );
    // not matured yet
    assert!(matches!(
        store.get_proof_hash_by_sender(sender, 6, 3, 92).await,
        Err(AggregatorError::ProofNotCommit)
    ));

    // monitored txs
    let monitor = PgTxMonitor::new(pool.clone(), "http://localhost:8545".to_string(), ANVIL_KEY)
        .unwrap();
    monitor
        .add("proof-hash-from-4-to-6", sender, sender, vec![1, 2, 3])
        .await
        .unwrap();
    monitor
        .add("proof-from-4-to-6", sender, sender, vec![4, 5, 6])
        .await
        .unwrap();
    assert!(store.have_monitored_tx("proof-hash-from-4-to-6").await.unwrap());
    assert!(!store.have_monitored_tx("proof-hash-from-7-to-9").await.unwrap());

    // only confirmed reveals count as submissions
    assert!(matches!(
        store.get_last_proof_submission().await,
        Err(AggregatorError::NotFound)
    ));
    sqlx::query("UPDATE monitored_txs SET status = 'confirmed' WHERE id = 'proof-from-4-to-6'")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(
        store.get_last_proof_submission().await.unwrap(),
        "proof-from-4-to-6"
    );

    // retiring frees the id for a retry
    monitor.update_tx_id("proof-hash-from-4-to-6").await.unwrap();
    assert!(!store.have_monitored_tx("proof-hash-from-4-to-6").await.unwrap());
}
