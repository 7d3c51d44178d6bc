//! PostgreSQL proof store.
//!
//! Owns the `proof`, `prover_proof`, `final_proof` tables and reads the
//! synchronizer mirrors (`batch`, `sequence`, `verified_batch`, `proof_hash`).
//!
//! # Atomicity
//!
//! Row exclusivity is a timestamp lease (`generating_since`); the janitor
//! reclaims stale leases. Every multi-row mutation (pair lock/unlock, the
//! aggregation swap) runs in a single transaction, so no reader ever observes
//! overlapping live ranges.

use std::time::Duration;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{
    parse_reveal_tx_id, Batch, FinalProofRecord, Proof, ProverProof, Sequence, VerifiedBatch,
};
use crate::infra::{AggregatorError, ProofStore, Result};

/// PostgreSQL-backed [`ProofStore`].
pub struct PgProofStore {
    pool: PgPool,
}

impl PgProofStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn get_proof(&self, batch_number: u64, batch_number_final: u64) -> Result<Proof> {
        let row = sqlx::query(
            r#"
            SELECT batch_number, batch_number_final, proof, proof_id, prover, prover_id,
                   input_prover, generating_since
            FROM proof
            WHERE batch_number = $1 AND batch_number_final = $2
            "#,
        )
        .bind(batch_number as i64)
        .bind(batch_number_final as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_proof).ok_or(AggregatorError::NotFound)
    }
}

#[async_trait]
impl ProofStore for PgProofStore {
    async fn get_proofs_to_aggregate(&self) -> Result<(Proof, Proof)> {
        let pair = sqlx::query(
            r#"
            SELECT p1.batch_number AS b1, p1.batch_number_final AS f1,
                   p2.batch_number AS b2, p2.batch_number_final AS f2
            FROM proof p1
            JOIN proof p2 ON p2.batch_number = p1.batch_number_final + 1
            WHERE p1.generating_since IS NULL AND p2.generating_since IS NULL
              AND p1.proof <> '' AND p2.proof <> ''
            ORDER BY p1.batch_number
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AggregatorError::NotFound)?;

        let proof1 = self
            .get_proof(pair.get::<i64, _>("b1") as u64, pair.get::<i64, _>("f1") as u64)
            .await?;
        let proof2 = self
            .get_proof(pair.get::<i64, _>("b2") as u64, pair.get::<i64, _>("f2") as u64)
            .await?;
        Ok((proof1, proof2))
    }

    async fn set_proof_pair_generating(
        &self,
        proof1: &Proof,
        proof2: &Proof,
        generating_since: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for proof in [proof1, proof2] {
            sqlx::query(
                r#"
                UPDATE proof SET generating_since = $3
                WHERE batch_number = $1 AND batch_number_final = $2
                "#,
            )
            .bind(proof.batch_number as i64)
            .bind(proof.batch_number_final as i64)
            .bind(generating_since)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_proof_ready_to_verify(&self, last_verified_batch: u64) -> Result<Proof> {
        let expected = (last_verified_batch + 1) as i64;
        let row = sqlx::query(
            r#"
            SELECT batch_number, batch_number_final, proof, proof_id, prover, prover_id,
                   input_prover, generating_since
            FROM proof
            WHERE generating_since IS NULL AND proof <> ''
              AND batch_number <= $1 AND batch_number_final >= $1
            ORDER BY batch_number
            LIMIT 1
            "#,
        )
        .bind(expected)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_proof).ok_or(AggregatorError::NotFound)
    }

    async fn get_virtual_batch_to_prove(&self, after_batch: u64) -> Result<Batch> {
        let row = sqlx::query(
            r#"
            SELECT b.batch_number, b.coinbase, b.batch_l2_data, b.state_root,
                   b.local_exit_root, b.acc_input_hash, b.global_exit_root, b.timestamp
            FROM batch b
            WHERE b.batch_number > $1 AND b.virtualized
              AND NOT EXISTS (
                  SELECT 1 FROM proof p
                  WHERE b.batch_number BETWEEN p.batch_number AND p.batch_number_final
              )
            ORDER BY b.batch_number
            LIMIT 1
            "#,
        )
        .bind(after_batch as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(AggregatorError::NotFound).and_then(row_to_batch)
    }

    async fn get_batch_by_number(&self, batch_number: u64) -> Result<Batch> {
        let row = sqlx::query(
            r#"
            SELECT batch_number, coinbase, batch_l2_data, state_root, local_exit_root,
                   acc_input_hash, global_exit_root, timestamp
            FROM batch
            WHERE batch_number = $1
            "#,
        )
        .bind(batch_number as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(AggregatorError::NotFound).and_then(row_to_batch)
    }

    async fn add_generated_proof(&self, proof: &Proof) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO proof (batch_number, batch_number_final, proof, proof_id, prover,
                               prover_id, input_prover, generating_since)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(proof.batch_number as i64)
        .bind(proof.batch_number_final as i64)
        .bind(&proof.proof)
        .bind(&proof.proof_id)
        .bind(&proof.prover)
        .bind(&proof.prover_id)
        .bind(&proof.input_prover)
        .bind(proof.generating_since)
        .execute(&self.pool)
        .await
        .map_err(|e| AggregatorError::from_sqlx(e, &format!("proof {}", proof.batch_range())))?;
        Ok(())
    }

    async fn update_generated_proof(&self, proof: &Proof) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE proof
            SET proof = $3, proof_id = $4, prover = $5, prover_id = $6,
                input_prover = $7, generating_since = $8
            WHERE batch_number = $1 AND batch_number_final = $2
            "#,
        )
        .bind(proof.batch_number as i64)
        .bind(proof.batch_number_final as i64)
        .bind(&proof.proof)
        .bind(&proof.proof_id)
        .bind(&proof.prover)
        .bind(&proof.prover_id)
        .bind(&proof.input_prover)
        .bind(proof.generating_since)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_generated_proofs(
        &self,
        batch_number: u64,
        batch_number_final: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM proof
            WHERE batch_number >= $1 AND batch_number_final <= $2
            "#,
        )
        .bind(batch_number as i64)
        .bind(batch_number_final as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_ungenerated_proofs(&self) -> Result<()> {
        sqlx::query("DELETE FROM proof WHERE generating_since IS NOT NULL AND proof = ''")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_aggregated_proofs(
        &self,
        batch_number: u64,
        batch_number_final: u64,
        proof: &Proof,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM proof
            WHERE batch_number >= $1 AND batch_number_final <= $2
            "#,
        )
        .bind(batch_number as i64)
        .bind(batch_number_final as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO proof (batch_number, batch_number_final, proof, proof_id, prover,
                               prover_id, input_prover, generating_since)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(proof.batch_number as i64)
        .bind(proof.batch_number_final as i64)
        .bind(&proof.proof)
        .bind(&proof.proof_id)
        .bind(&proof.prover)
        .bind(&proof.prover_id)
        .bind(&proof.input_prover)
        .bind(proof.generating_since)
        .execute(&mut *tx)
        .await
        .map_err(|e| AggregatorError::from_sqlx(e, &format!("proof {}", proof.batch_range())))?;

        tx.commit().await?;
        Ok(())
    }

    async fn cleanup_generated_proofs(&self, upto_batch: u64) -> Result<()> {
        sqlx::query("DELETE FROM proof WHERE batch_number_final <= $1")
            .bind(upto_batch as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup_locked_proofs(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| AggregatorError::Internal(e.to_string()))?;
        let result = sqlx::query(
            "UPDATE proof SET generating_since = NULL WHERE generating_since < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn check_proof_contains_complete_sequences(&self, proof: &Proof) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            SELECT from_batch_number, to_batch_number
            FROM sequence
            WHERE from_batch_number >= $1 AND from_batch_number <= $2
            ORDER BY from_batch_number
            "#,
        )
        .bind(proof.batch_number as i64)
        .bind(proof.batch_number_final as i64)
        .fetch_all(&self.pool)
        .await?;

        let sequences: Vec<Sequence> = rows
            .into_iter()
            .map(|r| {
                Sequence::new(
                    r.get::<i64, _>("from_batch_number") as u64,
                    r.get::<i64, _>("to_batch_number") as u64,
                )
            })
            .collect();

        Ok(sequences_tile_range(
            &sequences,
            proof.batch_number,
            proof.batch_number_final,
        ))
    }

    async fn get_last_verified_batch(&self) -> Result<VerifiedBatch> {
        let row = sqlx::query(
            r#"
            SELECT block_number, batch_number, aggregator, tx_hash, state_root
            FROM verified_batch
            ORDER BY batch_number DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AggregatorError::NotFound)?;

        Ok(VerifiedBatch {
            block_number: row.get::<i64, _>("block_number") as u64,
            batch_number: row.get::<i64, _>("batch_number") as u64,
            aggregator: parse_address(row.get("aggregator"))?,
            tx_hash: parse_b256(row.get("tx_hash"))?,
            state_root: parse_b256(row.get("state_root"))?,
        })
    }

    async fn get_sequence(&self, batch_number: u64) -> Result<Sequence> {
        let row = sqlx::query(
            r#"
            SELECT from_batch_number, to_batch_number
            FROM sequence
            WHERE from_batch_number <= $1 AND to_batch_number >= $1
            LIMIT 1
            "#,
        )
        .bind(batch_number as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AggregatorError::StateNotSynchronized)?;

        Ok(Sequence::new(
            row.get::<i64, _>("from_batch_number") as u64,
            row.get::<i64, _>("to_batch_number") as u64,
        ))
    }

    async fn add_prover_proof(&self, prover_proof: &ProverProof) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prover_proof (id, init_num_batch, final_new_batch, local_exit_root,
                                      new_state_root, proof, proof_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (proof_hash, final_new_batch) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(prover_proof.init_num_batch as i64)
        .bind(prover_proof.final_new_batch as i64)
        .bind(prover_proof.local_exit_root.to_string())
        .bind(prover_proof.new_state_root.to_string())
        .bind(&prover_proof.proof)
        .bind(prover_proof.proof_hash.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_prover_proof_by_hash(
        &self,
        proof_hash: B256,
        batch_number_final: u64,
    ) -> Result<ProverProof> {
        let row = sqlx::query(
            r#"
            SELECT init_num_batch, final_new_batch, local_exit_root, new_state_root,
                   proof, proof_hash
            FROM prover_proof
            WHERE proof_hash = $1 AND final_new_batch = $2
            "#,
        )
        .bind(proof_hash.to_string())
        .bind(batch_number_final as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AggregatorError::NotFound)?;

        Ok(ProverProof {
            init_num_batch: row.get::<i64, _>("init_num_batch") as u64,
            final_new_batch: row.get::<i64, _>("final_new_batch") as u64,
            local_exit_root: parse_b256(row.get("local_exit_root"))?,
            new_state_root: parse_b256(row.get("new_state_root"))?,
            proof: row.get("proof"),
            proof_hash: parse_b256(row.get("proof_hash"))?,
        })
    }

    async fn add_final_proof(&self, final_proof: &FinalProofRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO final_proof (id, monitored_id, final_proof, final_proof_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (monitored_id) DO UPDATE
            SET final_proof = EXCLUDED.final_proof,
                final_proof_id = EXCLUDED.final_proof_id,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&final_proof.monitored_id)
        .bind(&final_proof.final_proof)
        .bind(&final_proof.final_proof_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_final_proof_by_monitored_id(
        &self,
        monitored_id: &str,
    ) -> Result<FinalProofRecord> {
        let row = sqlx::query(
            r#"
            SELECT monitored_id, final_proof, final_proof_id, created_at, updated_at
            FROM final_proof
            WHERE monitored_id = $1
            "#,
        )
        .bind(monitored_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AggregatorError::NotFound)?;

        Ok(FinalProofRecord {
            monitored_id: row.get("monitored_id"),
            final_proof: row.get("final_proof"),
            final_proof_id: row.get("final_proof_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn get_proof_hash_by_sender(
        &self,
        sender: Address,
        batch_number_final: u64,
        min_commit: u64,
        latest_block: u64,
    ) -> Result<B256> {
        let row = sqlx::query(
            r#"
            SELECT block_num, proof_hash
            FROM proof_hash
            WHERE sender = $1 AND final_new_batch = $2
            ORDER BY block_num DESC
            LIMIT 1
            "#,
        )
        .bind(sender.to_string())
        .bind(batch_number_final as i64)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AggregatorError::ProofNotCommit)?;

        // The commit must have matured past the hash epoch before it can be
        // revealed.
        let block_num = row.get::<i64, _>("block_num") as u64;
        if block_num + min_commit > latest_block {
            return Err(AggregatorError::ProofNotCommit);
        }

        parse_b256(row.get("proof_hash"))
    }

    async fn get_last_proof_submission(&self) -> Result<String> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM monitored_txs
            WHERE status = 'confirmed' AND id LIKE 'proof-from-%'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .filter_map(|r| {
                let id: String = r.get("id");
                parse_reveal_tx_id(&id).ok().map(|(_, to)| (to, id))
            })
            .max_by_key(|(to, _)| *to)
            .map(|(_, id)| id)
            .ok_or(AggregatorError::NotFound)
    }

    async fn have_monitored_tx(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM monitored_txs WHERE id = $1) AS found")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<bool, _>("found"))
    }
}

/// True iff `sequences` exactly tiles `[from, to]` with no gap or overhang.
fn sequences_tile_range(sequences: &[Sequence], from: u64, to: u64) -> bool {
    let Some(first) = sequences.first() else {
        return false;
    };
    let Some(last) = sequences.last() else {
        return false;
    };
    if first.from_batch_number != from || last.to_batch_number != to {
        return false;
    }
    sequences
        .windows(2)
        .all(|w| w[1].from_batch_number == w[0].to_batch_number + 1)
}

fn row_to_proof(row: sqlx::postgres::PgRow) -> Proof {
    Proof {
        batch_number: row.get::<i64, _>("batch_number") as u64,
        batch_number_final: row.get::<i64, _>("batch_number_final") as u64,
        proof: row.get("proof"),
        proof_id: row.get("proof_id"),
        prover: row.get("prover"),
        prover_id: row.get("prover_id"),
        input_prover: row.get("input_prover"),
        generating_since: row.get("generating_since"),
    }
}

fn row_to_batch(row: sqlx::postgres::PgRow) -> Result<Batch> {
    Ok(Batch {
        batch_number: row.get::<i64, _>("batch_number") as u64,
        coinbase: parse_address(row.get("coinbase"))?,
        batch_l2_data: row.get("batch_l2_data"),
        state_root: parse_b256(row.get("state_root"))?,
        local_exit_root: parse_b256(row.get("local_exit_root"))?,
        acc_input_hash: parse_b256(row.get("acc_input_hash"))?,
        global_exit_root: parse_b256(row.get("global_exit_root"))?,
        timestamp: row.get("timestamp"),
    })
}

fn parse_b256(value: String) -> Result<B256> {
    value
        .parse::<B256>()
        .map_err(|e| AggregatorError::Internal(format!("malformed hash column: {e}")))
}

fn parse_address(value: String) -> Result<Address> {
    value
        .parse::<Address>()
        .map_err(|e| AggregatorError::Internal(format!("malformed address column: {e}")))
}
