//! Minimal pending-transaction monitor.
//!
//! Registered transactions are persisted in `monitored_txs` and driven to a
//! terminal status by [`process_pending`]: unsent rows are signed and
//! submitted, sent rows are polled for a receipt. Retired ids are renamed so
//! the slot can be reused by a retry.
//!
//! [`process_pending`]: PgTxMonitor::process_pending

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{MonitoredTxResult, MonitoredTxStatus};
use crate::infra::{AggregatorError, L1TxMonitor, Result};

const STATUS_PENDING: &str = "pending";
const STATUS_CONFIRMED: &str = "confirmed";
const STATUS_FAILED: &str = "failed";

/// Postgres-backed [`L1TxMonitor`] submitting through an alloy HTTP provider.
pub struct PgTxMonitor {
    pool: PgPool,
    rpc_url: String,
    signer: PrivateKeySigner,
}

impl PgTxMonitor {
    pub fn new(pool: PgPool, rpc_url: String, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| AggregatorError::Configuration(format!("invalid private key: {e}")))?;
        Ok(Self {
            pool,
            rpc_url,
            signer,
        })
    }

    async fn submit(&self, from: Address, to: Address, data: Vec<u8>) -> Result<B256> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(self.signer.clone()))
            .on_http(url);

        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_input(data);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| AggregatorError::L1(format!("failed to send transaction: {e}")))?;
        Ok(*pending.tx_hash())
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>> {
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let receipt = provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| AggregatorError::L1(format!("failed to get receipt: {e}")))?;
        Ok(receipt.map(|r| r.status()))
    }
}

#[async_trait]
impl L1TxMonitor for PgTxMonitor {
    async fn add(&self, id: &str, from: Address, to: Address, data: Vec<u8>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO monitored_txs (id, from_addr, to_addr, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn process_pending(&self) -> Result<Vec<MonitoredTxResult>> {
        let rows = sqlx::query(
            r#"
            SELECT id, from_addr, to_addr, data, status, tx_hash
            FROM monitored_txs
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let status: String = row.get("status");
            let tx_hash: Option<String> = row.get("tx_hash");

            if status != STATUS_PENDING {
                results.push(MonitoredTxResult {
                    id,
                    status: if status == STATUS_CONFIRMED {
                        MonitoredTxStatus::Confirmed
                    } else {
                        MonitoredTxStatus::Failed
                    },
                    tx_hash: tx_hash.and_then(|h| h.parse().ok()),
                });
                continue;
            }

            match tx_hash {
                None => {
                    let from: Address = row
                        .get::<String, _>("from_addr")
                        .parse()
                        .map_err(|e| AggregatorError::Internal(format!("bad from_addr: {e}")))?;
                    let to: Address = row
                        .get::<String, _>("to_addr")
                        .parse()
                        .map_err(|e| AggregatorError::Internal(format!("bad to_addr: {e}")))?;
                    let data: Vec<u8> = row.get("data");

                    match self.submit(from, to, data).await {
                        Ok(hash) => {
                            info!(tx_id = %id, tx_hash = %hash, "Monitored tx submitted");
                            sqlx::query(
                                "UPDATE monitored_txs SET tx_hash = $2, updated_at = NOW() WHERE id = $1",
                            )
                            .bind(&id)
                            .bind(hash.to_string())
                            .execute(&self.pool)
                            .await?;
                            results.push(MonitoredTxResult {
                                id,
                                status: MonitoredTxStatus::Pending,
                                tx_hash: Some(hash),
                            });
                        }
                        Err(e) => {
                            warn!(tx_id = %id, error = %e, "Failed to submit monitored tx");
                            sqlx::query(
                                "UPDATE monitored_txs SET status = $2, updated_at = NOW() WHERE id = $1",
                            )
                            .bind(&id)
                            .bind(STATUS_FAILED)
                            .execute(&self.pool)
                            .await?;
                            results.push(MonitoredTxResult {
                                id,
                                status: MonitoredTxStatus::Failed,
                                tx_hash: None,
                            });
                        }
                    }
                }
                Some(hash_str) => {
                    let hash: B256 = hash_str
                        .parse()
                        .map_err(|e| AggregatorError::Internal(format!("bad tx_hash: {e}")))?;
                    match self.receipt_status(hash).await? {
                        None => results.push(MonitoredTxResult {
                            id,
                            status: MonitoredTxStatus::Pending,
                            tx_hash: Some(hash),
                        }),
                        Some(ok) => {
                            let status = if ok { STATUS_CONFIRMED } else { STATUS_FAILED };
                            sqlx::query(
                                "UPDATE monitored_txs SET status = $2, updated_at = NOW() WHERE id = $1",
                            )
                            .bind(&id)
                            .bind(status)
                            .execute(&self.pool)
                            .await?;
                            results.push(MonitoredTxResult {
                                id,
                                status: if ok {
                                    MonitoredTxStatus::Confirmed
                                } else {
                                    MonitoredTxStatus::Failed
                                },
                                tx_hash: Some(hash),
                            });
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    async fn update_tx_id(&self, id: &str) -> Result<()> {
        let retired = format!("{id}#retired-{}", Uuid::new_v4());
        sqlx::query("UPDATE monitored_txs SET id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(&retired)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
