//! Prover session.
//!
//! Wraps one bidirectional prover stream. The aggregator drives the
//! conversation: it sends a request, then blocks on the stream for the
//! matching response. A session lives exactly as long as its stream and its
//! waits abort when the session token is cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming};
use tracing::debug;

use crate::infra::{AggregatorError, Result};
use crate::proto::{
    aggregator_message, prover_message, AggregatorMessage, FinalProof, GenAggregatedProofRequest,
    GenBatchProofRequest, GenFinalProofRequest, GetProofRequest, GetProofResponse, GetProofResult,
    GetStatusRequest, InputProver, IsIdleRequest, ProofGenResult, ProverMessage,
};

/// Capability set of one connected prover.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProverSession: Send + Sync {
    fn name(&self) -> &str;
    fn id(&self) -> &str;
    fn addr(&self) -> &str;
    fn supports_fork_id(&self, fork_id: u64) -> bool;

    async fn is_idle(&self) -> Result<bool>;

    /// Requests a proof for a single batch; returns the prover's handle.
    async fn batch_proof(&self, input: InputProver) -> Result<String>;

    /// Requests the recursive aggregation of two proofs.
    async fn aggregated_proof(&self, proof1: &str, proof2: &str) -> Result<String>;

    /// Requests the final wrapping proof bound to the aggregator address.
    async fn final_proof(&self, proof: &str, aggregator_addr: &str) -> Result<String>;

    /// Polls until the recursive proof identified by `proof_id` completes.
    async fn wait_recursive_proof(&self, proof_id: &str) -> Result<String>;

    /// Polls until the final proof identified by `proof_id` completes.
    async fn wait_final_proof(&self, proof_id: &str) -> Result<FinalProof>;
}

/// [`ProverSession`] over a tonic bidirectional stream.
pub struct ProverChannel {
    name: String,
    id: String,
    addr: String,
    fork_ids: Vec<u64>,
    polling_interval: Duration,
    cancel: CancellationToken,
    outbound: mpsc::Sender<std::result::Result<AggregatorMessage, Status>>,
    inbound: Mutex<Streaming<ProverMessage>>,
    next_request_id: AtomicU64,
}

impl ProverChannel {
    /// Performs the status handshake and returns the established session.
    pub async fn connect(
        inbound: Streaming<ProverMessage>,
        outbound: mpsc::Sender<std::result::Result<AggregatorMessage, Status>>,
        addr: String,
        polling_interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut channel = Self {
            name: String::new(),
            id: String::new(),
            addr,
            fork_ids: Vec::new(),
            polling_interval,
            cancel,
            outbound,
            inbound: Mutex::new(inbound),
            next_request_id: AtomicU64::new(0),
        };

        let response = channel
            .request(aggregator_message::Request::GetStatusRequest(
                GetStatusRequest {},
            ))
            .await?;
        let prover_message::Response::GetStatusResponse(status) = response else {
            return Err(AggregatorError::Prover(
                "unexpected response to status handshake".to_string(),
            ));
        };

        channel.name = status.prover_name;
        channel.id = status.prover_id;
        channel.fork_ids = status.fork_ids;
        Ok(channel)
    }

    async fn wait_proof(&self, proof_id: &str) -> Result<GetProofResponse> {
        loop {
            let response = match self
                .request(aggregator_message::Request::GetProofRequest(
                    GetProofRequest {
                        proof_id: proof_id.to_string(),
                    },
                ))
                .await?
            {
                prover_message::Response::GetProofResponse(r) => r,
                _ => {
                    return Err(AggregatorError::Prover(
                        "unexpected response to get proof request".to_string(),
                    ))
                }
            };

            match response.result() {
                GetProofResult::CompletedOk => return Ok(response),
                GetProofResult::Pending => {
                    debug!(proof_id, "Proof still pending");
                }
                _ => {
                    return Err(AggregatorError::Prover(format!(
                        "proof {proof_id} failed: {}",
                        response.result_string
                    )))
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(AggregatorError::Cancelled),
                _ = tokio::time::sleep(self.polling_interval) => {}
            }
        }
    }

    async fn request(
        &self,
        request: aggregator_message::Request,
    ) -> Result<prover_message::Response> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.outbound
            .send(Ok(AggregatorMessage {
                id,
                request: Some(request),
            }))
            .await
            .map_err(|_| AggregatorError::Prover("prover stream closed".to_string()))?;

        let mut inbound = self.inbound.lock().await;
        let message = tokio::select! {
            _ = self.cancel.cancelled() => return Err(AggregatorError::Cancelled),
            message = inbound.message() => message
                .map_err(|e| AggregatorError::Prover(format!("prover stream error: {e}")))?
                .ok_or_else(|| AggregatorError::Prover("prover stream closed".to_string()))?,
        };

        if message.id != id {
            return Err(AggregatorError::Prover(format!(
                "response id {} does not match request id {id}",
                message.id
            )));
        }
        message
            .response
            .ok_or_else(|| AggregatorError::Prover("empty prover response".to_string()))
    }
}

#[async_trait]
impl ProverSession for ProverChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn supports_fork_id(&self, fork_id: u64) -> bool {
        self.fork_ids.contains(&fork_id)
    }

    async fn is_idle(&self) -> Result<bool> {
        match self
            .request(aggregator_message::Request::IsIdleRequest(IsIdleRequest {}))
            .await?
        {
            prover_message::Response::IsIdleResponse(r) => Ok(r.is_idle),
            _ => Err(AggregatorError::Prover(
                "unexpected response to idle check".to_string(),
            )),
        }
    }

    async fn batch_proof(&self, input: InputProver) -> Result<String> {
        match self
            .request(aggregator_message::Request::GenBatchProofRequest(
                GenBatchProofRequest { input: Some(input) },
            ))
            .await?
        {
            prover_message::Response::GenBatchProofResponse(r) => {
                into_proof_id(r.result(), r.proof_id)
            }
            _ => Err(AggregatorError::Prover(
                "unexpected response to batch proof request".to_string(),
            )),
        }
    }

    async fn aggregated_proof(&self, proof1: &str, proof2: &str) -> Result<String> {
        match self
            .request(aggregator_message::Request::GenAggregatedProofRequest(
                GenAggregatedProofRequest {
                    recursive_proof_1: proof1.to_string(),
                    recursive_proof_2: proof2.to_string(),
                },
            ))
            .await?
        {
            prover_message::Response::GenAggregatedProofResponse(r) => {
                into_proof_id(r.result(), r.proof_id)
            }
            _ => Err(AggregatorError::Prover(
                "unexpected response to aggregated proof request".to_string(),
            )),
        }
    }

    async fn final_proof(&self, proof: &str, aggregator_addr: &str) -> Result<String> {
        match self
            .request(aggregator_message::Request::GenFinalProofRequest(
                GenFinalProofRequest {
                    recursive_proof: proof.to_string(),
                    aggregator_addr: aggregator_addr.to_string(),
                },
            ))
            .await?
        {
            prover_message::Response::GenFinalProofResponse(r) => {
                into_proof_id(r.result(), r.proof_id)
            }
            _ => Err(AggregatorError::Prover(
                "unexpected response to final proof request".to_string(),
            )),
        }
    }

    async fn wait_recursive_proof(&self, proof_id: &str) -> Result<String> {
        let response = self.wait_proof(proof_id).await?;
        match response.proof {
            Some(crate::proto::get_proof_response::Proof::RecursiveProof(proof)) => Ok(proof),
            _ => Err(AggregatorError::Prover(format!(
                "prover returned no recursive proof for id {proof_id}"
            ))),
        }
    }

    async fn wait_final_proof(&self, proof_id: &str) -> Result<FinalProof> {
        let response = self.wait_proof(proof_id).await?;
        match response.proof {
            Some(crate::proto::get_proof_response::Proof::FinalProof(proof)) => Ok(proof),
            _ => Err(AggregatorError::Prover(format!(
                "prover returned no final proof for id {proof_id}"
            ))),
        }
    }
}

fn into_proof_id(result: ProofGenResult, proof_id: String) -> Result<String> {
    if result != ProofGenResult::Ok || proof_id.is_empty() {
        return Err(AggregatorError::Prover(
            "prover rejected proof generation request".to_string(),
        ));
    }
    Ok(proof_id)
}
