//! The `AggregatorService` streaming facade.
//!
//! Each prover connection gets its own orchestrator loop: handshake, fork-ID
//! gate, then work until either side closes the stream. Connection counts
//! bracket the session for observability.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::infra::AggregatorError;
use crate::metrics;
use crate::orchestrator::Orchestrator;
use crate::proto::aggregator_service_server::AggregatorService;
use crate::proto::{AggregatorMessage, ProverMessage};
use crate::prover::{ProverChannel, ProverSession};

pub struct AggregatorGrpcService {
    orchestrator: Arc<Orchestrator>,
    fork_id: u64,
    proof_state_polling_interval: Duration,
    cancel: CancellationToken,
}

impl AggregatorGrpcService {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        fork_id: u64,
        proof_state_polling_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            fork_id,
            proof_state_polling_interval,
            cancel,
        }
    }
}

#[tonic::async_trait]
impl AggregatorService for AggregatorGrpcService {
    type ChannelStream = ReceiverStream<Result<AggregatorMessage, Status>>;

    async fn channel(
        &self,
        request: Request<Streaming<ProverMessage>>,
    ) -> Result<Response<Self::ChannelStream>, Status> {
        metrics::connected_prover();

        let prover_addr = request
            .remote_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let inbound = request.into_inner();
        let (outbound_tx, outbound_rx) = mpsc::channel(16);

        let orchestrator = self.orchestrator.clone();
        let fork_id = self.fork_id;
        let polling_interval = self.proof_state_polling_interval;
        let session_cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let result = async {
                let session = ProverChannel::connect(
                    inbound,
                    outbound_tx,
                    prover_addr,
                    polling_interval,
                    session_cancel.clone(),
                )
                .await?;

                info!(
                    prover = session.name(),
                    prover_id = session.id(),
                    prover_addr = session.addr(),
                    "Establishing stream connection with prover"
                );

                if !session.supports_fork_id(fork_id) {
                    warn!(
                        prover = session.name(),
                        fork_id, "Prover does not support required fork ID"
                    );
                    return Err(AggregatorError::Prover(
                        "prover does not support required fork ID".to_string(),
                    ));
                }

                orchestrator.run(&session, session_cancel).await
            }
            .await;

            match result {
                Ok(()) | Err(AggregatorError::Cancelled) => {
                    info!("Prover stream closed");
                }
                Err(e) => warn!(error = %e, "Prover session terminated"),
            }
            metrics::disconnected_prover();
        });

        Ok(Response::new(ReceiverStream::new(outbound_rx)))
    }
}
