//! L1 gateway.
//!
//! Read-side views of the rollup settlement contract (verified batch head,
//! epoch constants, aggregator collateral, sequence commit metadata) and the
//! calldata builders for the commit and reveal transactions. Submission is
//! the tx monitor's job; nothing here signs or sends.

use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;

use crate::infra::traits::FinalProofInputs;
use crate::infra::{AggregatorError, L1Client, Result};

// Abstract operations of the settlement contract; the concrete layout is the
// contract's business.
sol! {
    #[sol(rpc)]
    interface IZkRollup {
        function submitProofHash(uint64 initNumBatch, uint64 finalNewBatch, bytes32 proofHash) external;

        function verifyBatches(
            uint64 initNumBatch,
            uint64 finalNewBatch,
            bytes32 newLocalExitRoot,
            bytes32 newStateRoot,
            bytes calldata proof
        ) external;

        function verifyBatchesTrustedAggregator(
            uint64 initNumBatch,
            uint64 finalNewBatch,
            bytes32 newLocalExitRoot,
            bytes32 newStateRoot,
            bytes calldata proof
        ) external;

        function lastVerifiedBatch() external view returns (uint64 batchNum);

        function sequencedBatchInfo(uint64 finalNewBatch) external view returns (uint256 blockNumber, bool proofSubmitted);

        function aggregatorDeposit(address account) external view returns (uint256 amount);

        function minDeposit() external view returns (uint256 amount);

        function proofHashCommitEpoch() external view returns (uint8 epoch);

        function proofCommitEpoch() external view returns (uint8 epoch);
    }
}

/// alloy-backed [`L1Client`].
pub struct EthClient {
    rpc_url: String,
    rollup_address: Address,
}

impl EthClient {
    pub fn new(rpc_url: String, rollup_address: Address) -> Self {
        Self {
            rpc_url,
            rollup_address,
        }
    }
}

#[async_trait]
impl L1Client for EthClient {
    async fn get_latest_verified_batch_num(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(
            self.rpc_url
                .parse()
                .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?,
        );
        let contract = IZkRollup::new(self.rollup_address, &provider);
        let res = contract
            .lastVerifiedBatch()
            .call()
            .await
            .map_err(|e| AggregatorError::L1(format!("lastVerifiedBatch call failed: {e}")))?;
        Ok(res.batchNum)
    }

    async fn get_latest_block_number(&self) -> Result<u64> {
        let provider = ProviderBuilder::new().on_http(
            self.rpc_url
                .parse()
                .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?,
        );
        provider
            .get_block_number()
            .await
            .map_err(|e| AggregatorError::L1(format!("failed to get block number: {e}")))
    }

    async fn get_sequenced_batch(&self, batch_number_final: u64) -> Result<(u64, bool)> {
        let provider = ProviderBuilder::new().on_http(
            self.rpc_url
                .parse()
                .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?,
        );
        let contract = IZkRollup::new(self.rollup_address, &provider);
        let res = contract
            .sequencedBatchInfo(batch_number_final)
            .call()
            .await
            .map_err(|e| AggregatorError::L1(format!("sequencedBatchInfo call failed: {e}")))?;
        Ok((res.blockNumber.to::<u64>(), res.proofSubmitted))
    }

    async fn build_proof_hash_tx_data(
        &self,
        last_verified_batch: u64,
        new_verified_batch: u64,
        proof_hash: B256,
    ) -> Result<(Address, Vec<u8>)> {
        let call = IZkRollup::submitProofHashCall {
            initNumBatch: last_verified_batch,
            finalNewBatch: new_verified_batch,
            proofHash: proof_hash,
        };
        Ok((self.rollup_address, call.abi_encode()))
    }

    async fn build_untrusted_verify_batches_tx_data(
        &self,
        last_verified_batch: u64,
        new_verified_batch: u64,
        inputs: &FinalProofInputs,
    ) -> Result<(Address, Vec<u8>)> {
        let call = IZkRollup::verifyBatchesCall {
            initNumBatch: last_verified_batch,
            finalNewBatch: new_verified_batch,
            newLocalExitRoot: inputs.new_local_exit_root,
            newStateRoot: inputs.new_state_root,
            proof: Bytes::from(inputs.final_proof.clone().into_bytes()),
        };
        Ok((self.rollup_address, call.abi_encode()))
    }

    async fn build_trusted_verify_batches_tx_data(
        &self,
        last_verified_batch: u64,
        new_verified_batch: u64,
        inputs: &FinalProofInputs,
    ) -> Result<(Address, Vec<u8>)> {
        let call = IZkRollup::verifyBatchesTrustedAggregatorCall {
            initNumBatch: last_verified_batch,
            finalNewBatch: new_verified_batch,
            newLocalExitRoot: inputs.new_local_exit_root,
            newStateRoot: inputs.new_state_root,
            proof: Bytes::from(inputs.final_proof.clone().into_bytes()),
        };
        Ok((self.rollup_address, call.abi_encode()))
    }

    async fn judge_aggregator_deposit(&self, account: Address) -> Result<bool> {
        let provider = ProviderBuilder::new().on_http(
            self.rpc_url
                .parse()
                .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?,
        );
        let contract = IZkRollup::new(self.rollup_address, &provider);
        let deposit = contract
            .aggregatorDeposit(account)
            .call()
            .await
            .map_err(|e| AggregatorError::L1(format!("aggregatorDeposit call failed: {e}")))?;
        let min = contract
            .minDeposit()
            .call()
            .await
            .map_err(|e| AggregatorError::L1(format!("minDeposit call failed: {e}")))?;
        Ok(deposit.amount >= min.amount)
    }

    async fn get_proof_hash_commit_epoch(&self) -> Result<u8> {
        let provider = ProviderBuilder::new().on_http(
            self.rpc_url
                .parse()
                .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?,
        );
        let contract = IZkRollup::new(self.rollup_address, &provider);
        let res = contract
            .proofHashCommitEpoch()
            .call()
            .await
            .map_err(|e| AggregatorError::L1(format!("proofHashCommitEpoch call failed: {e}")))?;
        Ok(res.epoch)
    }

    async fn get_proof_commit_epoch(&self) -> Result<u8> {
        let provider = ProviderBuilder::new().on_http(
            self.rpc_url
                .parse()
                .map_err(|e| AggregatorError::Configuration(format!("invalid RPC URL: {e}")))?,
        );
        let contract = IZkRollup::new(self.rollup_address, &provider);
        let res = contract
            .proofCommitEpoch()
            .call()
            .await
            .map_err(|e| AggregatorError::L1(format!("proofCommitEpoch call failed: {e}")))?;
        Ok(res.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn client() -> EthClient {
        EthClient::new(
            "http://localhost:8545".to_string(),
            address!("5FbDB2315678afecb367f032d93F642f64180aa3"),
        )
    }

    #[tokio::test]
    async fn proof_hash_calldata_has_selector_and_args() {
        let c = client();
        let (to, data) = c
            .build_proof_hash_tx_data(4, 9, B256::repeat_byte(0xab))
            .await
            .unwrap();
        assert_eq!(to, c.rollup_address);
        assert_eq!(&data[..4], &IZkRollup::submitProofHashCall::SELECTOR[..]);
        // selector + 3 words
        assert_eq!(data.len(), 4 + 32 * 3);
    }

    #[tokio::test]
    async fn verify_batches_calldata_round_trips() {
        let c = client();
        let inputs = FinalProofInputs {
            final_proof: "{\"proof\":\"0x1\"}".to_string(),
            new_local_exit_root: B256::repeat_byte(1),
            new_state_root: B256::repeat_byte(2),
        };
        let (_, data) = c
            .build_untrusted_verify_batches_tx_data(0, 1, &inputs)
            .await
            .unwrap();
        let decoded = IZkRollup::verifyBatchesCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.initNumBatch, 0);
        assert_eq!(decoded.finalNewBatch, 1);
        assert_eq!(decoded.newStateRoot, B256::repeat_byte(2));
        assert_eq!(decoded.proof.as_ref(), inputs.final_proof.as_bytes());
    }
}
