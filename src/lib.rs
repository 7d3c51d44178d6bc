//! zkEVM Aggregator
//!
//! Decentralized zk-rollup aggregator: assigns virtual batches to remote
//! provers, recursively aggregates the returned proofs, wraps the covering
//! proof into a final proof and settles it on L1 with a commit-reveal
//! (proof-hash / proof) protocol that protects against front-running.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (batches, proofs, sequences, messages)
//! - [`infra`] - Store/L1/monitor traits and their implementations
//! - [`crypto`] - Commit-reveal proof hash
//! - [`l1`] - Settlement contract gateway
//! - [`prover`] - Per-connection prover session
//! - [`orchestrator`] - Per-prover proving loop
//! - [`arranger`] - Ordered final-proof dispatcher
//! - [`sender`] - Two-phase commit-reveal submitter
//! - [`grpc`] - Prover-facing streaming facade
//! - [`metrics`] - Observability
//! - [`server`] - Configuration and bootstrap

pub mod arranger;
pub mod crypto;
pub mod domain;
pub mod grpc;
pub mod infra;
pub mod l1;
pub mod metrics;
pub mod migrations;
pub mod orchestrator;
pub mod proto;
pub mod prover;
pub mod sender;
pub mod server;

// Re-export commonly used types
pub use domain::{
    Batch, FinalProofMsg, FinalProofRecord, MonitoredTxResult, MonitoredTxStatus, Proof,
    ProofHashMsg, ProverProof, SendFailProofMsg, Sequence, VerifiedBatch,
};
pub use infra::{AggregatorError, L1Client, L1TxMonitor, ProofStore, Result};
