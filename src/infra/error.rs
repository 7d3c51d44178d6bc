//! Error types for the aggregator.

use thiserror::Error;

/// Errors surfaced by the aggregator components.
#[derive(Error, Debug)]
pub enum AggregatorError {
    /// Nothing matched: no pair to aggregate, no batch to prove, no final
    /// proof yet. Callers record "nothing to do" and sleep.
    #[error("not found")]
    NotFound,

    /// The local synchronizer has not caught up with the requested range.
    #[error("state not synchronized")]
    StateNotSynchronized,

    /// This aggregator did not win the commit race for the batch; no hash of
    /// ours is inside the allowed commit window.
    #[error("proof hash not committed by sender")]
    ProofNotCommit,

    /// Two workers raced for the same proof row.
    #[error("conflicting proof row: {0}")]
    Conflict(String),

    /// Storage I/O error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Prover channel failure: broken stream, rejected request or a proof
    /// computation reported as errored.
    #[error("prover error: {0}")]
    Prover(String),

    /// L1 RPC or calldata-build error.
    #[error("l1 error: {0}")]
    L1(String),

    /// Shutdown or stream teardown aborted the wait.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AggregatorError {
    /// Classifies a sqlx error, mapping unique violations to [`Conflict`].
    ///
    /// [`Conflict`]: AggregatorError::Conflict
    pub fn from_sqlx(err: sqlx::Error, context: &str) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.is_unique_violation() {
                return AggregatorError::Conflict(context.to_string());
            }
        }
        AggregatorError::Database(err)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AggregatorError::NotFound)
    }
}

/// Result type for aggregator operations.
pub type Result<T> = std::result::Result<T, AggregatorError>;
