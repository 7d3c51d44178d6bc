//! Infrastructure: error types, service traits and their Postgres / L1
//! implementations.

pub mod error;
pub mod postgres;
pub mod profitability;
pub mod traits;

pub use error::{AggregatorError, Result};
pub use postgres::{PgProofStore, PgTxMonitor};
pub use profitability::{AcceptAllProfitabilityChecker, BaseProfitabilityChecker};
pub use traits::{L1Client, L1TxMonitor, ProfitabilityChecker, ProofStore};

#[cfg(test)]
pub use traits::{MockL1Client, MockL1TxMonitor, MockProfitabilityChecker, MockProofStore};
