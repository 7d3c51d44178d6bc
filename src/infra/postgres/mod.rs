//! PostgreSQL implementations of the store and tx-monitor traits.

mod proof_store;
mod tx_monitor;

pub use proof_store::PgProofStore;
pub use tx_monitor::PgTxMonitor;
