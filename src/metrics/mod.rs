//! Process-global metrics.
//!
//! A handful of counters and one gauge, exposed in Prometheus text format on
//! the ops HTTP surface. Everything else in the system takes its dependencies
//! through constructors; metrics are the one sanctioned global.

use std::sync::atomic::{AtomicU64, Ordering};

static CONNECTED_PROVERS: AtomicU64 = AtomicU64::new(0);
static BATCH_PROOFS_GENERATED: AtomicU64 = AtomicU64::new(0);
static PROOFS_AGGREGATED: AtomicU64 = AtomicU64::new(0);
static FINAL_PROOFS_GENERATED: AtomicU64 = AtomicU64::new(0);
static PROOF_HASHES_COMMITTED: AtomicU64 = AtomicU64::new(0);
static PROOFS_REVEALED: AtomicU64 = AtomicU64::new(0);

pub fn connected_prover() {
    CONNECTED_PROVERS.fetch_add(1, Ordering::Relaxed);
}

pub fn disconnected_prover() {
    CONNECTED_PROVERS.fetch_sub(1, Ordering::Relaxed);
}

pub fn batch_proof_generated() {
    BATCH_PROOFS_GENERATED.fetch_add(1, Ordering::Relaxed);
}

pub fn proof_aggregated() {
    PROOFS_AGGREGATED.fetch_add(1, Ordering::Relaxed);
}

pub fn final_proof_generated() {
    FINAL_PROOFS_GENERATED.fetch_add(1, Ordering::Relaxed);
}

pub fn proof_hash_committed() {
    PROOF_HASHES_COMMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn proof_revealed() {
    PROOFS_REVEALED.fetch_add(1, Ordering::Relaxed);
}

/// Renders all metrics in Prometheus text exposition format.
pub fn render() -> String {
    let mut out = String::with_capacity(512);
    for (name, help, kind, value) in [
        (
            "aggregator_connected_provers",
            "Currently connected provers",
            "gauge",
            CONNECTED_PROVERS.load(Ordering::Relaxed),
        ),
        (
            "aggregator_batch_proofs_generated_total",
            "Batch proofs generated",
            "counter",
            BATCH_PROOFS_GENERATED.load(Ordering::Relaxed),
        ),
        (
            "aggregator_proofs_aggregated_total",
            "Recursive proof aggregations",
            "counter",
            PROOFS_AGGREGATED.load(Ordering::Relaxed),
        ),
        (
            "aggregator_final_proofs_generated_total",
            "Final proofs generated",
            "counter",
            FINAL_PROOFS_GENERATED.load(Ordering::Relaxed),
        ),
        (
            "aggregator_proof_hashes_committed_total",
            "Proof hash commits confirmed on L1",
            "counter",
            PROOF_HASHES_COMMITTED.load(Ordering::Relaxed),
        ),
        (
            "aggregator_proofs_revealed_total",
            "Proof reveals confirmed on L1",
            "counter",
            PROOFS_REVEALED.load(Ordering::Relaxed),
        ),
    ] {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n"
        ));
    }
    out
}
