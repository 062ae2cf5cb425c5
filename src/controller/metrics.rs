//! Prometheus metrics for the PDB controller
//!
//! # Exported metrics
//! - `pdb_controller_reconcile_duration_seconds` (histogram): duration of a reconciliation pass.
//! - `pdb_controller_reconcile_errors_total` (counter): passes abandoned, labeled by error kind.
//! - `pdb_controller_pdb_operations_total` (counter): PDB writes labeled by operation and result.
//! - `pdb_controller_workloads` (gauge): eligible workloads seen in the last pass.
//! - `pdb_controller_non_ready_workloads` (gauge): workloads currently tracked as non-ready.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error kind, e.g. "kube", "timeout"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// "create", "update" or "delete"
    pub operation: String,
    /// "success" or "failure"
    pub result: String,
}

/// Histogram tracking pass duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    // 10ms .. ~5.5min across 16 buckets.
    Histogram::new(exponential_buckets(0.01, 2.0, 16))
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static PDB_OPERATIONS_TOTAL: Lazy<Family<OperationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static WORKLOADS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

pub static NON_READY_WORKLOADS: Lazy<Gauge<i64, AtomicI64>> = Lazy::new(Gauge::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();
    registry.register(
        "pdb_controller_reconcile_duration_seconds",
        "Duration of reconciliation passes in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    // Counters get their `_total` suffix from the encoder.
    registry.register(
        "pdb_controller_reconcile_errors",
        "Number of reconciliation passes abandoned because of an error",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "pdb_controller_pdb_operations",
        "Number of PodDisruptionBudget writes",
        PDB_OPERATIONS_TOTAL.clone(),
    );
    registry.register(
        "pdb_controller_workloads",
        "Eligible workloads seen in the last pass",
        WORKLOADS.clone(),
    );
    registry.register(
        "pdb_controller_non_ready_workloads",
        "Workloads currently tracked as non-ready",
        NON_READY_WORKLOADS.clone(),
    );
    registry
});

pub fn observe_reconcile_duration_seconds(seconds: f64) {
    RECONCILE_DURATION_SECONDS.observe(seconds);
}

pub fn inc_reconcile_error(kind: &str) {
    let labels = ErrorLabels {
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_pdb_operation(operation: &str, success: bool) {
    let labels = OperationLabels {
        operation: operation.to_string(),
        result: if success { "success" } else { "failure" }.to_string(),
    };
    PDB_OPERATIONS_TOTAL.get_or_create(&labels).inc();
}

pub fn set_workloads(count: usize) {
    WORKLOADS.set(count as i64);
}

pub fn set_non_ready_workloads(count: usize) {
    NON_READY_WORKLOADS.set(count as i64);
}

/// Render the registry in the Prometheus text format
pub fn encode() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_exports_controller_metrics() {
        inc_pdb_operation("create", true);
        inc_reconcile_error("timeout");
        set_non_ready_workloads(2);
        observe_reconcile_duration_seconds(0.5);

        let text = encode().unwrap();
        assert!(text.contains("pdb_controller_pdb_operations_total"));
        assert!(text.contains("operation=\"create\""));
        assert!(text.contains("pdb_controller_reconcile_errors_total"));
        assert!(text.contains("pdb_controller_non_ready_workloads"));
        assert!(text.contains("pdb_controller_reconcile_duration_seconds_bucket"));
    }
}
