//! Controller module for PodDisruptionBudget reconciliation
//! This module contains the main controller loop, the workload scanner,
//! non-ready bookkeeping and the PDB reconciliation logic.

pub mod config;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod namespaces;
pub mod pdb;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
mod runner;
pub mod scanner;
pub mod tracker;

pub use config::{ControllerConfig, DEFAULT_INTERVAL, DEFAULT_PDB_NAME_SUFFIX};
pub use namespaces::NamespaceFilter;
pub use reconciler::{plan_workload, DeleteReason, PdbAction, ReconcileOutcome, Reconciler};
pub use runner::{Controller, ControllerState, PassSummary};
pub use scanner::{scan, Snapshot, Workload, WorkloadKey, WorkloadKind};
pub use tracker::NonReadyTracker;
