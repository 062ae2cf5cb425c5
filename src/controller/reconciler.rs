//! PodDisruptionBudget reconciliation
//!
//! Given a cluster snapshot and the non-ready durations for this pass, work
//! out one action per workload, apply it, then delete managed PDBs whose
//! workload no longer exists. Failures are logged at debug level per object
//! and never abort the pass; the next pass recomputes everything from scratch.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::ControllerConfig;
use super::pdb::{
    build_pdb, is_managed, merge_desired, needs_update, pdb_name, selects_workload_pods,
};
use super::scanner::{Snapshot, Workload, WorkloadKey, WorkloadKind};
use crate::cluster::ClusterClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteReason {
    /// The owning workload is gone
    WorkloadRemoved,
    /// The owning workload has been non-ready for at least the TTL
    NonReadyTtlExpired,
    /// The owning workload wants zero replicas
    ScaledToZero,
}

impl fmt::Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeleteReason::WorkloadRemoved => "workload removed",
            DeleteReason::NonReadyTtlExpired => "non-ready TTL expired",
            DeleteReason::ScaledToZero => "scaled to zero",
        })
    }
}

/// The single cluster write (if any) needed for one PDB
#[derive(Clone, Debug, PartialEq)]
pub enum PdbAction {
    Create(PodDisruptionBudget),
    Update(PodDisruptionBudget),
    Delete {
        namespace: String,
        name: String,
        reason: DeleteReason,
    },
    Nothing,
}

impl PdbAction {
    fn delete(pdb: &PodDisruptionBudget, reason: DeleteReason) -> Self {
        PdbAction::Delete {
            namespace: pdb.namespace().unwrap_or_default(),
            name: pdb.name_any(),
            reason,
        }
    }
}

/// Decide what to do for one workload
///
/// `existing` is the managed PDB for the workload, `non_ready_for` how long
/// it has been non-ready, and `covered` whether a PDB the controller does not
/// manage already selects its pods.
pub fn plan_workload(
    workload: &Workload,
    existing: Option<&PodDisruptionBudget>,
    non_ready_for: Option<Duration>,
    covered: bool,
    config: &ControllerConfig,
) -> PdbAction {
    if !workload.is_eligible() {
        return existing.map_or(PdbAction::Nothing, |pdb| {
            PdbAction::delete(pdb, DeleteReason::ScaledToZero)
        });
    }

    if non_ready_for.is_some_and(|elapsed| config.ttl_expired(elapsed)) {
        return existing.map_or(PdbAction::Nothing, |pdb| {
            PdbAction::delete(pdb, DeleteReason::NonReadyTtlExpired)
        });
    }

    let desired = build_pdb(workload, &config.pdb_name_suffix);
    match existing {
        None if covered => {
            debug!(
                "{} is already covered by a PodDisruptionBudget not managed here",
                workload.key
            );
            PdbAction::Nothing
        }
        None => PdbAction::Create(desired),
        Some(current) if needs_update(current, &desired) => {
            PdbAction::Update(merge_desired(current, &desired))
        }
        Some(_) => PdbAction::Nothing,
    }
}

/// Counts of what one reconciliation did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Cancellation stopped the pass before every workload was visited
    pub interrupted: bool,
}

impl ReconcileOutcome {
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// PDBs of one snapshot, split into managed and foreign
struct PdbIndex<'a> {
    managed: HashMap<(String, String), &'a PodDisruptionBudget>,
    foreign: HashMap<&'a str, Vec<&'a PodDisruptionBudget>>,
}

impl<'a> PdbIndex<'a> {
    fn new(pdbs: &'a [PodDisruptionBudget], suffix: &str) -> Self {
        let mut managed = HashMap::new();
        let mut foreign: HashMap<&str, Vec<_>> = HashMap::new();

        for pdb in pdbs {
            let (Some(namespace), Some(name)) =
                (pdb.metadata.namespace.as_deref(), pdb.metadata.name.as_deref())
            else {
                continue;
            };
            if is_managed(pdb, suffix) {
                managed.insert((namespace.to_string(), name.to_string()), pdb);
            } else {
                foreign.entry(namespace).or_default().push(pdb);
            }
        }

        Self { managed, foreign }
    }

    fn managed_for(&self, namespace: &str, name: &str) -> Option<&'a PodDisruptionBudget> {
        self.managed
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
    }

    fn covers(&self, workload: &Workload) -> bool {
        self.foreign
            .get(workload.namespace())
            .is_some_and(|pdbs| pdbs.iter().any(|pdb| selects_workload_pods(pdb, workload)))
    }
}

pub struct Reconciler<'a> {
    cluster: &'a dyn ClusterClient,
    config: &'a ControllerConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, config: &'a ControllerConfig) -> Self {
        Self { cluster, config }
    }

    /// Converge every managed PDB in `snapshot` towards its desired state
    pub async fn reconcile(
        &self,
        snapshot: &Snapshot,
        non_ready: &HashMap<WorkloadKey, Duration>,
        token: &CancellationToken,
    ) -> ReconcileOutcome {
        let suffix = &self.config.pdb_name_suffix;
        let index = PdbIndex::new(&snapshot.pdbs, suffix);
        let mut outcome = ReconcileOutcome::default();

        // Deployments first so they win a name clash with a StatefulSet
        let mut workloads: Vec<&Workload> = snapshot.workloads.iter().collect();
        workloads.sort_by(|a, b| a.key.cmp(&b.key));

        let mut claimed: HashSet<(String, String)> = HashSet::new();
        for workload in workloads {
            if token.is_cancelled() {
                outcome.interrupted = true;
                return outcome;
            }

            let name = pdb_name(workload.name(), suffix);
            if !claimed.insert((workload.namespace().to_string(), name.clone())) {
                if workload.key.kind == WorkloadKind::StatefulSet {
                    debug!(
                        "{} shares its PodDisruptionBudget name {} with a Deployment, skipping",
                        workload.key, name
                    );
                }
                continue;
            }

            let existing = index.managed_for(workload.namespace(), &name);
            let covered = existing.is_none() && index.covers(workload);
            let action = plan_workload(
                workload,
                existing,
                non_ready.get(&workload.key).copied(),
                covered,
                self.config,
            );
            self.apply(action, &workload.key.to_string(), &mut outcome)
                .await;
        }

        let mut orphans: Vec<&PodDisruptionBudget> = index
            .managed
            .iter()
            .filter(|(key, _)| !claimed.contains(*key))
            .map(|(_, pdb)| *pdb)
            .collect();
        orphans.sort_by_key(|pdb| (pdb.namespace(), pdb.name_any()));

        for pdb in orphans {
            if token.is_cancelled() {
                outcome.interrupted = true;
                return outcome;
            }
            let action = PdbAction::delete(pdb, DeleteReason::WorkloadRemoved);
            let owner = format!(
                "orphaned PodDisruptionBudget {}/{}",
                pdb.namespace().unwrap_or_default(),
                pdb.name_any()
            );
            self.apply(action, &owner, &mut outcome).await;
        }

        outcome
    }

    /// Perform one action, recording the result in `outcome`
    async fn apply(&self, action: PdbAction, subject: &str, outcome: &mut ReconcileOutcome) {
        match action {
            PdbAction::Nothing => {}
            PdbAction::Create(pdb) => {
                let namespace = pdb.namespace().unwrap_or_default();
                match self.cluster.create_pdb(&namespace, &pdb).await {
                    Ok(_) => {
                        debug!(
                            "Created PodDisruptionBudget {}/{} for {} (minAvailable={})",
                            namespace,
                            pdb.name_any(),
                            subject,
                            describe_min_available(&pdb)
                        );
                        outcome.created += 1;
                        record_operation("create", true);
                    }
                    Err(e) => {
                        debug!("Failed to create PodDisruptionBudget for {}: {}", subject, e);
                        outcome.failed += 1;
                        record_operation("create", false);
                    }
                }
            }
            PdbAction::Update(pdb) => {
                let namespace = pdb.namespace().unwrap_or_default();
                match self.cluster.update_pdb(&namespace, &pdb).await {
                    Ok(_) => {
                        debug!(
                            "Updated PodDisruptionBudget {}/{} for {} (minAvailable={})",
                            namespace,
                            pdb.name_any(),
                            subject,
                            describe_min_available(&pdb)
                        );
                        outcome.updated += 1;
                        record_operation("update", true);
                    }
                    Err(e) if e.is_conflict() => {
                        debug!(
                            "PodDisruptionBudget {}/{} changed while updating it for {}, retrying next pass",
                            namespace,
                            pdb.name_any(),
                            subject
                        );
                        outcome.failed += 1;
                        record_operation("update", false);
                    }
                    Err(e) => {
                        debug!("Failed to update PodDisruptionBudget for {}: {}", subject, e);
                        outcome.failed += 1;
                        record_operation("update", false);
                    }
                }
            }
            PdbAction::Delete {
                namespace,
                name,
                reason,
            } => match self.cluster.delete_pdb(&namespace, &name).await {
                Ok(()) => {
                    debug!(
                        "Deleted PodDisruptionBudget {}/{} for {} ({})",
                        namespace, name, subject, reason
                    );
                    outcome.deleted += 1;
                    record_operation("delete", true);
                }
                Err(e) if e.is_not_found() => {
                    debug!(
                        "PodDisruptionBudget {}/{} already gone, skipping delete",
                        namespace, name
                    );
                }
                Err(e) => {
                    debug!(
                        "Failed to delete PodDisruptionBudget {}/{} for {} ({}): {}",
                        namespace, name, subject, reason, e
                    );
                    outcome.failed += 1;
                    record_operation("delete", false);
                }
            },
        }
    }
}

fn describe_min_available(pdb: &PodDisruptionBudget) -> String {
    match pdb.spec.as_ref().and_then(|s| s.min_available.as_ref()) {
        Some(IntOrString::Int(n)) => n.to_string(),
        Some(IntOrString::String(s)) => s.clone(),
        None => "unset".to_string(),
    }
}

#[cfg(feature = "metrics")]
fn record_operation(operation: &str, success: bool) {
    super::metrics::inc_pdb_operation(operation, success);
}

#[cfg(not(feature = "metrics"))]
fn record_operation(_operation: &str, _success: bool) {}
