//! Workload discovery
//!
//! Each pass takes a full snapshot of the Deployments, StatefulSets and
//! PodDisruptionBudgets in the namespaces that are in scope. Nothing is
//! cached between passes.

use std::collections::BTreeMap;
use std::fmt;

use futures::future::try_join3;
use futures::stream::{self, StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a workload across passes
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadKey {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(kind: WorkloadKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// The attributes of a Deployment or StatefulSet needed to compute its budget
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub key: WorkloadKey,
    pub uid: Option<String>,
    /// Desired replicas; the API server defaults an unset value to 1
    pub replicas: i32,
    pub ready_replicas: i32,
    pub selector: LabelSelector,
    pub template_labels: BTreeMap<String, String>,
}

impl Workload {
    pub fn from_deployment(deployment: &Deployment) -> Result<Self> {
        let spec = deployment
            .spec
            .as_ref()
            .ok_or_else(|| Error::MissingObjectMetadata("Deployment spec".to_string()))?;
        Self::build(
            WorkloadKind::Deployment,
            &deployment.metadata,
            spec.replicas,
            deployment.status.as_ref().and_then(|s| s.ready_replicas),
            &spec.selector,
            spec.template.metadata.as_ref(),
        )
    }

    pub fn from_statefulset(statefulset: &StatefulSet) -> Result<Self> {
        let spec = statefulset
            .spec
            .as_ref()
            .ok_or_else(|| Error::MissingObjectMetadata("StatefulSet spec".to_string()))?;
        Self::build(
            WorkloadKind::StatefulSet,
            &statefulset.metadata,
            spec.replicas,
            statefulset.status.as_ref().and_then(|s| s.ready_replicas),
            &spec.selector,
            spec.template.metadata.as_ref(),
        )
    }

    fn build(
        kind: WorkloadKind,
        meta: &ObjectMeta,
        replicas: Option<i32>,
        ready_replicas: Option<i32>,
        selector: &LabelSelector,
        template: Option<&ObjectMeta>,
    ) -> Result<Self> {
        let name = meta
            .name
            .as_deref()
            .ok_or_else(|| Error::MissingObjectMetadata(format!("{kind} name")))?;
        let namespace = meta
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingObjectMetadata(format!("{kind} {name} namespace")))?;

        Ok(Self {
            key: WorkloadKey::new(kind, namespace, name),
            uid: meta.uid.clone(),
            replicas: replicas.unwrap_or(1),
            ready_replicas: ready_replicas.unwrap_or(0),
            selector: selector.clone(),
            template_labels: template
                .and_then(|m| m.labels.clone())
                .unwrap_or_default(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Workloads scaled to zero are not protected and not tracked
    pub fn is_eligible(&self) -> bool {
        self.replicas > 0
    }

    pub fn is_ready(&self) -> bool {
        self.is_eligible() && self.ready_replicas >= self.replicas
    }
}

/// Namespaces whose lists are in flight at the same time during a scan
pub const MAX_CONCURRENT_NAMESPACES: usize = 8;

/// Everything one pass needs to know about the cluster
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub namespaces: Vec<String>,
    pub workloads: Vec<Workload>,
    pub pdbs: Vec<PodDisruptionBudget>,
}

/// Read every workload and PDB in `namespaces`
///
/// Up to [`MAX_CONCURRENT_NAMESPACES`] namespaces are read concurrently and
/// results keep the order of `namespaces`. A failure to list anything fails the
/// whole scan so a pass never acts on a partial view.
pub async fn scan(cluster: &dyn ClusterClient, namespaces: &[String]) -> Result<Snapshot> {
    let results: Vec<_> = stream::iter(namespaces)
        .map(|ns| {
            try_join3(
                cluster.list_deployments(ns),
                cluster.list_statefulsets(ns),
                cluster.list_pdbs(ns),
            )
        })
        .buffered(MAX_CONCURRENT_NAMESPACES)
        .try_collect()
        .await?;

    let mut snapshot = Snapshot {
        namespaces: namespaces.to_vec(),
        ..Default::default()
    };
    for (deployments, statefulsets, pdbs) in results {
        snapshot.workloads.extend(
            deployments
                .iter()
                .filter_map(|d| keep_valid(Workload::from_deployment(d))),
        );
        snapshot.workloads.extend(
            statefulsets
                .iter()
                .filter_map(|s| keep_valid(Workload::from_statefulset(s))),
        );
        snapshot.pdbs.extend(pdbs);
    }

    debug!(
        namespaces = snapshot.namespaces.len(),
        workloads = snapshot.workloads.len(),
        pdbs = snapshot.pdbs.len(),
        "Cluster snapshot taken"
    );
    Ok(snapshot)
}

fn keep_valid(workload: Result<Workload>) -> Option<Workload> {
    match workload {
        Ok(w) => Some(w),
        Err(e) => {
            debug!("Skipping malformed workload: {}", e);
            None
        }
    }
}
