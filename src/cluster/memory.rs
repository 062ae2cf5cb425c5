//! In-memory [`ClusterClient`] for tests and local experiments
//!
//! Behaves like a strongly consistent API server for the handful of calls
//! the controller makes: lists are snapshots, creates fail on existing names,
//! updates honour `resourceVersion`, and deletes of missing objects report
//! not-found. Every successful write is appended to a mutation log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStatus, StatefulSet, StatefulSetSpec,
    StatefulSetStatus,
};
use k8s_openapi::api::core::v1::{Namespace, PodTemplateSpec};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use super::ClusterClient;
use crate::error::{Error, Result};
use crate::selector::Selector;

type ObjectKey = (String, String);

/// A write the controller performed against the cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Create { namespace: String, name: String },
    Update { namespace: String, name: String },
    Delete { namespace: String, name: String },
}

#[derive(Default)]
struct State {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    deployments: BTreeMap<ObjectKey, Deployment>,
    statefulsets: BTreeMap<ObjectKey, StatefulSet>,
    pdbs: BTreeMap<ObjectKey, PodDisruptionBudget>,
    next_version: u64,
    mutations: Vec<Mutation>,
    failing_writes: BTreeSet<ObjectKey>,
    failing_lists: bool,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_lists(&self) -> Result<()> {
        if self.failing_lists {
            return Err(Error::Unavailable("list failure injected".to_string()));
        }
        Ok(())
    }

    fn check_write(&self, key: &ObjectKey) -> Result<()> {
        if self.failing_writes.contains(key) {
            return Err(Error::Unavailable(format!(
                "write failure injected for {}/{}",
                key.0, key.1
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or relabel a namespace
    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state().namespaces.insert(name.to_string(), labels);
    }

    pub fn remove_namespace(&self, name: &str) {
        let mut state = self.state();
        state.namespaces.remove(name);
        state.deployments.retain(|(ns, _), _| ns != name);
        state.statefulsets.retain(|(ns, _), _| ns != name);
        state.pdbs.retain(|(ns, _), _| ns != name);
    }

    /// Insert or replace a Deployment, assigning a uid when it has none
    pub fn apply_deployment(&self, mut deployment: Deployment) {
        let key = object_key(&deployment.metadata);
        deployment
            .metadata
            .uid
            .get_or_insert_with(|| format!("uid-deployment-{}-{}", key.0, key.1));
        self.state().deployments.insert(key, deployment);
    }

    pub fn remove_deployment(&self, namespace: &str, name: &str) {
        self.state()
            .deployments
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Insert or replace a StatefulSet, assigning a uid when it has none
    pub fn apply_statefulset(&self, mut statefulset: StatefulSet) {
        let key = object_key(&statefulset.metadata);
        statefulset
            .metadata
            .uid
            .get_or_insert_with(|| format!("uid-statefulset-{}-{}", key.0, key.1));
        self.state().statefulsets.insert(key, statefulset);
    }

    pub fn remove_statefulset(&self, namespace: &str, name: &str) {
        self.state()
            .statefulsets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Store a PDB as if a third party wrote it; not recorded as a mutation
    pub fn put_pdb(&self, mut pdb: PodDisruptionBudget) {
        let mut state = self.state();
        let key = object_key(&pdb.metadata);
        pdb.metadata.resource_version = Some(state.bump_version());
        state.pdbs.insert(key, pdb);
    }

    pub fn pdb(&self, namespace: &str, name: &str) -> Option<PodDisruptionBudget> {
        self.state()
            .pdbs
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn pdb_names(&self) -> Vec<String> {
        self.state()
            .pdbs
            .keys()
            .map(|(ns, name)| format!("{ns}/{name}"))
            .collect()
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state().mutations.clear();
    }

    /// Make every write to the named PDB fail until cleared
    pub fn fail_writes_for(&self, namespace: &str, name: &str) {
        self.state()
            .failing_writes
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn clear_write_failures(&self) {
        self.state().failing_writes.clear();
    }

    /// Make every list call fail until switched off
    pub fn fail_lists(&self, fail: bool) {
        self.state().failing_lists = fail;
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>> {
        let state = self.state();
        state.check_lists()?;
        Ok(state
            .namespaces
            .iter()
            .filter(|(_, labels)| selector.matches(labels))
            .map(|(name, labels)| Namespace {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    labels: Some(labels.clone()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let state = self.state();
        state.check_lists()?;
        Ok(in_namespace(&state.deployments, namespace))
    }

    async fn list_statefulsets(&self, namespace: &str) -> Result<Vec<StatefulSet>> {
        let state = self.state();
        state.check_lists()?;
        Ok(in_namespace(&state.statefulsets, namespace))
    }

    async fn list_pdbs(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        let state = self.state();
        state.check_lists()?;
        Ok(in_namespace(&state.pdbs, namespace))
    }

    async fn create_pdb(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget> {
        let mut state = self.state();
        let name = pdb.name_any();
        let key = (namespace.to_string(), name.clone());
        state.check_write(&key)?;
        if state.pdbs.contains_key(&key) {
            return Err(Error::Conflict(format!(
                "PodDisruptionBudget {namespace}/{name} already exists"
            )));
        }

        let mut stored = pdb.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump_version());
        state.pdbs.insert(key, stored.clone());
        state.mutations.push(Mutation::Create {
            namespace: namespace.to_string(),
            name,
        });
        Ok(stored)
    }

    async fn update_pdb(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget> {
        let mut state = self.state();
        let name = pdb.name_any();
        let key = (namespace.to_string(), name.clone());
        state.check_write(&key)?;

        let current_version = match state.pdbs.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => {
                return Err(Error::NotFound(format!(
                    "PodDisruptionBudget {namespace}/{name}"
                )))
            }
        };
        if pdb.metadata.resource_version.is_some()
            && pdb.metadata.resource_version != current_version
        {
            return Err(Error::Conflict(format!(
                "PodDisruptionBudget {namespace}/{name} was modified"
            )));
        }

        let mut stored = pdb.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.resource_version = Some(state.bump_version());
        state.pdbs.insert(key, stored.clone());
        state.mutations.push(Mutation::Update {
            namespace: namespace.to_string(),
            name,
        });
        Ok(stored)
    }

    async fn delete_pdb(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        let key = (namespace.to_string(), name.to_string());
        state.check_write(&key)?;
        if state.pdbs.remove(&key).is_none() {
            return Err(Error::NotFound(format!(
                "PodDisruptionBudget {namespace}/{name}"
            )));
        }
        state.mutations.push(Mutation::Delete {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }
}

fn object_key(meta: &ObjectMeta) -> ObjectKey {
    (
        meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

fn in_namespace<T: Clone>(objects: &BTreeMap<ObjectKey, T>, namespace: &str) -> Vec<T> {
    objects
        .iter()
        .filter(|((ns, _), _)| ns == namespace)
        .map(|(_, obj)| obj.clone())
        .collect()
}

fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), name.to_string())])
}

fn pod_template(name: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(app_labels(name)),
            ..Default::default()
        }),
        spec: None,
    }
}

/// A Deployment selecting pods labelled `app=<name>`
pub fn deployment(namespace: &str, name: &str, replicas: i32, ready: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels(name)),
                ..Default::default()
            },
            template: pod_template(name),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

/// A StatefulSet selecting pods labelled `app=<name>`
pub fn statefulset(namespace: &str, name: &str, replicas: i32, ready: i32) -> StatefulSet {
    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(app_labels(name)),
                ..Default::default()
            },
            template: pod_template(name),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            replicas,
            ready_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::policy::v1::PodDisruptionBudgetSpec;
    use tokio_test::{assert_err, assert_ok};

    fn pdb(namespace: &str, name: &str) -> PodDisruptionBudget {
        PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec::default()),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_namespace_listing_applies_selector() {
        let cluster = InMemoryCluster::new();
        cluster.add_namespace("prod", &[("env", "prod")]);
        cluster.add_namespace("dev", &[("env", "dev")]);

        let selector = Selector::parse("env=prod").unwrap();
        let namespaces = cluster.list_namespaces(&selector).await.unwrap();
        let names: Vec<String> = namespaces.iter().map(|n| n.name_any()).collect();
        assert_eq!(names, vec!["prod".to_string()]);
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name() {
        let cluster = InMemoryCluster::new();
        assert_ok!(cluster.create_pdb("prod", &pdb("prod", "web")).await);
        let err = assert_err!(cluster.create_pdb("prod", &pdb("prod", "web")).await);
        assert!(err.is_conflict());
        assert_eq!(cluster.mutations().len(), 1);
    }

    #[tokio::test]
    async fn test_update_with_stale_resource_version_conflicts() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create_pdb("prod", &pdb("prod", "web")).await.unwrap();
        assert_ok!(cluster.update_pdb("prod", &created).await);

        let err = assert_err!(cluster.update_pdb("prod", &created).await);
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let cluster = InMemoryCluster::new();
        let err = assert_err!(cluster.delete_pdb("prod", "web").await);
        assert!(err.is_not_found());
        assert!(cluster.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let cluster = InMemoryCluster::new();
        cluster.fail_writes_for("prod", "web");
        assert_err!(cluster.create_pdb("prod", &pdb("prod", "web")).await);
        cluster.clear_write_failures();
        assert_ok!(cluster.create_pdb("prod", &pdb("prod", "web")).await);

        cluster.fail_lists(true);
        assert_err!(cluster.list_pdbs("prod").await);
        cluster.fail_lists(false);
        assert_eq!(cluster.list_pdbs("prod").await.unwrap().len(), 1);
    }

    #[test]
    fn test_apply_assigns_uid() {
        let cluster = InMemoryCluster::new();
        cluster.apply_deployment(deployment("prod", "web", 3, 3));
        let state = cluster.state();
        let stored = &state.deployments[&("prod".to_string(), "web".to_string())];
        assert_eq!(
            stored.metadata.uid.as_deref(),
            Some("uid-deployment-prod-web")
        );
    }
}
