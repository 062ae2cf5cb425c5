//! Cluster API capability used by the controller
//!
//! The controller never talks to `kube::Api` directly. Everything it needs
//! from the cluster goes through [`ClusterClient`], which is implemented by
//! [`KubeCluster`] for a real API server and by [`InMemoryCluster`] for tests.

mod api_server;
pub mod memory;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;

use crate::error::Result;
use crate::selector::Selector;

pub use api_server::KubeCluster;
pub use memory::{InMemoryCluster, Mutation};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// List namespaces whose labels satisfy `selector`
    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>>;

    async fn list_statefulsets(&self, namespace: &str) -> Result<Vec<StatefulSet>>;

    async fn list_pdbs(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>>;

    async fn create_pdb(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget>;

    /// Replace an existing PDB. The object's `resourceVersion` is used for
    /// optimistic concurrency, so a stale object yields a conflict.
    async fn update_pdb(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget>;

    async fn delete_pdb(&self, namespace: &str, name: &str) -> Result<()>;
}
