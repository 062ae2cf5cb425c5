//! [`ClusterClient`] backed by a Kubernetes API server

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

use super::ClusterClient;
use crate::error::{Error, Result};
use crate::selector::Selector;

/// Cluster access through `kube::Api`
///
/// Every call is bounded by `timeout` so a hung request cannot stall the
/// reconciliation loop forever.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(Error::KubeError),
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }

    fn pdbs(&self, namespace: &str) -> Api<PodDisruptionBudget> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn list_namespaces(&self, selector: &Selector) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector.as_str());
        }
        Ok(self.bounded(api.list(&params)).await?.items)
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(self.bounded(api.list(&ListParams::default())).await?.items)
    }

    async fn list_statefulsets(&self, namespace: &str) -> Result<Vec<StatefulSet>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(self.bounded(api.list(&ListParams::default())).await?.items)
    }

    async fn list_pdbs(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        let api = self.pdbs(namespace);
        Ok(self.bounded(api.list(&ListParams::default())).await?.items)
    }

    async fn create_pdb(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget> {
        let api = self.pdbs(namespace);
        self.bounded(api.create(&PostParams::default(), pdb)).await
    }

    async fn update_pdb(
        &self,
        namespace: &str,
        pdb: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget> {
        let name = pdb
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::MissingObjectMetadata("PodDisruptionBudget name".to_string()))?;
        let api = self.pdbs(namespace);
        self.bounded(api.replace(name, &PostParams::default(), pdb))
            .await
    }

    async fn delete_pdb(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.pdbs(namespace);
        self.bounded(api.delete(name, &DeleteParams::default()))
            .await?;
        debug!("Delete of PodDisruptionBudget {}/{} accepted", namespace, name);
        Ok(())
    }
}
