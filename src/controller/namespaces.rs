//! Namespace scoping

use kube::ResourceExt;
use tracing::debug;

use crate::cluster::ClusterClient;
use crate::error::Result;
use crate::selector::Selector;

/// Decides which namespaces are reconciled
///
/// The selector is parsed once at construction, so a malformed expression is
/// a startup error rather than a per-cycle one.
#[derive(Clone, Debug)]
pub struct NamespaceFilter {
    selector: Selector,
}

impl NamespaceFilter {
    pub fn new(expr: &str) -> Result<Self> {
        Ok(Self {
            selector: Selector::parse(expr)?,
        })
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Names of the namespaces currently in scope, sorted
    pub async fn namespaces(&self, cluster: &dyn ClusterClient) -> Result<Vec<String>> {
        let listed = cluster.list_namespaces(&self.selector).await?;

        // The server already filters; re-check so scoping never depends on
        // the backend honouring the selector.
        let mut names: Vec<String> = listed
            .iter()
            .filter(|ns| self.selector.matches(ns.labels()))
            .map(|ns| ns.name_any())
            .collect();
        names.sort();

        debug!(
            selector = %self.selector,
            count = names.len(),
            "Resolved namespaces in scope"
        );
        Ok(names)
    }
}
