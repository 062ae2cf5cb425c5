//! PodDisruptionBudget builders
//!
//! Everything that decides what a managed PDB should look like lives here,
//! free of any cluster I/O.

use std::collections::BTreeMap;

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::scanner::Workload;
use crate::selector::label_selector_matches;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "pdb-controller";

/// Name of the PDB managed for `workload_name`
pub fn pdb_name(workload_name: &str, suffix: &str) -> String {
    format!("{workload_name}-{suffix}")
}

/// The workload name encoded in a managed PDB name, or `None` when the PDB
/// does not follow the naming convention and is therefore not ours
pub fn owned_workload_name<'a>(pdb_name: &'a str, suffix: &str) -> Option<&'a str> {
    pdb_name
        .strip_suffix(suffix)
        .and_then(|rest| rest.strip_suffix('-'))
        .filter(|name| !name.is_empty())
}

pub fn is_managed(pdb: &PodDisruptionBudget, suffix: &str) -> bool {
    pdb.metadata
        .name
        .as_deref()
        .and_then(|name| owned_workload_name(name, suffix))
        .is_some()
}

/// Tolerate the loss of exactly one replica
pub fn desired_min_available(replicas: i32) -> i32 {
    (replicas - 1).max(0)
}

/// Owner reference pointing back at the workload, if it has a uid
pub fn owner_reference(workload: &Workload) -> Option<OwnerReference> {
    let uid = workload.uid.clone()?;
    Some(OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: workload.key.kind.as_str().to_string(),
        name: workload.name().to_string(),
        uid,
        controller: Some(true),
        block_owner_deletion: None,
    })
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())])
}

/// The PDB the controller wants to exist for `workload`
pub fn build_pdb(workload: &Workload, suffix: &str) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(pdb_name(workload.name(), suffix)),
            namespace: Some(workload.namespace().to_string()),
            labels: Some(managed_labels()),
            owner_references: owner_reference(workload).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(workload.selector.clone()),
            min_available: Some(IntOrString::Int(desired_min_available(
                workload.replicas,
            ))),
            ..Default::default()
        }),
        status: None,
    }
}

/// Whether `existing` has drifted from `desired` in a way that matters
pub fn needs_update(existing: &PodDisruptionBudget, desired: &PodDisruptionBudget) -> bool {
    let (Some(current), Some(wanted)) = (existing.spec.as_ref(), desired.spec.as_ref()) else {
        return existing.spec.is_none() && desired.spec.is_some();
    };
    current.min_available != wanted.min_available
        || current.max_unavailable.is_some()
        || current.selector != wanted.selector
}

/// `existing` with the desired constraint and selector applied
///
/// Metadata such as `resourceVersion` is preserved so the update is subject
/// to optimistic concurrency.
pub fn merge_desired(
    existing: &PodDisruptionBudget,
    desired: &PodDisruptionBudget,
) -> PodDisruptionBudget {
    let mut merged = existing.clone();
    let wanted = desired.spec.clone().unwrap_or_default();

    let spec = merged.spec.get_or_insert_with(Default::default);
    spec.min_available = wanted.min_available;
    spec.max_unavailable = None;
    spec.selector = wanted.selector;

    merged
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(managed_labels());
    if merged.metadata.owner_references.is_none() {
        merged.metadata.owner_references = desired.metadata.owner_references.clone();
    }
    merged.status = None;
    merged
}

/// Whether `pdb` already guards the pods of `workload`
pub fn selects_workload_pods(pdb: &PodDisruptionBudget, workload: &Workload) -> bool {
    if workload.template_labels.is_empty() {
        return false;
    }
    pdb.spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .is_some_and(|selector| label_selector_matches(selector, &workload.template_labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{deployment, statefulset};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

    fn web(replicas: i32) -> Workload {
        let mut d = deployment("prod", "web", replicas, replicas);
        d.metadata.uid = Some("uid-web".to_string());
        Workload::from_deployment(&d).unwrap()
    }

    #[test]
    fn test_pdb_name_round_trip() {
        let name = pdb_name("web", "pdb-controller");
        assert_eq!(name, "web-pdb-controller");
        assert_eq!(owned_workload_name(&name, "pdb-controller"), Some("web"));
    }

    #[test]
    fn test_foreign_names_are_not_owned() {
        assert_eq!(owned_workload_name("web", "pdb-controller"), None);
        assert_eq!(owned_workload_name("web-pdb", "pdb-controller"), None);
        assert_eq!(owned_workload_name("pdb-controller", "pdb-controller"), None);
        assert_eq!(owned_workload_name("-pdb-controller", "pdb-controller"), None);
        assert_eq!(owned_workload_name("webpdb-controller", "pdb-controller"), None);
    }

    #[test]
    fn test_min_available_tolerates_one_loss() {
        assert_eq!(desired_min_available(3), 2);
        assert_eq!(desired_min_available(2), 1);
        assert_eq!(desired_min_available(1), 0);
        assert_eq!(desired_min_available(0), 0);
    }

    #[test]
    fn test_build_pdb() {
        let workload = web(3);
        let pdb = build_pdb(&workload, "pdb-controller");

        assert_eq!(pdb.metadata.name.as_deref(), Some("web-pdb-controller"));
        assert_eq!(pdb.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(
            pdb.metadata.labels.as_ref().unwrap()[MANAGED_BY_LABEL],
            MANAGED_BY_VALUE
        );

        let owner = &pdb.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Deployment");
        assert_eq!(owner.api_version, "apps/v1");
        assert_eq!(owner.uid, "uid-web");

        let spec = pdb.spec.unwrap();
        assert_eq!(spec.min_available, Some(IntOrString::Int(2)));
        assert_eq!(spec.max_unavailable, None);
        assert_eq!(spec.selector.as_ref(), Some(&workload.selector));
    }

    #[test]
    fn test_owner_reference_requires_uid() {
        let workload = Workload::from_statefulset(&statefulset("prod", "db", 3, 3)).unwrap();
        assert!(owner_reference(&workload).is_none());
        assert!(build_pdb(&workload, "x").metadata.owner_references.is_none());
    }

    #[test]
    fn test_needs_update_detects_drift() {
        let desired = build_pdb(&web(3), "pdb-controller");
        assert!(!needs_update(&desired, &desired));

        let mut wrong_count = desired.clone();
        wrong_count.spec.as_mut().unwrap().min_available = Some(IntOrString::Int(0));
        assert!(needs_update(&wrong_count, &desired));

        let mut percentage = desired.clone();
        percentage.spec.as_mut().unwrap().min_available =
            Some(IntOrString::String("66%".to_string()));
        assert!(needs_update(&percentage, &desired));

        let mut other_selector = desired.clone();
        other_selector.spec.as_mut().unwrap().selector = Some(LabelSelector::default());
        assert!(needs_update(&other_selector, &desired));

        let mut both = desired.clone();
        both.spec.as_mut().unwrap().max_unavailable = Some(IntOrString::Int(1));
        assert!(needs_update(&both, &desired));

        let mut no_spec = desired.clone();
        no_spec.spec = None;
        assert!(needs_update(&no_spec, &desired));
    }

    #[test]
    fn test_merge_keeps_resource_version() {
        let desired = build_pdb(&web(3), "pdb-controller");
        let mut existing = desired.clone();
        existing.metadata.resource_version = Some("42".to_string());
        existing.metadata.labels = Some(BTreeMap::from([("team".to_string(), "a".to_string())]));
        existing.spec.as_mut().unwrap().min_available = Some(IntOrString::Int(7));
        existing.spec.as_mut().unwrap().max_unavailable = Some(IntOrString::Int(1));

        let merged = merge_desired(&existing, &desired);
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("42"));
        assert!(!needs_update(&merged, &desired));
        let labels = merged.metadata.labels.unwrap();
        assert_eq!(labels["team"], "a");
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
    }

    #[test]
    fn test_selects_workload_pods() {
        let workload = web(2);
        let mut foreign = build_pdb(&workload, "pdb-controller");
        foreign.metadata.name = Some("hand-written".to_string());
        assert!(selects_workload_pods(&foreign, &workload));

        foreign.spec.as_mut().unwrap().selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "api".to_string())])),
            ..Default::default()
        });
        assert!(!selects_workload_pods(&foreign, &workload));

        foreign.spec.as_mut().unwrap().selector = None;
        assert!(!selects_workload_pods(&foreign, &workload));
    }
}
