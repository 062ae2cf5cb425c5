//! Tests for the reconciler module
//!
//! These tests verify the per-workload decision table and the effect of a
//! reconciliation against an in-memory cluster:
//! - PDB creation, update and deletion
//! - Non-ready TTL handling
//! - Foreign PDB coverage
//! - Orphan cleanup and name clashes

#[cfg(test)]
mod tests {
    use super::super::config::ControllerConfig;
    use super::super::pdb::{build_pdb, MANAGED_BY_LABEL};
    use super::super::reconciler::*;
    use super::super::scanner::{scan, Workload};
    use crate::cluster::memory::{deployment, statefulset};
    use crate::cluster::{InMemoryCluster, Mutation};
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn config_with_ttl(ttl: Duration) -> ControllerConfig {
        ControllerConfig {
            non_ready_ttl: ttl,
            ..Default::default()
        }
    }

    fn web(replicas: i32, ready: i32) -> Workload {
        Workload::from_deployment(&deployment("prod", "web", replicas, ready)).unwrap()
    }

    fn min_available(action: &PdbAction) -> Option<IntOrString> {
        match action {
            PdbAction::Create(pdb) | PdbAction::Update(pdb) => {
                pdb.spec.as_ref().and_then(|s| s.min_available.clone())
            }
            _ => None,
        }
    }

    #[test]
    fn test_plan_creates_missing_pdb() {
        let config = ControllerConfig::default();
        let action = plan_workload(&web(3, 3), None, None, false, &config);

        assert!(matches!(action, PdbAction::Create(_)));
        assert_eq!(min_available(&action), Some(IntOrString::Int(2)));
    }

    #[test]
    fn test_plan_single_replica_allows_eviction() {
        let config = ControllerConfig::default();
        let action = plan_workload(&web(1, 1), None, None, false, &config);
        assert_eq!(min_available(&action), Some(IntOrString::Int(0)));
    }

    #[test]
    fn test_plan_is_idempotent() {
        let config = ControllerConfig::default();
        let existing = build_pdb(&web(3, 3), &config.pdb_name_suffix);
        let action = plan_workload(&web(3, 3), Some(&existing), None, false, &config);
        assert_eq!(action, PdbAction::Nothing);
    }

    #[test]
    fn test_plan_updates_drifted_pdb() {
        let config = ControllerConfig::default();
        let mut existing = build_pdb(&web(3, 3), &config.pdb_name_suffix);
        existing.metadata.resource_version = Some("7".to_string());

        let action = plan_workload(&web(5, 5), Some(&existing), None, false, &config);
        assert_eq!(min_available(&action), Some(IntOrString::Int(4)));
        match action {
            PdbAction::Update(pdb) => {
                assert_eq!(pdb.metadata.resource_version.as_deref(), Some("7"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_plan_deletes_when_scaled_to_zero() {
        let config = ControllerConfig::default();
        let existing = build_pdb(&web(3, 3), &config.pdb_name_suffix);

        let action = plan_workload(&web(0, 0), Some(&existing), None, false, &config);
        assert_eq!(
            action,
            PdbAction::Delete {
                namespace: "prod".to_string(),
                name: "web-pdb-controller".to_string(),
                reason: DeleteReason::ScaledToZero,
            }
        );

        let action = plan_workload(&web(0, 0), None, None, false, &config);
        assert_eq!(action, PdbAction::Nothing);
    }

    #[test]
    fn test_plan_keeps_pdb_within_ttl() {
        let config = config_with_ttl(Duration::from_secs(300));
        let existing = build_pdb(&web(3, 1), &config.pdb_name_suffix);

        let action = plan_workload(
            &web(3, 1),
            Some(&existing),
            Some(Duration::from_secs(240)),
            false,
            &config,
        );
        assert_eq!(action, PdbAction::Nothing);
    }

    #[test]
    fn test_plan_deletes_after_ttl() {
        let config = config_with_ttl(Duration::from_secs(300));
        let existing = build_pdb(&web(3, 1), &config.pdb_name_suffix);

        let action = plan_workload(
            &web(3, 1),
            Some(&existing),
            Some(Duration::from_secs(300)),
            false,
            &config,
        );
        assert!(matches!(
            action,
            PdbAction::Delete {
                reason: DeleteReason::NonReadyTtlExpired,
                ..
            }
        ));
    }

    #[test]
    fn test_plan_does_not_recreate_after_ttl() {
        let config = config_with_ttl(Duration::from_secs(300));
        let action = plan_workload(
            &web(3, 1),
            None,
            Some(Duration::from_secs(900)),
            false,
            &config,
        );
        assert_eq!(action, PdbAction::Nothing);
    }

    #[test]
    fn test_plan_ignores_ttl_when_disabled() {
        let config = ControllerConfig::default();
        let action = plan_workload(
            &web(3, 0),
            None,
            Some(Duration::from_secs(86_400)),
            false,
            &config,
        );
        assert!(matches!(action, PdbAction::Create(_)));
    }

    #[test]
    fn test_plan_respects_foreign_coverage() {
        let config = ControllerConfig::default();
        let action = plan_workload(&web(3, 3), None, None, true, &config);
        assert_eq!(action, PdbAction::Nothing);
    }

    #[tokio::test]
    async fn test_reconcile_creates_and_collects_orphans() {
        let cluster = InMemoryCluster::new();
        let config = ControllerConfig::default();
        cluster.add_namespace("prod", &[]);
        cluster.apply_deployment(deployment("prod", "web", 3, 3));
        cluster.put_pdb(build_pdb(
            &Workload::from_deployment(&deployment("prod", "gone", 2, 2)).unwrap(),
            &config.pdb_name_suffix,
        ));

        let snapshot = scan(&cluster, &["prod".to_string()]).await.unwrap();
        let outcome = Reconciler::new(&cluster, &config)
            .reconcile(&snapshot, &HashMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(
            cluster.pdb_names(),
            vec!["prod/web-pdb-controller".to_string()]
        );
        let pdb = cluster.pdb("prod", "web-pdb-controller").unwrap();
        assert_eq!(
            pdb.metadata.labels.unwrap()[MANAGED_BY_LABEL],
            "pdb-controller"
        );
    }

    #[tokio::test]
    async fn test_reconcile_leaves_foreign_pdbs_alone() {
        let cluster = InMemoryCluster::new();
        let config = ControllerConfig::default();
        cluster.add_namespace("prod", &[]);
        cluster.apply_deployment(deployment("prod", "web", 3, 3));

        let mut foreign = build_pdb(
            &Workload::from_deployment(&deployment("prod", "web", 3, 3)).unwrap(),
            "x",
        );
        foreign.metadata.name = Some("web-budget".to_string());
        foreign.metadata.labels = None;
        cluster.put_pdb(foreign);

        let snapshot = scan(&cluster, &["prod".to_string()]).await.unwrap();
        let outcome = Reconciler::new(&cluster, &config)
            .reconcile(&snapshot, &HashMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, ReconcileOutcome::default());
        assert_eq!(cluster.pdb_names(), vec!["prod/web-budget".to_string()]);
    }

    #[tokio::test]
    async fn test_reconcile_deployment_wins_name_clash() {
        let cluster = InMemoryCluster::new();
        let config = ControllerConfig::default();
        cluster.add_namespace("prod", &[]);
        cluster.apply_statefulset(statefulset("prod", "web", 5, 5));
        cluster.apply_deployment(deployment("prod", "web", 3, 3));

        let snapshot = scan(&cluster, &["prod".to_string()]).await.unwrap();
        let outcome = Reconciler::new(&cluster, &config)
            .reconcile(&snapshot, &HashMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.created, 1);
        let pdb = cluster.pdb("prod", "web-pdb-controller").unwrap();
        let owner = &pdb.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "Deployment");
        assert_eq!(
            pdb.spec.unwrap().min_available,
            Some(IntOrString::Int(2))
        );
    }

    #[tokio::test]
    async fn test_reconcile_failure_does_not_stop_the_pass() {
        let cluster = InMemoryCluster::new();
        let config = ControllerConfig::default();
        cluster.add_namespace("prod", &[]);
        cluster.apply_deployment(deployment("prod", "api", 2, 2));
        cluster.apply_deployment(deployment("prod", "web", 3, 3));
        cluster.fail_writes_for("prod", "api-pdb-controller");

        let snapshot = scan(&cluster, &["prod".to_string()]).await.unwrap();
        let outcome = Reconciler::new(&cluster, &config)
            .reconcile(&snapshot, &HashMap::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.created, 1);
        assert!(cluster.pdb("prod", "web-pdb-controller").is_some());
    }

    #[tokio::test]
    async fn test_reconcile_stops_when_cancelled() {
        let cluster = InMemoryCluster::new();
        let config = ControllerConfig::default();
        cluster.add_namespace("prod", &[]);
        cluster.apply_deployment(deployment("prod", "web", 3, 3));

        let token = CancellationToken::new();
        token.cancel();

        let snapshot = scan(&cluster, &["prod".to_string()]).await.unwrap();
        let outcome = Reconciler::new(&cluster, &config)
            .reconcile(&snapshot, &HashMap::new(), &token)
            .await;

        assert!(outcome.interrupted);
        assert_eq!(outcome.mutations(), 0);
        assert_eq!(cluster.mutations(), Vec::<Mutation>::new());
    }
}
