//! Integration tests for ide-orchestrator
//!
//! Drives the orchestrator end to end against an in-memory database and the
//! in-memory cluster: creation, quota, rollback, URL resolution, leases,
//! deletion of legacy records, the reaper and the reconciler.

use chrono::{Duration, Timelike, Utc};
use ide_orchestrator::cluster::ObjectKind;
use ide_orchestrator::config::{RoutingConfig, RollbackPolicy};
use ide_orchestrator::memory::{ClusterCall, FailPoint};
use ide_orchestrator::naming::WorkspaceNames;
use ide_orchestrator::provisioner::{ProvisionStage, ProvisionStep};
use ide_orchestrator::test_utils::{test_config, test_orchestrator, TEST_IMAGE};
use ide_orchestrator::workspace::ClusterNames;
use ide_orchestrator::{
    CreateWorkspaceRequest, IdeKind, InMemoryCluster, OperationStatus, OperationType,
    OrchestratorError, OrphanPolicy, PageRequest, ResourceRequest, WorkspaceFilters,
    WorkspaceRecord, WorkspaceStatus,
};
use std::sync::Arc;

fn request(owner: &str, ide: IdeKind) -> CreateWorkspaceRequest {
    CreateWorkspaceRequest {
        owner_id: owner.to_string(),
        ide_kind: ide,
        image_ref: TEST_IMAGE.to_string(),
        resources: ResourceRequest {
            cpu_units: 2,
            memory_units: 4,
        },
        data_warehouse_binding: None,
    }
}

fn routing_enabled() -> RoutingConfig {
    RoutingConfig {
        virtual_service_enabled: true,
        gateway: Some("ide-gateway".to_string()),
        host: Some("ide.example.com".to_string()),
        scheme: "https".to_string(),
    }
}

/// A record written straight to the store, bypassing creation.
fn stored_record(
    id: &str,
    instance_id: Option<&str>,
    public_url: Option<&str>,
    status: WorkspaceStatus,
    age: Duration,
) -> WorkspaceRecord {
    let created_at = Utc::now() - age;
    WorkspaceRecord {
        id: id.to_string(),
        owner_id: "alice".to_string(),
        ide_kind: IdeKind::Jupyter,
        image_ref: TEST_IMAGE.to_string(),
        resources: ResourceRequest {
            cpu_units: 1,
            memory_units: 1,
        },
        instance_id: instance_id.map(str::to_string),
        cluster_names: ClusterNames {
            deployment_name: format!("deploy-{}", id),
            service_name: format!("svc-{}", id),
            ingress_name: format!("ing-{}", id),
            virtual_service_name: None,
        },
        public_url: public_url.map(str::to_string),
        status,
        created_at,
        updated_at: created_at,
        expires_at: created_at + Duration::days(7),
        data_warehouse_binding: None,
        error_message: None,
    }
}

/// Places deployment, service and ingress for one instance in the cluster.
fn place_objects(cluster: &InMemoryCluster, owner: &str, instance_id: &str) -> WorkspaceNames {
    let names = WorkspaceNames::for_instance(IdeKind::Jupyter, owner, instance_id).unwrap();
    cluster.insert_object(ObjectKind::Deployment, &names.deployment_name, names.labels());
    cluster.insert_object(ObjectKind::Service, &names.service_name, names.labels());
    cluster.insert_object(ObjectKind::Ingress, &names.ingress_name, names.labels());
    names
}

#[tokio::test]
async fn test_create_notebook_end_to_end() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &["0a1b2c3d"]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Notebook))
        .await
        .expect("Failed to create workspace");

    assert_eq!(handle.status, WorkspaceStatus::Active);
    assert_eq!(handle.public_url.as_deref(), Some("/notebook/alice/0a1b2c3d"));

    for (kind, name) in [
        (ObjectKind::Deployment, "deploy-notebook-alice-0a1b2c3d"),
        (ObjectKind::Service, "svc-notebook-alice-0a1b2c3d"),
        (ObjectKind::Ingress, "ing-notebook-alice-0a1b2c3d"),
    ] {
        assert!(cluster.has_object(kind, name), "missing {kind} {name}");
    }
    assert!(!cluster
        .calls()
        .iter()
        .any(|call| matches!(call, ClusterCall::CreateVirtualService(_))));

    let objects = cluster.objects();
    let labels = &objects[0].labels;
    assert_eq!(labels.get("app").map(String::as_str), Some("workspace"));
    assert_eq!(labels.get("user").map(String::as_str), Some("alice"));
    assert_eq!(labels.get("ide").map(String::as_str), Some("notebook"));
    assert_eq!(labels.get("inst").map(String::as_str), Some("0a1b2c3d"));

    let record = orchestrator.get_workspace(&handle.id).await.unwrap();
    assert_eq!(record.instance_id.as_deref(), Some("0a1b2c3d"));
    assert_eq!(record.cluster_names.deployment_name, "deploy-notebook-alice-0a1b2c3d");

    let ops = orchestrator
        .get_operations(Some(&handle.id), Some(OperationType::Create), None)
        .await
        .unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OperationStatus::Success);
}

#[tokio::test]
async fn test_lease_is_seven_days_at_end_of_day() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster, test_config(), &[]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    assert_eq!(
        handle.expires_at.date_naive(),
        handle.created_at.date_naive() + Duration::days(7)
    );
    assert_eq!(
        (handle.expires_at.hour(), handle.expires_at.minute(), handle.expires_at.second()),
        (23, 59, 0)
    );
}

#[tokio::test]
async fn test_quota_denial_makes_no_cluster_calls() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &[]).await;

    for _ in 0..2 {
        orchestrator
            .create_workspace(request("alice", IdeKind::Notebook))
            .await
            .unwrap();
    }
    let creates_before = cluster.create_calls().len();

    let err = orchestrator
        .create_workspace(request("alice", IdeKind::Notebook))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::PolicyViolation(_)), "{err:?}");
    assert_eq!(cluster.create_calls().len(), creates_before);

    // Other owners and other kinds have their own budget
    orchestrator
        .create_workspace(request("bob", IdeKind::Notebook))
        .await
        .unwrap();
    orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_image_and_bad_input_fail_before_mutation() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &[]).await;

    let mut unknown = request("alice", IdeKind::Jupyter);
    unknown.image_ref = "img-missing".to_string();
    let err = orchestrator.create_workspace(unknown).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let mut no_cpu = request("alice", IdeKind::Jupyter);
    no_cpu.resources.cpu_units = 0;
    let err = orchestrator.create_workspace(no_cpu).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let err = orchestrator
        .create_workspace(request("  ", IdeKind::Jupyter))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    assert!(cluster.calls().is_empty());
    let page = orchestrator
        .list_workspaces("alice", &WorkspaceFilters::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_routing_object_failure_rolls_back_only_the_ingress() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.fail_on(FailPoint::CreateVirtualService);
    let mut config = test_config();
    config.routing = routing_enabled();
    let orchestrator = test_orchestrator(cluster.clone(), config, &["0a1b2c3d"]).await;

    let err = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap_err();

    match &err {
        OrchestratorError::PartialProvision {
            step,
            reached,
            rolled_back,
            ..
        } => {
            assert_eq!(*step, ProvisionStep::VirtualService);
            assert_eq!(*reached, ProvisionStage::Ingress);
            assert_eq!(rolled_back, &vec!["ingress/ing-jupyter-alice-0a1b2c3d".to_string()]);
        }
        other => panic!("unexpected error {other:?}"),
    }

    // The ingress delete happened, and nothing else was deleted
    let deletes: Vec<_> = cluster
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                ClusterCall::DeleteIngress(_) | ClusterCall::DeleteResources(_)
            )
        })
        .collect();
    assert_eq!(deletes.len(), 1);
    assert!(matches!(deletes[0], ClusterCall::DeleteIngress(_)));

    assert!(!cluster.has_object(ObjectKind::Ingress, "ing-jupyter-alice-0a1b2c3d"));
    assert!(cluster.has_object(ObjectKind::Deployment, "deploy-jupyter-alice-0a1b2c3d"));
    assert!(cluster.has_object(ObjectKind::Service, "svc-jupyter-alice-0a1b2c3d"));

    let page = orchestrator
        .list_workspaces("alice", &WorkspaceFilters::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].status, WorkspaceStatus::Failed);
    assert!(page.items[0].public_url.is_none());
}

#[tokio::test]
async fn test_ingress_failure_leaves_earlier_objects_under_routing_only() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.fail_on(FailPoint::CreateIngress);
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &["0a1b2c3d"]).await;

    let err = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap_err();

    assert!(
        matches!(err, OrchestratorError::ExternalApi { step: ProvisionStep::Ingress, .. }),
        "{err:?}"
    );
    assert!(cluster.has_object(ObjectKind::Deployment, "deploy-jupyter-alice-0a1b2c3d"));
    assert!(cluster.has_object(ObjectKind::Service, "svc-jupyter-alice-0a1b2c3d"));
}

#[tokio::test]
async fn test_full_rollback_tears_down_everything_reached() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.fail_on(FailPoint::CreateIngress);
    let mut config = test_config();
    config.rollback = RollbackPolicy::Full;
    let orchestrator = test_orchestrator(cluster.clone(), config, &["0a1b2c3d"]).await;

    let err = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap_err();

    match err {
        OrchestratorError::PartialProvision {
            reached,
            rolled_back,
            ..
        } => {
            assert_eq!(reached, ProvisionStage::Service);
            assert_eq!(
                rolled_back,
                vec![
                    "service/svc-jupyter-alice-0a1b2c3d".to_string(),
                    "deployment/deploy-jupyter-alice-0a1b2c3d".to_string(),
                ]
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(cluster.objects().is_empty());
}

#[tokio::test]
async fn test_routing_object_url_wins() {
    let cluster = Arc::new(InMemoryCluster::new().with_ingress_host("ingress.example.com"));
    let mut config = test_config();
    config.routing = routing_enabled();
    let orchestrator = test_orchestrator(cluster.clone(), config, &["0a1b2c3d"]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    assert_eq!(
        handle.public_url.as_deref(),
        Some("https://ide.example.com/jupyter/alice/0a1b2c3d")
    );
    let record = orchestrator.get_workspace(&handle.id).await.unwrap();
    assert_eq!(
        record.cluster_names.virtual_service_name.as_deref(),
        Some("vs-jupyter-alice-0a1b2c3d")
    );
}

#[tokio::test]
async fn test_code_editor_url_ends_with_slash() {
    let cluster = Arc::new(InMemoryCluster::new().with_ingress_host("ingress.example.com"));
    let orchestrator = test_orchestrator(cluster, test_config(), &["0a1b2c3d"]).await;

    let handle = orchestrator
        .create_workspace(request("carol", IdeKind::CodeServer))
        .await
        .unwrap();

    assert_eq!(
        handle.public_url.as_deref(),
        Some("http://ingress.example.com/code-server/carol/0a1b2c3d/")
    );
}

#[tokio::test]
async fn test_instance_collision_draws_a_new_id() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.quotas.insert(IdeKind::Jupyter, 5);
    let orchestrator =
        test_orchestrator(cluster, config, &["0000aaaa", "0000aaaa", "0000bbbb"]).await;

    let first = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();
    let second = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    assert_eq!(first.public_url.as_deref(), Some("/jupyter/alice/0000aaaa"));
    assert_eq!(second.public_url.as_deref(), Some("/jupyter/alice/0000bbbb"));
}

#[tokio::test]
async fn test_delete_workspace_removes_objects_and_record() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &["0a1b2c3d"]).await;
    let other = place_objects(&cluster, "alice", "0e0e0e0e");

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();
    orchestrator.delete_workspace(&handle.id).await.unwrap();

    assert!(!cluster.has_object(ObjectKind::Deployment, "deploy-jupyter-alice-0a1b2c3d"));
    assert!(cluster.has_object(ObjectKind::Deployment, &other.deployment_name));
    assert!(matches!(
        orchestrator.get_workspace(&handle.id).await,
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.delete_workspace(&handle.id).await,
        Err(OrchestratorError::NotFound(_))
    ));

    let ops = orchestrator
        .get_operations(Some(&handle.id), Some(OperationType::Delete), None)
        .await
        .unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OperationStatus::Success);
}

#[tokio::test]
async fn test_failed_cluster_delete_keeps_the_record() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &["0a1b2c3d"]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();
    cluster.fail_on(FailPoint::DeleteInstance("0a1b2c3d".to_string()));

    let err = orchestrator.delete_workspace(&handle.id).await.unwrap_err();
    assert_eq!(err.category(), "external_api");
    assert!(orchestrator.get_workspace(&handle.id).await.is_ok());

    let failed = orchestrator
        .get_operations(Some(&handle.id), None, Some(OperationStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.is_some());
}

#[tokio::test]
async fn test_legacy_record_deleted_by_url_suffix() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &[]).await;
    let legacy = place_objects(&cluster, "alice", "cafebabe");
    let neighbour = place_objects(&cluster, "alice", "0badf00d");

    let record = stored_record(
        "legacy-1",
        None,
        Some("https://portal.example.com/jupyter/alice/cafebabe"),
        WorkspaceStatus::Active,
        Duration::hours(1),
    );
    orchestrator.store().insert(&record).await.unwrap();

    orchestrator.delete_workspace("legacy-1").await.unwrap();

    assert!(!cluster.has_object(ObjectKind::Deployment, &legacy.deployment_name));
    assert!(cluster.has_object(ObjectKind::Deployment, &neighbour.deployment_name));
}

#[tokio::test]
async fn test_legacy_record_without_suffix_deletes_owner_wide() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &[]).await;
    place_objects(&cluster, "alice", "cafebabe");
    place_objects(&cluster, "alice", "0badf00d");
    let bob = place_objects(&cluster, "bob", "0000b0b0");

    let record = stored_record(
        "legacy-2",
        None,
        Some("https://portal.example.com/jupyter/alice"),
        WorkspaceStatus::Active,
        Duration::hours(1),
    );
    orchestrator.store().insert(&record).await.unwrap();

    orchestrator.delete_workspace("legacy-2").await.unwrap();

    // Every alice/jupyter object matches the instance-less selector
    let remaining = cluster.objects();
    assert_eq!(remaining.len(), 3);
    assert!(remaining.iter().all(|o| o.name.ends_with("0000b0b0")));
    assert!(cluster.has_object(ObjectKind::Service, &bob.service_name));
}

#[tokio::test]
async fn test_extend_workspace() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.max_lease_days = Some(14);
    let orchestrator = test_orchestrator(cluster, config, &[]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    let extended = orchestrator.extend_workspace(&handle.id, 3).await.unwrap();
    assert_eq!(extended.expires_at, handle.expires_at + Duration::days(3));

    let err = orchestrator.extend_workspace(&handle.id, 0).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let err = orchestrator.extend_workspace(&handle.id, 30).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::PolicyViolation(_)));

    let err = orchestrator.extend_workspace("missing", 1).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_extend_without_cap_is_unbounded() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster, test_config(), &[]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    let extended = orchestrator.extend_workspace(&handle.id, 365).await.unwrap();
    assert_eq!(extended.expires_at, handle.expires_at + Duration::days(365));
}

#[tokio::test]
async fn test_extend_out_of_range_is_rejected() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster, test_config(), &[]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    let err = orchestrator
        .extend_workspace(&handle.id, u32::MAX)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    let record = orchestrator.get_workspace(&handle.id).await.unwrap();
    assert_eq!(record.expires_at, handle.expires_at);

    let ops = orchestrator
        .get_operations(Some(&handle.id), Some(OperationType::Extend), None)
        .await
        .unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OperationStatus::Failed);
}

#[tokio::test]
async fn test_extend_with_huge_cap_behaves_as_unbounded() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.max_lease_days = Some(u32::MAX);
    let orchestrator = test_orchestrator(cluster, config, &[]).await;

    let handle = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    let extended = orchestrator.extend_workspace(&handle.id, 30).await.unwrap();
    assert_eq!(extended.expires_at, handle.expires_at + Duration::days(30));
}

#[tokio::test]
async fn test_extend_unknown_workspace_records_no_operation() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster, test_config(), &[]).await;

    let err = orchestrator.extend_workspace("missing", 1).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let ops = orchestrator
        .get_operations(Some("missing"), None, None)
        .await
        .unwrap();
    assert!(ops.is_empty());
}

#[tokio::test]
async fn test_create_with_out_of_range_lease_fails_cleanly() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.lease_days = 4_000_000_000;
    let orchestrator = test_orchestrator(cluster.clone(), config, &[]).await;

    let err = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert!(cluster.create_calls().is_empty());
}

#[tokio::test]
async fn test_reaper_continues_past_a_failing_record() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.quotas.insert(IdeKind::Notebook, 5);
    let orchestrator = test_orchestrator(
        cluster.clone(),
        config,
        &["00000001", "00000002", "00000003"],
    )
    .await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let handle = orchestrator
            .create_workspace(request("alice", IdeKind::Notebook))
            .await
            .unwrap();
        ids.push(handle.id);
    }
    cluster.fail_on(FailPoint::DeleteInstance("00000002".to_string()));

    let report = orchestrator.reap(Utc::now() + Duration::days(30)).await.unwrap();

    assert_eq!(report.examined, 3);
    assert_eq!(report.failed_ids(), vec![ids[1].as_str()]);
    assert_eq!(report.reclaimed.len(), 2);
    assert!(report.reclaimed.contains(&ids[0]));
    assert!(report.reclaimed.contains(&ids[2]));

    assert!(orchestrator.get_workspace(&ids[0]).await.is_err());
    assert!(orchestrator.get_workspace(&ids[1]).await.is_ok());
    assert!(orchestrator.get_workspace(&ids[2]).await.is_err());
    assert!(cluster.has_object(ObjectKind::Deployment, "deploy-notebook-alice-00000002"));
    assert!(!cluster.has_object(ObjectKind::Deployment, "deploy-notebook-alice-00000001"));
}

#[tokio::test]
async fn test_reaper_ignores_live_leases_and_reclaims_failed_records() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &[]).await;

    let live = orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();

    let failed = stored_record(
        "failed-1",
        Some("0000fa11"),
        None,
        WorkspaceStatus::Failed,
        Duration::days(10),
    );
    orchestrator.store().insert(&failed).await.unwrap();
    place_objects(&cluster, "alice", "0000fa11");

    let report = orchestrator.reap(Utc::now()).await.unwrap();

    assert_eq!(report.reclaimed, vec!["failed-1".to_string()]);
    assert!(report.failures.is_empty());
    assert!(orchestrator.get_workspace(&live.id).await.is_ok());
    assert!(cluster
        .objects()
        .iter()
        .all(|o| o.labels.get("inst").map(String::as_str) != Some("0000fa11")));
}

#[tokio::test]
async fn test_reconciler_removes_stale_pending_and_flags_orphans() {
    let cluster = Arc::new(InMemoryCluster::new());
    let orchestrator = test_orchestrator(cluster.clone(), test_config(), &[]).await;

    let stale = stored_record(
        "stale-1",
        Some("0000beef"),
        None,
        WorkspaceStatus::Pending,
        Duration::hours(2),
    );
    orchestrator.store().insert(&stale).await.unwrap();
    place_objects(&cluster, "alice", "0000beef");

    let fresh = stored_record(
        "fresh-1",
        Some("0000f00d"),
        None,
        WorkspaceStatus::Pending,
        Duration::seconds(30),
    );
    orchestrator.store().insert(&fresh).await.unwrap();
    place_objects(&cluster, "alice", "0000f00d");

    let orphan = place_objects(&cluster, "mallory", "0000dead");

    let report = orchestrator.reconcile(Utc::now()).await.unwrap();

    assert_eq!(report.stale_removed, vec!["stale-1".to_string()]);
    assert!(orchestrator.get_workspace("stale-1").await.is_err());
    assert!(orchestrator.get_workspace("fresh-1").await.is_ok());

    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].instance_id, "0000dead");
    assert_eq!(report.orphans[0].objects.len(), 3);
    assert!(report.orphans_deleted.is_empty());
    assert!(cluster.has_object(ObjectKind::Deployment, &orphan.deployment_name));
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_reconciler_deletes_orphans_when_configured() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.reconcile.orphans = OrphanPolicy::Delete;
    let orchestrator = test_orchestrator(cluster.clone(), config, &["0a1b2c3d"]).await;

    orchestrator
        .create_workspace(request("alice", IdeKind::Jupyter))
        .await
        .unwrap();
    let orphan = place_objects(&cluster, "mallory", "0000dead");

    let report = orchestrator.reconcile(Utc::now()).await.unwrap();

    assert_eq!(report.orphans_deleted, vec!["0000dead".to_string()]);
    assert!(!cluster.has_object(ObjectKind::Deployment, &orphan.deployment_name));
    assert!(cluster.has_object(ObjectKind::Deployment, "deploy-jupyter-alice-0a1b2c3d"));
}

#[tokio::test]
async fn test_list_workspaces_filters_and_pages() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut config = test_config();
    config.quotas.insert(IdeKind::Jupyter, 10);
    let orchestrator = test_orchestrator(cluster, config, &[]).await;

    for _ in 0..3 {
        orchestrator
            .create_workspace(request("alice", IdeKind::Jupyter))
            .await
            .unwrap();
    }
    orchestrator
        .create_workspace(request("alice", IdeKind::Vscode))
        .await
        .unwrap();
    orchestrator
        .create_workspace(request("bob", IdeKind::Jupyter))
        .await
        .unwrap();

    let all = orchestrator
        .list_workspaces("alice", &WorkspaceFilters::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(all.total, 4);
    assert!(all.items.iter().all(|w| w.owner_id == "alice"));

    let jupyter = WorkspaceFilters {
        ide_kind: Some(IdeKind::Jupyter),
        status: Some(WorkspaceStatus::Active),
    };
    let first = orchestrator
        .list_workspaces("alice", &jupyter, PageRequest::new(Some(1), Some(2)))
        .await
        .unwrap();
    let second = orchestrator
        .list_workspaces("alice", &jupyter, PageRequest::new(Some(2), Some(2)))
        .await
        .unwrap();

    assert_eq!(first.total, 3);
    assert_eq!(first.items.len(), 2);
    assert_eq!(second.items.len(), 1);
    assert!(first.items.iter().all(|w| w.ide_kind == IdeKind::Jupyter));
}
