//! Compensation pass between the record store and the cluster.
//!
//! Records are written as pending before any cluster call, so two kinds of
//! drift can be repaired after a crash or a failed create:
//! - records stuck in pending past the timeout: their objects are deleted and
//!   the record removed;
//! - labelled cluster objects whose instance id no record knows: flagged, or
//!   deleted when the orphan policy says so.

use crate::cluster::{ClusterClient, ClusterObject, ResourceSelector};
use crate::config::{OrphanPolicy, ReconcileConfig};
use crate::deprovision::Deprovisioner;
use crate::error::{OrchestratorError, Result};
use crate::naming::{APP_LABEL_VALUE, LABEL_APP, LABEL_IDE, LABEL_INSTANCE, LABEL_USER};
use crate::operation::OperationType;
use crate::store::LifecycleStore;
use crate::workspace::WorkspaceRecord;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Cluster objects of one instance that no record refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanInstance {
    pub instance_id: String,
    pub user: Option<String>,
    pub ide: Option<String>,
    /// `kind/name` of each object.
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    /// Workspace id, or `instance/<id>` for orphans, or `cluster` for the listing.
    pub target: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub stale_removed: Vec<String>,
    pub orphans: Vec<OrphanInstance>,
    pub orphans_deleted: Vec<String>,
    pub failures: Vec<ReconcileFailure>,
}

#[derive(Clone)]
pub struct Reconciler {
    store: LifecycleStore,
    deprovisioner: Deprovisioner,
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(
        store: LifecycleStore,
        deprovisioner: Deprovisioner,
        cluster: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            deprovisioner,
            cluster,
            namespace: namespace.into(),
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        self.sweep_stale_pending(now, &mut report).await?;
        self.sweep_orphans(&mut report).await?;

        if report.failures.is_empty() {
            info!(
                stale_removed = report.stale_removed.len(),
                orphans = report.orphans.len(),
                orphans_deleted = report.orphans_deleted.len(),
                "Reconcile pass finished"
            );
        } else {
            let failed: Vec<&str> = report.failures.iter().map(|f| f.target.as_str()).collect();
            warn!(
                stale_removed = report.stale_removed.len(),
                orphans = report.orphans.len(),
                orphans_deleted = report.orphans_deleted.len(),
                ?failed,
                "Reconcile pass finished with failures"
            );
        }

        Ok(report)
    }

    async fn sweep_stale_pending(
        &self,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let timeout = i64::try_from(self.config.pending_timeout_secs).unwrap_or(i64::MAX);
        let cutoff = now - Duration::seconds(timeout);

        for record in self.store.list_stale_pending(cutoff).await? {
            match self.discard(&record).await {
                Ok(()) => {
                    info!(
                        workspace_id = %record.id,
                        created_at = %record.created_at,
                        "Removed workspace stuck in pending"
                    );
                    report.stale_removed.push(record.id.clone());
                }
                Err(e) => {
                    error!(
                        workspace_id = %record.id,
                        error = %e,
                        "Failed to remove stale pending workspace"
                    );
                    report.failures.push(ReconcileFailure {
                        target: record.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    async fn discard(&self, record: &WorkspaceRecord) -> Result<()> {
        let op_id = self
            .store
            .record_operation(&record.id, OperationType::Reconcile)
            .await?;

        let outcome = async {
            self.deprovisioner.delete(record).await?;
            self.store.remove(&record.id).await
        }
        .await;

        let error = outcome.as_ref().err().map(ToString::to_string);
        self.store.complete_operation(&op_id, error.as_deref()).await?;
        outcome
    }

    async fn sweep_orphans(&self, report: &mut ReconcileReport) -> Result<()> {
        let selector = ResourceSelector::Labels(BTreeMap::from([(
            LABEL_APP.to_string(),
            APP_LABEL_VALUE.to_string(),
        )]));

        let objects = match self.cluster.list_objects(&self.namespace, &selector).await {
            Ok(objects) => objects,
            Err(e) => {
                error!(error = %e, "Failed to list workspace objects");
                report.failures.push(ReconcileFailure {
                    target: "cluster".to_string(),
                    error: e.to_string(),
                });
                return Ok(());
            }
        };

        // Read after listing so a workspace created in between is never mistaken
        // for an orphan.
        let known = self.store.known_instance_ids().await?;

        for orphan in find_orphans(&objects, &known) {
            warn!(
                instance_id = %orphan.instance_id,
                user = ?orphan.user,
                ide = ?orphan.ide,
                objects = ?orphan.objects,
                "Cluster objects have no workspace record"
            );

            if self.config.orphans == OrphanPolicy::Delete {
                let selector = ResourceSelector::Labels(BTreeMap::from([
                    (LABEL_APP.to_string(), APP_LABEL_VALUE.to_string()),
                    (LABEL_INSTANCE.to_string(), orphan.instance_id.clone()),
                ]));
                match self.cluster.delete_resources(&self.namespace, &selector).await {
                    Ok(()) | Err(crate::cluster::ClusterError::NotFound(_)) => {
                        info!(
                            instance_id = %orphan.instance_id,
                            "Deleted orphaned workspace objects"
                        );
                        report.orphans_deleted.push(orphan.instance_id.clone());
                    }
                    Err(e) => {
                        let e = OrchestratorError::Deprovision {
                            target: format!("instance/{}", orphan.instance_id),
                            source: e,
                        };
                        error!(
                            instance_id = %orphan.instance_id,
                            error = %e,
                            "Failed to delete orphaned objects"
                        );
                        report.failures.push(ReconcileFailure {
                            target: format!("instance/{}", orphan.instance_id),
                            error: e.to_string(),
                        });
                    }
                }
            }

            report.orphans.push(orphan);
        }

        Ok(())
    }
}

/// Groups objects by instance label and keeps the instances not in `known`.
/// Objects without an instance label are skipped: they can only belong to
/// legacy records and cannot be matched safely.
pub fn find_orphans(objects: &[ClusterObject], known: &HashSet<String>) -> Vec<OrphanInstance> {
    let mut by_instance: BTreeMap<&str, OrphanInstance> = BTreeMap::new();

    for object in objects {
        let Some(instance_id) = object.labels.get(LABEL_INSTANCE) else {
            debug!(
                kind = %object.kind,
                name = %object.name,
                "Skipping object without instance label"
            );
            continue;
        };
        if known.contains(instance_id) {
            continue;
        }

        by_instance
            .entry(instance_id.as_str())
            .or_insert_with(|| OrphanInstance {
                instance_id: instance_id.clone(),
                user: object.labels.get(LABEL_USER).cloned(),
                ide: object.labels.get(LABEL_IDE).cloned(),
                objects: Vec::new(),
            })
            .objects
            .push(format!("{}/{}", object.kind, object.name));
    }

    by_instance.into_values().collect()
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ObjectKind;

    fn object(kind: ObjectKind, name: &str, inst: Option<&str>) -> ClusterObject {
        let mut labels = BTreeMap::from([
            ("app".to_string(), "workspace".to_string()),
            ("user".to_string(), "alice".to_string()),
            ("ide".to_string(), "jupyter".to_string()),
        ]);
        if let Some(inst) = inst {
            labels.insert("inst".to_string(), inst.to_string());
        }
        ClusterObject {
            kind,
            name: name.to_string(),
            labels,
        }
    }

    #[test]
    fn test_find_orphans_groups_unknown_instances() {
        let objects = vec![
            object(ObjectKind::Deployment, "deploy-jupyter-alice-aaaaaaaa", Some("aaaaaaaa")),
            object(ObjectKind::Service, "svc-jupyter-alice-aaaaaaaa", Some("aaaaaaaa")),
            object(ObjectKind::Deployment, "deploy-jupyter-alice-bbbbbbbb", Some("bbbbbbbb")),
            object(ObjectKind::Deployment, "deploy-jupyter-alice-legacy", None),
        ];
        let known = HashSet::from(["bbbbbbbb".to_string()]);

        let orphans = find_orphans(&objects, &known);

        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].instance_id, "aaaaaaaa");
        assert_eq!(orphans[0].user.as_deref(), Some("alice"));
        assert_eq!(
            orphans[0].objects,
            vec![
                "deployment/deploy-jupyter-alice-aaaaaaaa".to_string(),
                "service/svc-jupyter-alice-aaaaaaaa".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_orphans_when_everything_is_known() {
        let objects = vec![object(
            ObjectKind::Ingress,
            "ing-jupyter-alice-cccccccc",
            Some("cccccccc"),
        )];
        let known = HashSet::from(["cccccccc".to_string()]);
        assert!(find_orphans(&objects, &known).is_empty());
    }
}
