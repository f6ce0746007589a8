//! Reclamation of workspaces whose lease has ended.

use crate::deprovision::Deprovisioner;
use crate::error::Result;
use crate::operation::OperationType;
use crate::store::LifecycleStore;
use crate::workspace::WorkspaceRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReapFailure {
    pub workspace_id: String,
    pub error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub examined: usize,
    pub reclaimed: Vec<String>,
    pub failures: Vec<ReapFailure>,
}

impl ReapReport {
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.workspace_id.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ExpirationReaper {
    store: LifecycleStore,
    deprovisioner: Deprovisioner,
}

impl ExpirationReaper {
    pub fn new(store: LifecycleStore, deprovisioner: Deprovisioner) -> Self {
        Self {
            store,
            deprovisioner,
        }
    }

    /// Deprovisions and removes every record expired at `now`, one at a time.
    /// A failing record is logged and skipped; the sweep always runs to the end.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        let expired = self.store.list_expired(now).await?;
        let mut report = ReapReport {
            examined: expired.len(),
            ..Default::default()
        };

        for record in &expired {
            match self.reclaim(record).await {
                Ok(()) => {
                    info!(
                        workspace_id = %record.id,
                        owner = %record.owner_id,
                        expires_at = %record.expires_at,
                        "Lease expired, workspace reclaimed"
                    );
                    report.reclaimed.push(record.id.clone());
                }
                Err(e) => {
                    error!(
                        workspace_id = %record.id,
                        error = %e,
                        "Failed to reclaim expired workspace"
                    );
                    report.failures.push(ReapFailure {
                        workspace_id: record.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.failures.is_empty() {
            info!(
                examined = report.examined,
                reclaimed = report.reclaimed.len(),
                "Reaper sweep finished"
            );
        } else {
            warn!(
                examined = report.examined,
                reclaimed = report.reclaimed.len(),
                failed = ?report.failed_ids(),
                "Reaper sweep finished with failures"
            );
        }

        Ok(report)
    }

    async fn reclaim(&self, record: &WorkspaceRecord) -> Result<()> {
        let op_id = self.store.record_operation(&record.id, OperationType::Reap).await?;

        let outcome = async {
            self.deprovisioner.delete(record).await?;
            self.store.remove(&record.id).await
        }
        .await;

        let error = outcome.as_ref().err().map(ToString::to_string);
        self.store.complete_operation(&op_id, error.as_deref()).await?;
        outcome
    }
}
