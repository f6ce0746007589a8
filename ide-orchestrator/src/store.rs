//! Persistence of workspace records and their leases.

use crate::error::{OrchestratorError, Result};
use crate::naming::IdeKind;
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::quota::ActiveWorkspaceCounter;
use crate::workspace::{
    add_days, ClusterNames, PageRequest, ResourceRequest, WorkspaceFilters, WorkspaceHandle,
    WorkspacePage, WorkspaceRecord, WorkspaceStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct LifecycleStore {
    pool: SqlitePool,
}

impl LifecycleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Writes a new record as-is.
    #[instrument(skip_all, fields(workspace_id = %record.id))]
    pub async fn insert(&self, record: &WorkspaceRecord) -> Result<()> {
        if record.expires_at <= record.created_at {
            return Err(OrchestratorError::Validation(format!(
                "Lease for {} ends before it starts",
                record.id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO workspaces (
                id, owner_id, ide_kind, image_ref, cpu_units, memory_units, instance_id,
                deployment_name, service_name, ingress_name, virtual_service_name, public_url,
                status, created_at, updated_at, expires_at, data_warehouse_binding, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(record.ide_kind)
        .bind(&record.image_ref)
        .bind(i64::from(record.resources.cpu_units))
        .bind(i64::from(record.resources.memory_units))
        .bind(&record.instance_id)
        .bind(&record.cluster_names.deployment_name)
        .bind(&record.cluster_names.service_name)
        .bind(&record.cluster_names.ingress_name)
        .bind(&record.cluster_names.virtual_service_name)
        .bind(&record.public_url)
        .bind(record.status)
        .bind(record.created_at.timestamp())
        .bind(record.updated_at.timestamp())
        .bind(record.expires_at.timestamp())
        .bind(&record.data_warehouse_binding)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Moves a pending record to active with its resolved URL.
    pub async fn activate(
        &self,
        id: &str,
        public_url: &str,
        virtual_service_name: Option<&str>,
    ) -> Result<WorkspaceRecord> {
        let result = sqlx::query(
            "UPDATE workspaces
             SET status = ?, public_url = ?, virtual_service_name = ?, updated_at = ?,
                 error_message = NULL
             WHERE id = ? AND status = ?",
        )
        .bind(WorkspaceStatus::Active)
        .bind(public_url)
        .bind(virtual_service_name)
        .bind(Utc::now().timestamp())
        .bind(id)
        .bind(WorkspaceStatus::Pending)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::InvalidState(format!(
                "Workspace {} is not pending",
                id
            )));
        }

        self.get(id).await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE workspaces SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(WorkspaceStatus::Failed)
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<WorkspaceRecord> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Workspace not found: {}", id)))?;

        Ok(row.into())
    }

    /// Hard-deletes the record.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("Workspace not found: {}", id)));
        }

        Ok(())
    }

    /// Whether any record, in any state, already uses the instance id.
    pub async fn instance_in_use(&self, instance_id: &str) -> Result<bool> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM workspaces WHERE instance_id = ?")
                .bind(instance_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count > 0)
    }

    pub async fn list(
        &self,
        owner: &str,
        filters: &WorkspaceFilters,
        page: PageRequest,
    ) -> Result<WorkspacePage> {
        let mut predicate = " WHERE owner_id = ?".to_string();
        if filters.ide_kind.is_some() {
            predicate.push_str(" AND ide_kind = ?");
        }
        if filters.status.is_some() {
            predicate.push_str(" AND status = ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM workspaces{}", predicate);
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql).bind(owner);
        if let Some(ide) = filters.ide_kind {
            count_query = count_query.bind(ide);
        }
        if let Some(status) = filters.status {
            count_query = count_query.bind(status);
        }
        let (total,) = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            "SELECT * FROM workspaces{} ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
            predicate
        );
        let mut q = sqlx::query_as::<_, WorkspaceRow>(&list_sql).bind(owner);
        if let Some(ide) = filters.ide_kind {
            q = q.bind(ide);
        }
        if let Some(status) = filters.status {
            q = q.bind(status);
        }
        let rows = q
            .bind(i64::from(page.page_size))
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(WorkspaceRecord::from)
            .map(|record| WorkspaceHandle::from(&record))
            .collect();

        Ok(WorkspacePage {
            items,
            total: u64::try_from(total).unwrap_or_default(),
            page: page.page,
            page_size: page.page_size,
        })
    }

    /// Active or failed records whose lease ended before `now`.
    #[instrument(skip(self))]
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<WorkspaceRecord>> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces
             WHERE status IN (?, ?) AND expires_at < ?
             ORDER BY expires_at",
        )
        .bind(WorkspaceStatus::Active)
        .bind(WorkspaceStatus::Failed)
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Expired workspaces found");
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Pending records created before `cutoff`.
    pub async fn list_stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkspaceRecord>> {
        let rows = sqlx::query_as::<_, WorkspaceRow>(
            "SELECT * FROM workspaces WHERE status = ? AND created_at < ? ORDER BY created_at",
        )
        .bind(WorkspaceStatus::Pending)
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every instance id referenced by any record, whatever its status.
    pub async fn known_instance_ids(&self) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT instance_id FROM workspaces WHERE instance_id IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Pushes `expires_at` out by `days`. `max_lease_days` caps the total
    /// lease length measured from creation; `None` leaves it unbounded.
    pub async fn extend_expiration(
        &self,
        id: &str,
        days: u32,
        max_lease_days: Option<u32>,
    ) -> Result<WorkspaceRecord> {
        if days == 0 {
            return Err(OrchestratorError::Validation(
                "Extension must be at least one day".to_string(),
            ));
        }

        let record = self.get(id).await?;
        if record.status != WorkspaceStatus::Active {
            return Err(OrchestratorError::InvalidState(format!(
                "Only active workspaces can be extended; {} is {:?}",
                id, record.status
            )));
        }

        let expires_at = add_days(record.expires_at, days)?;
        // A cap too large to represent cannot be exceeded.
        let cap = max_lease_days
            .and_then(|max| TimeDelta::try_days(i64::from(max)).map(|cap| (max, cap)));
        if let Some((max, cap)) = cap {
            if expires_at - record.created_at > cap {
                return Err(OrchestratorError::PolicyViolation(format!(
                    "Lease of workspace {} cannot exceed {} days",
                    id, max
                )));
            }
        }

        sqlx::query("UPDATE workspaces SET expires_at = ?, updated_at = ? WHERE id = ?")
            .bind(expires_at.timestamp())
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get(id).await
    }

    pub async fn record_operation(
        &self,
        workspace_id: &str,
        operation_type: OperationType,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO operations (id, workspace_id, operation_type, status, started_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(operation_type)
        .bind(OperationStatus::Running)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn complete_operation(&self, id: &str, error: Option<&str>) -> Result<()> {
        let status = if error.is_some() {
            OperationStatus::Failed
        } else {
            OperationStatus::Success
        };

        sqlx::query("UPDATE operations SET status = ?, completed_at = ?, error = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        let row = sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("Operation not found: {}", id)))?;

        Ok(row.into())
    }

    pub async fn get_operations(
        &self,
        workspace_id: Option<&str>,
        operation_type: Option<OperationType>,
        status: Option<OperationStatus>,
    ) -> Result<Vec<Operation>> {
        let mut query = "SELECT * FROM operations WHERE 1=1".to_string();

        if workspace_id.is_some() {
            query.push_str(" AND workspace_id = ?");
        }
        if operation_type.is_some() {
            query.push_str(" AND operation_type = ?");
        }
        if status.is_some() {
            query.push_str(" AND status = ?");
        }

        query.push_str(" ORDER BY started_at DESC");

        let mut q = sqlx::query_as::<_, OperationRow>(&query);

        if let Some(wid) = workspace_id {
            q = q.bind(wid);
        }
        if let Some(ot) = operation_type {
            q = q.bind(ot);
        }
        if let Some(s) = status {
            q = q.bind(s);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }
}

#[async_trait]
impl ActiveWorkspaceCounter for LifecycleStore {
    /// Pending records count too: they hold a slot while provisioning.
    async fn count_active(&self, owner: &str, ide: IdeKind) -> Result<u32> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workspaces
             WHERE owner_id = ? AND ide_kind = ? AND status IN (?, ?)",
        )
        .bind(owner)
        .bind(ide)
        .bind(WorkspaceStatus::Pending)
        .bind(WorkspaceStatus::Active)
        .fetch_one(&self.pool)
        .await?;

        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

// Internal row types for sqlx
#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    owner_id: String,
    ide_kind: IdeKind,
    image_ref: String,
    cpu_units: i64,
    memory_units: i64,
    instance_id: Option<String>,
    deployment_name: String,
    service_name: String,
    ingress_name: String,
    virtual_service_name: Option<String>,
    public_url: Option<String>,
    status: WorkspaceStatus,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
    data_warehouse_binding: Option<String>,
    error_message: Option<String>,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    workspace_id: String,
    operation_type: OperationType,
    status: OperationStatus,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

fn from_timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

impl From<WorkspaceRow> for WorkspaceRecord {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            ide_kind: row.ide_kind,
            image_ref: row.image_ref,
            resources: ResourceRequest {
                cpu_units: u32::try_from(row.cpu_units).unwrap_or_default(),
                memory_units: u32::try_from(row.memory_units).unwrap_or_default(),
            },
            instance_id: row.instance_id,
            cluster_names: ClusterNames {
                deployment_name: row.deployment_name,
                service_name: row.service_name,
                ingress_name: row.ingress_name,
                virtual_service_name: row.virtual_service_name,
            },
            public_url: row.public_url,
            status: row.status,
            created_at: from_timestamp(row.created_at),
            updated_at: from_timestamp(row.updated_at),
            expires_at: from_timestamp(row.expires_at),
            data_warehouse_binding: row.data_warehouse_binding,
            error_message: row.error_message,
        }
    }
}

impl From<OperationRow> for Operation {
    fn from(row: OperationRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            operation_type: row.operation_type,
            status: row.status,
            started_at: from_timestamp(row.started_at),
            completed_at: row.completed_at.map(from_timestamp),
            error: row.error,
        }
    }
}
