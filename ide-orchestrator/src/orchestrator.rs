use crate::cluster::ClusterClient;
use crate::config::OrchestratorConfig;
use crate::deprovision::Deprovisioner;
use crate::error::{OrchestratorError, Result};
use crate::image::ImageCatalog;
use crate::naming::{owner_segment, NamingScheme, WorkspaceNames};
use crate::operation::{Operation, OperationStatus, OperationType};
use crate::provisioner::{ProvisionRequest, ResourceProvisioner};
use crate::quota::QuotaGate;
use crate::reaper::{ExpirationReaper, ReapReport};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::LifecycleStore;
use crate::url::{RouteInputs, UrlResolver};
use crate::workspace::{
    lease_expiry, ClusterNames, CreateWorkspaceRequest, PageRequest, WorkspaceFilters,
    WorkspaceHandle, WorkspacePage, WorkspaceRecord, WorkspaceStatus,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Fresh instance ids drawn before giving up on a collision-free name.
const MAX_NAME_ATTEMPTS: usize = 5;

/// Entry point for every workspace operation.
#[derive(Clone)]
pub struct WorkspaceOrchestrator {
    store: LifecycleStore,
    deprovisioner: Deprovisioner,
    images: Arc<dyn ImageCatalog>,
    config: Arc<OrchestratorConfig>,
    naming: NamingScheme,
    quota: QuotaGate,
    provisioner: ResourceProvisioner,
    resolver: UrlResolver,
    reaper: ExpirationReaper,
    reconciler: Reconciler,
}

impl WorkspaceOrchestrator {
    pub fn new(
        pool: SqlitePool,
        cluster: Arc<dyn ClusterClient>,
        images: Arc<dyn ImageCatalog>,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        let store = LifecycleStore::new(pool);
        let deprovisioner = Deprovisioner::new(cluster.clone(), config.namespace.clone());

        Self {
            quota: QuotaGate::new(config.quotas.clone()),
            provisioner: ResourceProvisioner::new(cluster.clone(), config.clone()),
            resolver: UrlResolver::new(
                config.routing.scheme.clone(),
                config.public_base_url.clone(),
            ),
            reaper: ExpirationReaper::new(store.clone(), deprovisioner.clone()),
            reconciler: Reconciler::new(
                store.clone(),
                deprovisioner.clone(),
                cluster,
                config.namespace.clone(),
                config.reconcile.clone(),
            ),
            naming: NamingScheme::random(),
            deprovisioner,
            store,
            images,
            config,
        }
    }

    /// Replaces the instance id source.
    pub fn with_naming(mut self, naming: NamingScheme) -> Self {
        self.naming = naming;
        self
    }

    pub fn store(&self) -> &LifecycleStore {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validates, checks quota, then provisions. The record is written as
    /// pending before the first cluster call and only becomes active once
    /// every mandatory object exists.
    #[instrument(
        skip_all,
        fields(owner = %req.owner_id, ide = %req.ide_kind, image = %req.image_ref)
    )]
    pub async fn create_workspace(&self, req: CreateWorkspaceRequest) -> Result<WorkspaceHandle> {
        self.validate_create(&req)?;

        let image = self.images.lookup(&req.image_ref).await?;
        self.quota.enforce(&self.store, req.ide_kind, &req.owner_id).await?;
        let names = self.allocate_names(&req).await?;

        let now = Utc::now();
        let record = WorkspaceRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: req.owner_id.clone(),
            ide_kind: req.ide_kind,
            image_ref: req.image_ref.clone(),
            resources: req.resources,
            instance_id: Some(names.instance_id.clone()),
            cluster_names: ClusterNames::from(&names),
            public_url: None,
            status: WorkspaceStatus::Pending,
            created_at: now,
            updated_at: now,
            expires_at: lease_expiry(now, self.config.lease_days)?,
            data_warehouse_binding: req.data_warehouse_binding.clone(),
            error_message: None,
        };
        self.store.insert(&record).await?;
        let op_id = self.store.record_operation(&record.id, OperationType::Create).await?;

        let provisioned = self
            .provisioner
            .create(&ProvisionRequest {
                names: &names,
                image_url: &image.image_url,
                cpu_units: req.resources.cpu_units,
                memory_units: req.resources.memory_units,
                secret_ref: req.data_warehouse_binding.as_deref(),
            })
            .await;

        let result = match provisioned {
            Ok(result) => result,
            Err(e) => {
                self.fail_create(&record.id, &op_id, &e).await;
                return Err(e);
            }
        };

        let public_url = self.resolver.resolve(&RouteInputs {
            virtual_service: result.virtual_service.as_ref(),
            ingress: Some(&result.ingress),
            path: &names.path,
            ide: names.ide,
        });

        let vs_name = result.virtual_service.as_ref().map(|vs| vs.name.as_str());
        let active = self.store.activate(&record.id, &public_url, vs_name).await?;
        self.store.complete_operation(&op_id, None).await?;

        info!(
            workspace_id = %active.id,
            instance_id = %names.instance_id,
            url = %public_url,
            expires_at = %active.expires_at,
            "Workspace created"
        );

        Ok(WorkspaceHandle::from(&active))
    }

    fn validate_create(&self, req: &CreateWorkspaceRequest) -> Result<()> {
        if req.owner_id.trim().is_empty() {
            return Err(OrchestratorError::Validation("owner_id is required".into()));
        }
        if req.image_ref.trim().is_empty() {
            return Err(OrchestratorError::Validation("image_ref is required".into()));
        }

        let limits = &self.config.resources;
        let res = req.resources;
        if res.cpu_units == 0 || res.cpu_units > limits.max_cpu_units {
            return Err(OrchestratorError::Validation(format!(
                "cpu_units must be between 1 and {}, got {}",
                limits.max_cpu_units, res.cpu_units
            )));
        }
        if res.memory_units == 0 || res.memory_units > limits.max_memory_units {
            return Err(OrchestratorError::Validation(format!(
                "memory_units must be between 1 and {}, got {}",
                limits.max_memory_units, res.memory_units
            )));
        }

        owner_segment(req.ide_kind, &req.owner_id).map(|_| ())
    }

    /// Draws instance ids until one is not referenced by any record.
    async fn allocate_names(&self, req: &CreateWorkspaceRequest) -> Result<WorkspaceNames> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let names = self.naming.generate(req.ide_kind, &req.owner_id)?;
            if !self.store.instance_in_use(&names.instance_id).await? {
                return Ok(names);
            }
            warn!(instance_id = %names.instance_id, "Instance id already in use, drawing another");
        }

        Err(OrchestratorError::InvalidState(format!(
            "No free instance id after {} attempts",
            MAX_NAME_ATTEMPTS
        )))
    }

    async fn fail_create(&self, workspace_id: &str, op_id: &str, cause: &OrchestratorError) {
        let message = cause.to_string();
        error!(
            workspace_id,
            category = cause.category(),
            error = %message,
            "Workspace creation failed"
        );

        if let Err(e) = self.store.mark_failed(workspace_id, &message).await {
            error!(workspace_id, error = %e, "Failed to mark workspace as failed");
        }
        if let Err(e) = self.store.complete_operation(op_id, Some(&message)).await {
            error!(workspace_id, error = %e, "Failed to record create failure");
        }
    }

    #[instrument(skip(self))]
    pub async fn get_workspace(&self, id: &str) -> Result<WorkspaceRecord> {
        self.store.get(id).await
    }

    pub async fn list_workspaces(
        &self,
        owner: &str,
        filters: &WorkspaceFilters,
        page: PageRequest,
    ) -> Result<WorkspacePage> {
        self.store.list(owner, filters, page).await
    }

    /// Deletes the cluster objects, then the record. The record survives a
    /// failed cluster delete so the call can be repeated.
    #[instrument(skip(self))]
    pub async fn delete_workspace(&self, id: &str) -> Result<()> {
        let record = self.store.get(id).await?;
        let op_id = self.store.record_operation(id, OperationType::Delete).await?;

        let outcome = async {
            let source = self.deprovisioner.delete(&record).await?;
            self.store.remove(id).await?;
            Ok::<_, OrchestratorError>(source)
        }
        .await;

        match outcome {
            Ok(source) => {
                self.store.complete_operation(&op_id, None).await?;
                info!(workspace_id = id, selector = %source, "Workspace deleted");
                Ok(())
            }
            Err(e) => {
                error!(workspace_id = id, error = %e, "Workspace deletion failed");
                self.store.complete_operation(&op_id, Some(&e.to_string())).await?;
                Err(e)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn extend_workspace(&self, id: &str, days: u32) -> Result<WorkspaceHandle> {
        self.store.get(id).await?;
        let op_id = self.store.record_operation(id, OperationType::Extend).await?;

        match self
            .store
            .extend_expiration(id, days, self.config.max_lease_days)
            .await
        {
            Ok(record) => {
                self.store.complete_operation(&op_id, None).await?;
                info!(workspace_id = id, days, expires_at = %record.expires_at, "Lease extended");
                Ok(WorkspaceHandle::from(&record))
            }
            Err(e) => {
                self.store.complete_operation(&op_id, Some(&e.to_string())).await?;
                Err(e)
            }
        }
    }

    /// One reaper sweep at `now`.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<ReapReport> {
        self.reaper.sweep(now).await
    }

    /// One reconcile pass at `now`.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        self.reconciler.run(now).await
    }

    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        self.store.get_operation(id).await
    }

    pub async fn get_operations(
        &self,
        workspace_id: Option<&str>,
        operation_type: Option<OperationType>,
        status: Option<OperationStatus>,
    ) -> Result<Vec<Operation>> {
        self.store
            .get_operations(workspace_id, operation_type, status)
            .await
    }
}

impl fmt::Debug for WorkspaceOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkspaceOrchestrator")
            .field("namespace", &self.config.namespace)
            .field("provisioner", &self.provisioner)
            .finish_non_exhaustive()
    }
}
