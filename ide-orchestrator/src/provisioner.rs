//! Ordered creation of a workspace's cluster objects.
//!
//! Steps run strictly in order (deployment, service, ingress, optional routing
//! object) and each reported status is validated before the next step starts.
//! On failure the reached [`ProvisionStage`] decides what
//! [`rollback_scope`] tears down under the configured [`RollbackPolicy`].

use crate::cluster::{
    ClusterClient, ClusterError, ClusterResult, DeploymentSpec, DeploymentStatus, IngressSpec,
    IngressStatus, ObjectKind, ObjectRefs, ResourceLimits, ResourceSelector, ServiceSpec,
    ServiceStatus, VirtualServiceSpec, VirtualServiceStatus,
};
use crate::config::{OrchestratorConfig, RollbackPolicy};
use crate::error::{OrchestratorError, Result};
use crate::naming::{IdeKind, WorkspaceNames};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The step that was running when provisioning stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStep {
    Deployment,
    Service,
    Ingress,
    VirtualService,
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionStep::Deployment => "deployment",
            ProvisionStep::Service => "service",
            ProvisionStep::Ingress => "ingress",
            ProvisionStep::VirtualService => "virtual service",
        })
    }
}

/// How far provisioning got. Each stage includes the objects of the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisionStage {
    None,
    Deployment,
    Service,
    Ingress,
    Routing,
}

impl ProvisionStage {
    /// Objects existing at this stage, in creation order.
    pub fn objects(&self) -> &'static [ObjectKind] {
        const ALL: [ObjectKind; 4] = [
            ObjectKind::Deployment,
            ObjectKind::Service,
            ObjectKind::Ingress,
            ObjectKind::VirtualService,
        ];
        match self {
            ProvisionStage::None => &[],
            ProvisionStage::Deployment => &ALL[..1],
            ProvisionStage::Service => &ALL[..2],
            ProvisionStage::Ingress => &ALL[..3],
            ProvisionStage::Routing => &ALL[..],
        }
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProvisionStage::None => "none",
            ProvisionStage::Deployment => "deployment",
            ProvisionStage::Service => "deployment+service",
            ProvisionStage::Ingress => "deployment+service+ingress",
            ProvisionStage::Routing => "deployment+service+ingress+routing",
        })
    }
}

/// Objects to delete, newest first, after `failed` broke at `reached`.
pub fn rollback_scope(
    policy: RollbackPolicy,
    failed: ProvisionStep,
    reached: ProvisionStage,
) -> Vec<ObjectKind> {
    let existing = reached.objects().iter().rev().copied();
    match policy {
        RollbackPolicy::Full => existing.collect(),
        RollbackPolicy::RoutingOnly if failed == ProvisionStep::VirtualService => existing
            .filter(|kind| matches!(kind, ObjectKind::Ingress | ObjectKind::VirtualService))
            .collect(),
        RollbackPolicy::RoutingOnly => Vec::new(),
    }
}

/// Inputs for one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionRequest<'a> {
    pub names: &'a WorkspaceNames,
    pub image_url: &'a str,
    pub cpu_units: u32,
    pub memory_units: u32,
    pub secret_ref: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ProvisionResult {
    pub reached: ProvisionStage,
    pub deployment: DeploymentStatus,
    pub service: ServiceStatus,
    pub ingress: IngressStatus,
    pub virtual_service: Option<VirtualServiceStatus>,
}

#[derive(Clone)]
pub struct ResourceProvisioner {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<OrchestratorConfig>,
}

impl ResourceProvisioner {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: Arc<OrchestratorConfig>) -> Self {
        Self { cluster, config }
    }

    #[instrument(
        skip_all,
        fields(instance_id = %request.names.instance_id, ide = %request.names.ide)
    )]
    pub async fn create(&self, request: &ProvisionRequest<'_>) -> Result<ProvisionResult> {
        let names = request.names;
        let mut reached = ProvisionStage::None;

        let deployment = match self
            .cluster
            .create_deployment(&self.deployment_spec(request))
            .await
        {
            Ok(status) => status,
            Err(source) => {
                return Err(self.abort(ProvisionStep::Deployment, reached, names, source).await)
            }
        };
        reached = ProvisionStage::Deployment;
        if let Err(source) = validate_deployment(&deployment) {
            return Err(self.abort(ProvisionStep::Deployment, reached, names, source).await);
        }
        debug!(name = %deployment.name, "Deployment created");

        let service = match self.cluster.create_service(&self.service_spec(names)).await {
            Ok(status) => status,
            Err(source) => {
                return Err(self.abort(ProvisionStep::Service, reached, names, source).await)
            }
        };
        reached = ProvisionStage::Service;
        if let Err(source) = validate_service(&service) {
            return Err(self.abort(ProvisionStep::Service, reached, names, source).await);
        }
        debug!(name = %service.name, "Service created");

        let ingress = match self.cluster.create_ingress(&self.ingress_spec(names)).await {
            Ok(status) => status,
            Err(source) => {
                return Err(self.abort(ProvisionStep::Ingress, reached, names, source).await)
            }
        };
        reached = ProvisionStage::Ingress;
        if let Err(source) = validate_ingress(&ingress) {
            return Err(self.abort(ProvisionStep::Ingress, reached, names, source).await);
        }
        debug!(name = %ingress.name, host = ?ingress.host, "Ingress created");

        let virtual_service = match self.virtual_service_spec(names) {
            Some(spec) => {
                let status = match self.cluster.create_virtual_service(&spec).await {
                    Ok(status) => status,
                    Err(source) => {
                        return Err(self
                            .abort(ProvisionStep::VirtualService, reached, names, source)
                            .await)
                    }
                };
                reached = ProvisionStage::Routing;
                if let Err(source) = validate_virtual_service(&status) {
                    return Err(self
                        .abort(ProvisionStep::VirtualService, reached, names, source)
                        .await);
                }
                debug!(name = %status.name, host = %status.host, "Virtual service created");
                Some(status)
            }
            None => None,
        };

        info!(%reached, "Workspace objects provisioned");

        Ok(ProvisionResult {
            reached,
            deployment,
            service,
            ingress,
            virtual_service,
        })
    }

    /// Applies the rollback policy and builds the error returned to the caller.
    async fn abort(
        &self,
        step: ProvisionStep,
        reached: ProvisionStage,
        names: &WorkspaceNames,
        source: ClusterError,
    ) -> OrchestratorError {
        let scope = rollback_scope(self.config.rollback, step, reached);

        if scope.is_empty() {
            if reached > ProvisionStage::None {
                warn!(
                    %step,
                    %reached,
                    error = %source,
                    "Provisioning failed; created objects left in place"
                );
            } else {
                warn!(%step, error = %source, "Provisioning failed before any object was created");
            }
            return OrchestratorError::ExternalApi { step, source };
        }

        warn!(%step, %reached, error = %source, "Provisioning failed; rolling back");
        let rolled_back = self.teardown(&scope, names).await;

        OrchestratorError::PartialProvision {
            step,
            reached,
            rolled_back,
            source,
        }
    }

    /// Deletes the given objects in order, continuing past failures. Returns
    /// `kind/name` for every object that is gone afterwards.
    pub async fn teardown(&self, kinds: &[ObjectKind], names: &WorkspaceNames) -> Vec<String> {
        let namespace = self.config.namespace.as_str();
        let mut removed = Vec::new();

        for &kind in kinds {
            let name = object_name(names, kind);
            let outcome = match kind {
                ObjectKind::Ingress => {
                    self.cluster
                        .delete_ingress(namespace, &names.selector())
                        .await
                }
                _ => {
                    let selector = ResourceSelector::Names(ObjectRefs::single(kind, name));
                    self.cluster.delete_resources(namespace, &selector).await
                }
            };

            match outcome {
                Ok(()) | Err(ClusterError::NotFound(_)) => {
                    debug!(%kind, name, "Rolled back");
                    removed.push(format!("{kind}/{name}"));
                }
                Err(e) => warn!(%kind, name, error = %e, "Rollback delete failed"),
            }
        }

        removed
    }

    fn deployment_spec(&self, request: &ProvisionRequest<'_>) -> DeploymentSpec {
        let names = request.names;
        let mut env = BTreeMap::from([(
            "WORKSPACE_BASE_PATH".to_string(),
            names.path.clone(),
        )]);
        if matches!(names.ide, IdeKind::Jupyter | IdeKind::Notebook) {
            env.insert("NB_PREFIX".to_string(), names.path.clone());
        }

        DeploymentSpec {
            namespace: self.config.namespace.clone(),
            name: names.deployment_name.clone(),
            labels: names.labels(),
            image_url: request.image_url.to_string(),
            container_port: self.config.container_port,
            resources: ResourceLimits {
                cpu_units: request.cpu_units,
                memory_units: request.memory_units,
            },
            replicas: 1,
            base_path: names.path.clone(),
            env,
            secret_ref: request.secret_ref.map(str::to_string),
        }
    }

    fn service_spec(&self, names: &WorkspaceNames) -> ServiceSpec {
        ServiceSpec {
            namespace: self.config.namespace.clone(),
            name: names.service_name.clone(),
            labels: names.labels(),
            selector: names.labels(),
            port: self.config.service.port,
            target_port: self.config.container_port,
            service_type: self.config.service.service_type.clone(),
        }
    }

    fn ingress_spec(&self, names: &WorkspaceNames) -> IngressSpec {
        IngressSpec {
            namespace: self.config.namespace.clone(),
            name: names.ingress_name.clone(),
            labels: names.labels(),
            host: self.config.ingress.host.clone(),
            path: names.path.clone(),
            class_name: self.config.ingress.class_name.clone(),
            tls: self.config.ingress.tls,
            service_name: names.service_name.clone(),
            service_port: self.config.service.port,
        }
    }

    fn virtual_service_spec(&self, names: &WorkspaceNames) -> Option<VirtualServiceSpec> {
        let (gateway, host) = self.config.routing.virtual_service_target()?;
        Some(VirtualServiceSpec {
            namespace: self.config.namespace.clone(),
            name: names.virtual_service_name.clone(),
            labels: names.labels(),
            gateway: gateway.to_string(),
            host: host.to_string(),
            path_prefix: names.path.clone(),
            service_name: names.service_name.clone(),
            service_port: self.config.service.port,
        })
    }
}

impl fmt::Debug for ResourceProvisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceProvisioner")
            .field("namespace", &self.config.namespace)
            .field("rollback", &self.config.rollback)
            .finish_non_exhaustive()
    }
}

pub fn object_name(names: &WorkspaceNames, kind: ObjectKind) -> &str {
    match kind {
        ObjectKind::Deployment => &names.deployment_name,
        ObjectKind::Service => &names.service_name,
        ObjectKind::Ingress => &names.ingress_name,
        ObjectKind::VirtualService => &names.virtual_service_name,
    }
}

fn invalid(message: String) -> ClusterError {
    ClusterError::InvalidResponse(message)
}

fn validate_deployment(status: &DeploymentStatus) -> ClusterResult<()> {
    if status.name.is_empty() {
        return Err(invalid("deployment has no name".into()));
    }
    if status.desired_replicas < 1 {
        return Err(invalid(format!(
            "deployment {} reports {} desired replicas",
            status.name, status.desired_replicas
        )));
    }
    Ok(())
}

fn validate_service(status: &ServiceStatus) -> ClusterResult<()> {
    if status.name.is_empty() {
        return Err(invalid("service has no name".into()));
    }
    if status.port == 0 || status.target_port == 0 {
        return Err(invalid(format!(
            "service {} has port {} -> {}",
            status.name, status.port, status.target_port
        )));
    }
    if status.service_type.as_deref().map_or(true, str::is_empty) {
        return Err(invalid(format!("service {} has no type", status.name)));
    }
    Ok(())
}

fn validate_ingress(status: &IngressStatus) -> ClusterResult<()> {
    if status.name.is_empty() {
        return Err(invalid("ingress has no name".into()));
    }
    if !status.path.starts_with('/') {
        return Err(invalid(format!(
            "ingress {} path '{}' does not start with '/'",
            status.name, status.path
        )));
    }
    Ok(())
}

fn validate_virtual_service(status: &VirtualServiceStatus) -> ClusterResult<()> {
    if status.name.is_empty() {
        return Err(invalid("virtual service has no name".into()));
    }
    Ok(())
}
