//! In-process cluster used for dry runs and tests.
//!
//! Keeps created objects in memory, records every call it receives and can be
//! told to fail specific calls.

use crate::cluster::{
    ClusterClient, ClusterError, ClusterObject, ClusterResult, DeploymentSpec, DeploymentStatus,
    IngressSpec, IngressStatus, ObjectKind, ResourceSelector, ServiceSpec, ServiceStatus,
    VirtualServiceSpec, VirtualServiceStatus,
};
use crate::naming::LABEL_INSTANCE;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// A call received by [`InMemoryCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    CreateDeployment(String),
    CreateService(String),
    CreateIngress(String),
    CreateVirtualService(String),
    DeleteResources(ResourceSelector),
    DeleteIngress(ResourceSelector),
    List(ResourceSelector),
}

impl ClusterCall {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            ClusterCall::CreateDeployment(_)
                | ClusterCall::CreateService(_)
                | ClusterCall::CreateIngress(_)
                | ClusterCall::CreateVirtualService(_)
        )
    }
}

/// Calls that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateDeployment,
    CreateService,
    CreateIngress,
    CreateVirtualService,
    /// Any delete whose selector targets this instance id.
    DeleteInstance(String),
    List,
}

#[derive(Debug, Default)]
struct State {
    objects: Vec<ClusterObject>,
    calls: Vec<ClusterCall>,
    failures: HashSet<FailPoint>,
    ingress_host: Option<String>,
    replicas_override: Option<u32>,
}

#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host reported back by every created ingress.
    pub fn with_ingress_host(self, host: impl Into<String>) -> Self {
        self.lock().ingress_host = Some(host.into());
        self
    }

    /// Replica count reported back by created deployments.
    pub fn with_reported_replicas(self, replicas: u32) -> Self {
        self.lock().replicas_override = Some(replicas);
        self
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.lock().failures.insert(point);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<ClusterCall> {
        self.lock().calls.clone()
    }

    pub fn create_calls(&self) -> Vec<ClusterCall> {
        self.calls().into_iter().filter(ClusterCall::is_create).collect()
    }

    pub fn objects(&self) -> Vec<ClusterObject> {
        self.lock().objects.clone()
    }

    pub fn has_object(&self, kind: ObjectKind, name: &str) -> bool {
        self.lock()
            .objects
            .iter()
            .any(|o| o.kind == kind && o.name == name)
    }

    /// Places an object directly, bypassing the create calls.
    pub fn insert_object(&self, kind: ObjectKind, name: &str, labels: BTreeMap<String, String>) {
        self.lock().objects.push(ClusterObject {
            kind,
            name: name.to_string(),
            labels,
        });
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn create(
        &self,
        call: ClusterCall,
        point: FailPoint,
        kind: ObjectKind,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> ClusterResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(call);

        if state.failures.contains(&point) {
            return Err(ClusterError::Api {
                status: 500,
                message: format!("injected failure creating {kind} {name}"),
            });
        }
        if state.objects.iter().any(|o| o.kind == kind && o.name == name) {
            return Err(ClusterError::Conflict(format!("{kind}/{name}")));
        }

        state.objects.push(ClusterObject {
            kind,
            name: name.to_string(),
            labels: labels.clone(),
        });
        Ok(state)
    }

    fn delete_matching(
        &self,
        call: ClusterCall,
        selector: &ResourceSelector,
        only: Option<ObjectKind>,
    ) -> ClusterResult<()> {
        let mut state = self.lock();
        state.calls.push(call);

        let targeted_instance = state.failures.iter().find_map(|point| match point {
            FailPoint::DeleteInstance(inst)
                if selector_targets_instance(&state.objects, selector, inst) =>
            {
                Some(inst.clone())
            }
            _ => None,
        });
        if let Some(inst) = targeted_instance {
            return Err(ClusterError::Api {
                status: 503,
                message: format!("injected failure deleting instance {inst}"),
            });
        }

        state.objects.retain(|o| {
            let kind_matches = only.map_or(true, |kind| kind == o.kind);
            !(kind_matches && selector.matches(o.kind, &o.name, &o.labels))
        });
        Ok(())
    }
}

fn selector_targets_instance(
    objects: &[ClusterObject],
    selector: &ResourceSelector,
    inst: &str,
) -> bool {
    match selector {
        ResourceSelector::Labels(labels) => match labels.get(LABEL_INSTANCE) {
            Some(value) => value == inst,
            None => objects.iter().any(|o| {
                o.labels.get(LABEL_INSTANCE).map(String::as_str) == Some(inst)
                    && selector.matches(o.kind, &o.name, &o.labels)
            }),
        },
        ResourceSelector::Names(_) => objects.iter().any(|o| {
            o.labels.get(LABEL_INSTANCE).map(String::as_str) == Some(inst)
                && selector.matches(o.kind, &o.name, &o.labels)
        }),
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn create_deployment(&self, spec: &DeploymentSpec) -> ClusterResult<DeploymentStatus> {
        let state = self.create(
            ClusterCall::CreateDeployment(spec.name.clone()),
            FailPoint::CreateDeployment,
            ObjectKind::Deployment,
            &spec.name,
            &spec.labels,
        )?;
        Ok(DeploymentStatus {
            name: spec.name.clone(),
            desired_replicas: state.replicas_override.unwrap_or(spec.replicas),
        })
    }

    async fn create_service(&self, spec: &ServiceSpec) -> ClusterResult<ServiceStatus> {
        self.create(
            ClusterCall::CreateService(spec.name.clone()),
            FailPoint::CreateService,
            ObjectKind::Service,
            &spec.name,
            &spec.labels,
        )?;
        Ok(ServiceStatus {
            name: spec.name.clone(),
            port: spec.port,
            target_port: spec.target_port,
            service_type: Some(spec.service_type.clone()),
        })
    }

    async fn create_ingress(&self, spec: &IngressSpec) -> ClusterResult<IngressStatus> {
        let state = self.create(
            ClusterCall::CreateIngress(spec.name.clone()),
            FailPoint::CreateIngress,
            ObjectKind::Ingress,
            &spec.name,
            &spec.labels,
        )?;
        Ok(IngressStatus {
            name: spec.name.clone(),
            path: spec.path.clone(),
            host: state.ingress_host.clone().or_else(|| spec.host.clone()),
            scheme: if spec.tls { "https" } else { "http" }.to_string(),
        })
    }

    async fn create_virtual_service(
        &self,
        spec: &VirtualServiceSpec,
    ) -> ClusterResult<VirtualServiceStatus> {
        self.create(
            ClusterCall::CreateVirtualService(spec.name.clone()),
            FailPoint::CreateVirtualService,
            ObjectKind::VirtualService,
            &spec.name,
            &spec.labels,
        )?;
        Ok(VirtualServiceStatus {
            name: spec.name.clone(),
            gateway: spec.gateway.clone(),
            host: spec.host.clone(),
            path_prefix: spec.path_prefix.clone(),
        })
    }

    async fn delete_resources(
        &self,
        _namespace: &str,
        selector: &ResourceSelector,
    ) -> ClusterResult<()> {
        self.delete_matching(ClusterCall::DeleteResources(selector.clone()), selector, None)
    }

    async fn delete_ingress(
        &self,
        _namespace: &str,
        selector: &ResourceSelector,
    ) -> ClusterResult<()> {
        self.delete_matching(
            ClusterCall::DeleteIngress(selector.clone()),
            selector,
            Some(ObjectKind::Ingress),
        )
    }

    async fn list_objects(
        &self,
        _namespace: &str,
        selector: &ResourceSelector,
    ) -> ClusterResult<Vec<ClusterObject>> {
        let mut state = self.lock();
        state.calls.push(ClusterCall::List(selector.clone()));
        if state.failures.contains(&FailPoint::List) {
            return Err(ClusterError::Transport("injected list failure".to_string()));
        }
        Ok(state
            .objects
            .iter()
            .filter(|o| selector.matches(o.kind, &o.name, &o.labels))
            .cloned()
            .collect())
    }
}
