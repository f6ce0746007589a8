//! Contract with the cluster control plane.
//!
//! The orchestrator never talks to the cluster directly; it goes through
//! [`ClusterClient`]. Specs carry what the orchestrator asks for, statuses
//! carry what the control plane reports back. Every call may fail with a
//! [`ClusterError`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    Conflict(String),

    #[error("invalid response from cluster: {0}")]
    InvalidResponse(String),

    #[error("cluster transport error: {0}")]
    Transport(String),
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// The kinds of object that make up a workspace, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectKind {
    Deployment,
    Service,
    Ingress,
    VirtualService,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Deployment => "deployment",
            ObjectKind::Service => "service",
            ObjectKind::Ingress => "ingress",
            ObjectKind::VirtualService => "virtualservice",
        })
    }
}

/// Explicit object names; `None` entries are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRefs {
    pub deployment: Option<String>,
    pub service: Option<String>,
    pub ingress: Option<String>,
    pub virtual_service: Option<String>,
}

impl ObjectRefs {
    pub fn single(kind: ObjectKind, name: impl Into<String>) -> Self {
        let mut refs = Self::default();
        refs.set(kind, name.into());
        refs
    }

    pub fn set(&mut self, kind: ObjectKind, name: String) {
        match kind {
            ObjectKind::Deployment => self.deployment = Some(name),
            ObjectKind::Service => self.service = Some(name),
            ObjectKind::Ingress => self.ingress = Some(name),
            ObjectKind::VirtualService => self.virtual_service = Some(name),
        }
    }

    pub fn get(&self, kind: ObjectKind) -> Option<&str> {
        match kind {
            ObjectKind::Deployment => self.deployment.as_deref(),
            ObjectKind::Service => self.service.as_deref(),
            ObjectKind::Ingress => self.ingress.as_deref(),
            ObjectKind::VirtualService => self.virtual_service.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deployment.is_none()
            && self.service.is_none()
            && self.ingress.is_none()
            && self.virtual_service.is_none()
    }
}

/// How a delete call finds its targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceSelector {
    /// Every object whose labels contain all of these pairs.
    Labels(BTreeMap<String, String>),
    Names(ObjectRefs),
}

impl ResourceSelector {
    pub fn matches(&self, kind: ObjectKind, name: &str, labels: &BTreeMap<String, String>) -> bool {
        match self {
            ResourceSelector::Labels(wanted) => wanted
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v)),
            ResourceSelector::Names(refs) => refs.get(kind) == Some(name),
        }
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceSelector::Labels(labels) => {
                let pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "labels({})", pairs.join(","))
            }
            ResourceSelector::Names(refs) => {
                let names: Vec<String> = [
                    ObjectKind::Deployment,
                    ObjectKind::Service,
                    ObjectKind::Ingress,
                    ObjectKind::VirtualService,
                ]
                .into_iter()
                .filter_map(|kind| refs.get(kind).map(|name| format!("{kind}/{name}")))
                .collect();
                write!(f, "names({})", names.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_units: u32,
    pub memory_units: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub image_url: String,
    pub container_port: u16,
    /// Requests and limits are the same values; workspaces do not burst.
    pub resources: ResourceLimits,
    pub replicas: u32,
    /// Base path the editor must serve under.
    pub base_path: String,
    pub env: BTreeMap<String, String>,
    /// Name of an external credential to mount, if the owner opted in.
    pub secret_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub name: String,
    pub desired_replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub port: u16,
    pub target_port: u16,
    pub service_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub port: u16,
    pub target_port: u16,
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub host: Option<String>,
    pub path: String,
    pub class_name: Option<String>,
    pub tls: bool,
    pub service_name: String,
    pub service_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressStatus {
    pub name: String,
    pub path: String,
    /// Often empty until the controller assigns an address.
    pub host: Option<String>,
    pub scheme: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualServiceSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub gateway: String,
    pub host: String,
    pub path_prefix: String,
    pub service_name: String,
    pub service_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualServiceStatus {
    pub name: String,
    pub gateway: String,
    pub host: String,
    pub path_prefix: String,
}

/// One object reported by [`ClusterClient::list_objects`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterObject {
    pub kind: ObjectKind,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_deployment(&self, spec: &DeploymentSpec) -> ClusterResult<DeploymentStatus>;

    async fn create_service(&self, spec: &ServiceSpec) -> ClusterResult<ServiceStatus>;

    async fn create_ingress(&self, spec: &IngressSpec) -> ClusterResult<IngressStatus>;

    async fn create_virtual_service(
        &self,
        spec: &VirtualServiceSpec,
    ) -> ClusterResult<VirtualServiceStatus>;

    /// Deletes every workspace object the selector matches, of any kind.
    async fn delete_resources(&self, namespace: &str, selector: &ResourceSelector)
        -> ClusterResult<()>;

    /// Deletes only ingress objects the selector matches.
    async fn delete_ingress(
        &self,
        namespace: &str,
        selector: &ResourceSelector,
    ) -> ClusterResult<()>;

    /// Lists workspace objects matching the selector.
    async fn list_objects(
        &self,
        namespace: &str,
        selector: &ResourceSelector,
    ) -> ClusterResult<Vec<ClusterObject>>;
}
