//! Static orchestrator configuration, loaded once at startup from YAML.
//!
//! Every field has a default so an empty file is a valid configuration.

use crate::error::{OrchestratorError, Result};
use crate::naming::IdeKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Upper bound accepted for `lease_days` and `max_lease_days`.
pub const MAX_CONFIGURED_LEASE_DAYS: u32 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Namespace every workspace object is created in.
    pub namespace: String,
    /// Maximum concurrent workspaces per owner, by IDE kind.
    pub quotas: BTreeMap<IdeKind, u32>,
    pub lease_days: u32,
    /// Upper bound on `expires_at - created_at` after extensions. Unset means unlimited.
    pub max_lease_days: Option<u32>,
    pub resources: ResourceConfig,
    pub container_port: u16,
    pub service: ServiceConfig,
    pub ingress: IngressConfig,
    pub routing: RoutingConfig,
    /// Base prepended to the workspace path when no host is known.
    pub public_base_url: Option<String>,
    pub rollback: RollbackPolicy,
    pub reconcile: ReconcileConfig,
    /// Image reference -> pullable image URL.
    pub images: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub max_cpu_units: u32,
    pub max_memory_units: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub port: u16,
    pub service_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub host: Option<String>,
    pub class_name: Option<String>,
    pub tls: bool,
}

/// The optional higher-level routing object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub virtual_service_enabled: bool,
    pub gateway: Option<String>,
    pub host: Option<String>,
    /// Scheme used for URLs built from the routing object.
    pub scheme: String,
}

/// What to tear down when a provisioning step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// Only a failed routing object triggers a rollback, and only of the ingress.
    #[default]
    RoutingOnly,
    /// Everything created before the failure is removed.
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// Log cluster objects that have no record.
    #[default]
    Flag,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// How long a record may stay pending before it is treated as abandoned.
    pub pending_timeout_secs: u64,
    pub orphans: OrphanPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "ide-workspaces".to_string(),
            quotas: IdeKind::ALL.into_iter().map(|kind| (kind, 2)).collect(),
            lease_days: 7,
            max_lease_days: None,
            resources: ResourceConfig::default(),
            container_port: 8888,
            service: ServiceConfig::default(),
            ingress: IngressConfig::default(),
            routing: RoutingConfig::default(),
            public_base_url: None,
            rollback: RollbackPolicy::default(),
            reconcile: ReconcileConfig::default(),
            images: HashMap::new(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_cpu_units: 16,
            max_memory_units: 64,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 80,
            service_type: "ClusterIP".to_string(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            virtual_service_enabled: false,
            gateway: None,
            host: None,
            scheme: "https".to_string(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: 15 * 60,
            orphans: OrphanPolicy::default(),
        }
    }
}

impl RoutingConfig {
    /// Gateway and host, when the routing object is enabled and fully configured.
    pub fn virtual_service_target(&self) -> Option<(&str, &str)> {
        if !self.virtual_service_enabled {
            return None;
        }
        let gateway = self.gateway.as_deref().filter(|g| !g.trim().is_empty())?;
        let host = self.host.as_deref().filter(|h| !h.trim().is_empty())?;
        Some((gateway, host))
    }
}

impl OrchestratorConfig {
    /// Loads and validates a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading orchestrator config from: {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(contents)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(OrchestratorError::Config("namespace must not be empty".into()));
        }
        if self.lease_days == 0 || self.lease_days > MAX_CONFIGURED_LEASE_DAYS {
            return Err(OrchestratorError::Config(format!(
                "lease_days must be between 1 and {}, got {}",
                MAX_CONFIGURED_LEASE_DAYS, self.lease_days
            )));
        }
        if let Some(max) = self.max_lease_days {
            if max > MAX_CONFIGURED_LEASE_DAYS {
                return Err(OrchestratorError::Config(format!(
                    "max_lease_days must be at most {}, got {}",
                    MAX_CONFIGURED_LEASE_DAYS, max
                )));
            }
            if max < self.lease_days {
                return Err(OrchestratorError::Config(format!(
                    "max_lease_days ({}) is shorter than lease_days ({})",
                    max, self.lease_days
                )));
            }
        }
        if self.container_port == 0 || self.service.port == 0 {
            return Err(OrchestratorError::Config("ports must be greater than 0".into()));
        }
        if self.service.service_type.trim().is_empty() {
            return Err(OrchestratorError::Config("service_type must be set".into()));
        }
        if self.routing.scheme.trim().is_empty() {
            return Err(OrchestratorError::Config("routing scheme must be set".into()));
        }
        if self.resources.max_cpu_units == 0 || self.resources.max_memory_units == 0 {
            return Err(OrchestratorError::Config(
                "resource ceilings must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
