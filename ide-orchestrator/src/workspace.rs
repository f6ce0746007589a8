use crate::error::{OrchestratorError, Result};
use crate::naming::{IdeKind, WorkspaceNames};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    /// Record written, cluster objects not (yet) all created.
    Pending,
    Active,
    /// Provisioning failed; objects created before the failure may remain.
    Failed,
}

/// CPU and memory for the workspace container. Requests equal limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceRequest {
    pub cpu_units: u32,
    pub memory_units: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ClusterNames {
    pub deployment_name: String,
    pub service_name: String,
    pub ingress_name: String,
    /// Set only when the routing object was created.
    pub virtual_service_name: Option<String>,
}

impl From<&WorkspaceNames> for ClusterNames {
    fn from(names: &WorkspaceNames) -> Self {
        Self {
            deployment_name: names.deployment_name.clone(),
            service_name: names.service_name.clone(),
            ingress_name: names.ingress_name.clone(),
            virtual_service_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceRecord {
    pub id: String,
    pub owner_id: String,
    pub ide_kind: IdeKind,
    pub image_ref: String,
    pub resources: ResourceRequest,
    /// Missing only on legacy records.
    pub instance_id: Option<String>,
    pub cluster_names: ClusterNames,
    pub public_url: Option<String>,
    pub status: WorkspaceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub data_warehouse_binding: Option<String>,
    pub error_message: Option<String>,
}

/// What callers get back for a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceHandle {
    pub id: String,
    pub owner_id: String,
    pub ide_kind: IdeKind,
    pub status: WorkspaceStatus,
    pub public_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&WorkspaceRecord> for WorkspaceHandle {
    fn from(record: &WorkspaceRecord) -> Self {
        Self {
            id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            ide_kind: record.ide_kind,
            status: record.status,
            public_url: record.public_url.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkspaceRequest {
    /// Set from the authenticated caller by the HTTP layer.
    #[serde(default)]
    pub owner_id: String,
    pub ide_kind: IdeKind,
    pub image_ref: String,
    pub resources: ResourceRequest,
    #[serde(default)]
    pub data_warehouse_binding: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilters {
    pub ide_kind: Option<IdeKind>,
    pub status: Option<WorkspaceStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    pub const MAX_PAGE_SIZE: u32 = 100;

    pub fn new(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            page_size: page_size
                .unwrap_or(Self::DEFAULT_PAGE_SIZE)
                .clamp(1, Self::MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkspacePage {
    pub items: Vec<WorkspaceHandle>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// `at + days`, or a validation error when the result is out of range.
pub fn add_days(at: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(days))
        .and_then(|delta| at.checked_add_signed(delta))
        .ok_or_else(|| {
            OrchestratorError::Validation(format!(
                "A lease of {} more days is out of range",
                days
            ))
        })
}

/// `now + days`, moved to 23:59:00 of that calendar day (UTC).
pub fn lease_expiry(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN);
    Ok(add_days(now, days)?
        .date_naive()
        .and_time(end_of_day)
        .and_utc())
}
