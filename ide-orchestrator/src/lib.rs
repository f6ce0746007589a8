//! Ephemeral IDE workspace orchestration.
//!
//! Turns a request for a per-user IDE into a set of labelled cluster objects,
//! a routable public URL and a leased record, and reclaims all of it when the
//! lease ends. Consumed by the ide-api HTTP service but usable from any entry
//! point that can supply a [`ClusterClient`] and an [`ImageCatalog`].

pub mod cluster;
pub mod config;
pub mod db;
pub mod deprovision;
pub mod error;
pub mod image;
pub mod memory;
pub mod naming;
pub mod operation;
pub mod orchestrator;
pub mod provisioner;
pub mod quota;
pub mod reaper;
pub mod reconcile;
pub mod store;
pub mod url;
pub mod workspace;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use cluster::{ClusterClient, ClusterError};
pub use config::{OrchestratorConfig, OrphanPolicy, RollbackPolicy};
pub use error::{OrchestratorError, Result};
pub use image::{ImageCatalog, StaticImageCatalog};
pub use memory::InMemoryCluster;
pub use naming::{IdeKind, NamingScheme};
pub use operation::{Operation, OperationStatus, OperationType};
pub use orchestrator::WorkspaceOrchestrator;
pub use reaper::{ReapFailure, ReapReport};
pub use reconcile::ReconcileReport;
pub use store::LifecycleStore;
pub use workspace::{
    CreateWorkspaceRequest, PageRequest, ResourceRequest, WorkspaceFilters, WorkspaceHandle,
    WorkspacePage, WorkspaceRecord, WorkspaceStatus,
};
