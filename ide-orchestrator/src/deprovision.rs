//! Removal of a workspace's cluster objects.

use crate::cluster::{ClusterClient, ClusterError, ResourceSelector};
use crate::error::{OrchestratorError, Result};
use crate::naming::{is_valid_instance_id, owner_labels, owner_segment, WorkspaceNames};
use crate::workspace::WorkspaceRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Trailing 8-hex path segment of a stored URL, with or without a final `/`.
static URL_INSTANCE_SUFFIX: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"/([0-9a-f]{8})/?$").ok());

/// Where the delete selector came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorSource {
    /// The record's persisted instance id.
    InstanceId,
    /// Instance id recovered from the public URL of a legacy record.
    PublicUrl,
    /// No instance id at all: matches every workspace of the owner and kind.
    OwnerWide,
}

impl fmt::Display for SelectorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectorSource::InstanceId => "instance-id",
            SelectorSource::PublicUrl => "public-url",
            SelectorSource::OwnerWide => "owner-wide",
        })
    }
}

/// Pulls the instance id out of a URL such as `https://h/jupyter/alice/0a1b2c3d/`.
pub fn instance_id_from_url(url: &str) -> Option<String> {
    let pattern = URL_INSTANCE_SUFFIX.as_ref()?;
    pattern
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Builds the label selector used to delete a record's objects.
pub fn selector_for(record: &WorkspaceRecord) -> Result<(ResourceSelector, SelectorSource)> {
    let persisted = record
        .instance_id
        .as_deref()
        .filter(|id| is_valid_instance_id(id))
        .map(|id| (id.to_string(), SelectorSource::InstanceId));

    let recovered = || {
        record
            .public_url
            .as_deref()
            .and_then(instance_id_from_url)
            .map(|id| (id, SelectorSource::PublicUrl))
    };

    match persisted.or_else(recovered) {
        Some((instance_id, source)) => {
            let names =
                WorkspaceNames::for_instance(record.ide_kind, &record.owner_id, &instance_id)?;
            Ok((names.selector(), source))
        }
        None => {
            let user = owner_segment(record.ide_kind, &record.owner_id)?;
            Ok((
                ResourceSelector::Labels(owner_labels(record.ide_kind, &user)),
                SelectorSource::OwnerWide,
            ))
        }
    }
}

#[derive(Clone)]
pub struct Deprovisioner {
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
}

impl Deprovisioner {
    pub fn new(cluster: Arc<dyn ClusterClient>, namespace: impl Into<String>) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
        }
    }

    /// Deletes every cluster object of the record. Objects already gone count
    /// as deleted.
    #[instrument(
        skip_all,
        fields(workspace_id = %record.id, owner = %record.owner_id, ide = %record.ide_kind)
    )]
    pub async fn delete(&self, record: &WorkspaceRecord) -> Result<SelectorSource> {
        let (selector, source) = selector_for(record)?;

        if source == SelectorSource::OwnerWide {
            warn!(
                %selector,
                "Record has no recoverable instance id; deleting by owner-wide selector"
            );
        }

        match self.cluster.delete_resources(&self.namespace, &selector).await {
            Ok(()) => {
                debug!(%source, %selector, "Workspace objects deleted");
                Ok(source)
            }
            Err(ClusterError::NotFound(what)) => {
                debug!(%source, %what, "Workspace objects already gone");
                Ok(source)
            }
            Err(source_err) => Err(OrchestratorError::Deprovision {
                target: record.id.clone(),
                source: source_err,
            }),
        }
    }
}

impl fmt::Debug for Deprovisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deprovisioner")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
