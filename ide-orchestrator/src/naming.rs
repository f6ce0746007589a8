//! Deterministic resource naming for workspaces.
//!
//! Every cluster object belonging to one workspace is derived from the triple
//! `(ide, sanitized owner, instance id)`. The same triple is written into the
//! object labels so the objects can be found again by selector even when the
//! database record is gone.

use crate::cluster::ResourceSelector;
use crate::error::{OrchestratorError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;

pub const LABEL_APP: &str = "app";
pub const LABEL_USER: &str = "user";
pub const LABEL_IDE: &str = "ide";
pub const LABEL_INSTANCE: &str = "inst";
pub const APP_LABEL_VALUE: &str = "workspace";

/// Length of the hex instance suffix.
pub const INSTANCE_ID_LEN: usize = 8;

/// DNS-1123 label limit applied to every generated object name.
const MAX_OBJECT_NAME_LEN: usize = 63;

/// The longest of the object-name prefixes (`deploy`, `svc`, `ing`, `vs`).
const LONGEST_PREFIX: &str = "deploy";

/// Editor family a workspace runs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    sqlx::Type,
    ToSchema,
)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum IdeKind {
    Jupyter,
    Notebook,
    CodeServer,
    Vscode,
}

impl IdeKind {
    pub const ALL: [IdeKind; 4] = [
        IdeKind::Jupyter,
        IdeKind::Notebook,
        IdeKind::CodeServer,
        IdeKind::Vscode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IdeKind::Jupyter => "jupyter",
            IdeKind::Notebook => "notebook",
            IdeKind::CodeServer => "code-server",
            IdeKind::Vscode => "vscode",
        }
    }

    /// Code editors resolve relative assets against the directory, so their
    /// URLs must end with `/`.
    pub fn is_code_editor(&self) -> bool {
        matches!(self, IdeKind::CodeServer | IdeKind::Vscode)
    }
}

impl fmt::Display for IdeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdeKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        IdeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| OrchestratorError::Validation(format!("Unknown IDE kind: {}", s)))
    }
}

/// Lower-cases and replaces every character outside `[a-z0-9-]` with `-`.
pub fn sanitize(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            _ => '-',
        })
        .collect()
}

/// Source of instance suffixes. Injected so tests can pin the generated names.
pub trait InstanceIdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Eight random lowercase hex characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomInstanceIds;

impl InstanceIdGenerator for RandomInstanceIds {
    fn next_id(&self) -> String {
        format!("{:08x}", rand::rng().random::<u32>())
    }
}

/// Hands out a fixed list of ids, then counts upward from `00000000`.
#[derive(Debug, Default)]
pub struct SequenceInstanceIds {
    queued: Mutex<VecDeque<String>>,
    counter: Mutex<u32>,
}

impl SequenceInstanceIds {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queued: Mutex::new(ids.into_iter().map(Into::into).collect()),
            counter: Mutex::new(0),
        }
    }
}

impl InstanceIdGenerator for SequenceInstanceIds {
    fn next_id(&self) -> String {
        if let Ok(mut queued) = self.queued.lock() {
            if let Some(id) = queued.pop_front() {
                return id;
            }
        }
        let mut counter = match self.counter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = format!("{:08x}", *counter);
        *counter = counter.wrapping_add(1);
        id
    }
}

/// Checks the `[0-9a-f]{8}` shape of an instance id.
pub fn is_valid_instance_id(id: &str) -> bool {
    id.len() == INSTANCE_ID_LEN && id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// All identifiers derived for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceNames {
    pub ide: IdeKind,
    pub user: String,
    pub instance_id: String,
    pub deployment_name: String,
    pub service_name: String,
    pub ingress_name: String,
    pub virtual_service_name: String,
    pub path: String,
}

impl WorkspaceNames {
    /// Derives names for a known instance id.
    pub fn for_instance(ide: IdeKind, owner: &str, instance_id: &str) -> Result<Self> {
        if !is_valid_instance_id(instance_id) {
            return Err(OrchestratorError::Validation(format!(
                "Instance id must be {} lowercase hex characters, got '{}'",
                INSTANCE_ID_LEN, instance_id
            )));
        }

        let user = owner_segment(ide, owner)?;
        let stem = format!("{}-{}-{}", ide.as_str(), user, instance_id);

        Ok(Self {
            ide,
            deployment_name: format!("deploy-{}", stem),
            service_name: format!("svc-{}", stem),
            ingress_name: format!("ing-{}", stem),
            virtual_service_name: format!("vs-{}", stem),
            path: format!("/{}/{}/{}", ide.as_str(), user, instance_id),
            instance_id: instance_id.to_string(),
            user,
        })
    }

    /// `{app, user, ide, inst}`.
    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.owner_labels();
        labels.insert(LABEL_INSTANCE.to_string(), self.instance_id.clone());
        labels
    }

    /// Selector matching exactly this workspace's objects.
    pub fn selector(&self) -> ResourceSelector {
        ResourceSelector::Labels(self.labels())
    }

    fn owner_labels(&self) -> BTreeMap<String, String> {
        owner_labels(self.ide, &self.user)
    }
}

/// `{app, user, ide}` without the instance label. Matches every workspace of
/// this owner and kind.
pub fn owner_labels(ide: IdeKind, user_segment: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP.to_string(), APP_LABEL_VALUE.to_string()),
        (LABEL_USER.to_string(), user_segment.to_string()),
        (LABEL_IDE.to_string(), ide.as_str().to_string()),
    ])
}

/// Sanitized owner, shortened so the longest derived object name still fits
/// the cluster name limit.
pub fn owner_segment(ide: IdeKind, owner: &str) -> Result<String> {
    let budget = MAX_OBJECT_NAME_LEN
        - LONGEST_PREFIX.len()
        - ide.as_str().len()
        - INSTANCE_ID_LEN
        - 3;

    let sanitized = sanitize(owner.trim());
    let truncated: String = sanitized.chars().take(budget).collect();
    let segment = truncated.trim_matches('-').to_string();

    if segment.is_empty() {
        return Err(OrchestratorError::Validation(format!(
            "Owner '{}' does not produce a usable resource name",
            owner
        )));
    }

    Ok(segment)
}

/// Generates fresh names from an injected id source.
#[derive(Clone)]
pub struct NamingScheme {
    ids: Arc<dyn InstanceIdGenerator>,
}

impl NamingScheme {
    pub fn new(ids: Arc<dyn InstanceIdGenerator>) -> Self {
        Self { ids }
    }

    pub fn random() -> Self {
        Self::new(Arc::new(RandomInstanceIds))
    }

    pub fn generate(&self, ide: IdeKind, owner: &str) -> Result<WorkspaceNames> {
        WorkspaceNames::for_instance(ide, owner, &self.ids.next_id())
    }
}

impl fmt::Debug for NamingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingScheme").finish_non_exhaustive()
    }
}
