use crate::cluster::ClusterError;
use crate::provisioner::{ProvisionStage, ProvisionStep};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cluster call failed during {step}: {source}")]
    ExternalApi {
        step: ProvisionStep,
        #[source]
        source: ClusterError,
    },

    /// A later step failed after earlier ones succeeded and a rollback was attempted.
    #[error(
        "Provisioning failed during {step} after reaching {reached} (rolled back: [{}]): {source}",
        rolled_back.join(", ")
    )]
    PartialProvision {
        step: ProvisionStep,
        reached: ProvisionStage,
        rolled_back: Vec<String>,
        #[source]
        source: ClusterError,
    },

    #[error("Cluster delete failed for {target}: {source}")]
    Deprovision {
        target: String,
        #[source]
        source: ClusterError,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Stable category string surfaced to callers next to the message.
    pub fn category(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation",
            OrchestratorError::PolicyViolation(_) => "policy_violation",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::ExternalApi { .. } | OrchestratorError::Deprovision { .. } => {
                "external_api"
            }
            OrchestratorError::PartialProvision { .. } => "partial_provision",
            _ => "internal",
        }
    }

    /// Whether the error came from the cluster control plane.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ExternalApi { .. }
                | OrchestratorError::PartialProvision { .. }
                | OrchestratorError::Deprovision { .. }
        )
    }
}

impl From<serde_yaml_ng::Error> for OrchestratorError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        OrchestratorError::Config(err.to_string())
    }
}
