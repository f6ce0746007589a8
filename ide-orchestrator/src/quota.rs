//! Per-owner admission control.

use crate::error::{OrchestratorError, Result};
use crate::naming::IdeKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Counts workspaces currently holding a slot for an owner.
#[async_trait]
pub trait ActiveWorkspaceCounter: Send + Sync {
    async fn count_active(&self, owner: &str, ide: IdeKind) -> Result<u32>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed { active: u32, limit: u32 },
    Denied { active: u32, limit: u32 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuotaGate {
    limits: BTreeMap<IdeKind, u32>,
}

impl QuotaGate {
    pub fn new(limits: BTreeMap<IdeKind, u32>) -> Self {
        Self { limits }
    }

    pub fn limit_for(&self, ide: IdeKind) -> Option<u32> {
        self.limits.get(&ide).copied()
    }

    /// A kind without a configured limit is rejected rather than allowed.
    pub async fn check_available(
        &self,
        counter: &dyn ActiveWorkspaceCounter,
        ide: IdeKind,
        owner: &str,
    ) -> Result<QuotaDecision> {
        let limit = self.limit_for(ide).ok_or_else(|| {
            OrchestratorError::PolicyViolation(format!(
                "No quota configured for IDE kind '{}'",
                ide
            ))
        })?;

        let active = counter.count_active(owner, ide).await?;
        debug!(owner, %ide, active, limit, "Quota check");

        Ok(if active < limit {
            QuotaDecision::Allowed { active, limit }
        } else {
            QuotaDecision::Denied { active, limit }
        })
    }

    /// Like [`check_available`](Self::check_available) but turns a denial into
    /// [`OrchestratorError::PolicyViolation`].
    pub async fn enforce(
        &self,
        counter: &dyn ActiveWorkspaceCounter,
        ide: IdeKind,
        owner: &str,
    ) -> Result<()> {
        match self.check_available(counter, ide, owner).await? {
            QuotaDecision::Allowed { .. } => Ok(()),
            QuotaDecision::Denied { active, limit } => {
                info!(owner, %ide, active, limit, "Quota exceeded");
                Err(OrchestratorError::PolicyViolation(format!(
                    "User '{}' already has {} of {} allowed {} workspaces",
                    owner, active, limit, ide
                )))
            }
        }
    }
}
