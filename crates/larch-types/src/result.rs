//! Pipeline results produced by a deployment task.

use crate::error::DeploymentError;
use crate::status::JobStatus;
use serde::{Deserialize, Serialize};

/// Outcome classification of one deployment pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentResultStatus {
    /// Target state reached and committed.
    Successful,
    /// Pre-merge validation failed; the cloud expects this as a distinct
    /// signal.
    Rejected,
    /// Aborted before any service mutation.
    FailedNoStateChange,
    /// Failed after mutation; the failure policy forbade rollback.
    FailedRollbackNotRequested,
    /// Failed after mutation; rollback converged.
    FailedRollbackComplete,
    /// Failed after mutation; rollback did not converge.
    FailedUnableToRollback,
}

impl DeploymentResultStatus {
    /// Whether the device's service graph matches a committed state: the
    /// target for success, the restored snapshot for a completed rollback.
    pub fn committed(&self) -> bool {
        matches!(
            self,
            DeploymentResultStatus::Successful | DeploymentResultStatus::FailedRollbackComplete
        )
    }
}

/// Result of a deployment pipeline run.
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    /// Outcome classification.
    pub status: DeploymentResultStatus,

    /// Failure chain, for non-successful outcomes.
    pub error: Option<DeploymentError>,
}

impl DeploymentResult {
    /// A successful run.
    pub fn successful() -> Self {
        Self {
            status: DeploymentResultStatus::Successful,
            error: None,
        }
    }

    /// A rejected run.
    pub fn rejected(error: DeploymentError) -> Self {
        Self {
            status: DeploymentResultStatus::Rejected,
            error: Some(error),
        }
    }

    /// A failed run with the given classification.
    pub fn failed(status: DeploymentResultStatus, error: DeploymentError) -> Self {
        Self {
            status,
            error: Some(error),
        }
    }

    /// Map the pipeline outcome onto the externally visible status.
    pub fn job_status(&self) -> JobStatus {
        match self.status {
            DeploymentResultStatus::Successful => JobStatus::Succeeded,
            DeploymentResultStatus::Rejected => JobStatus::Rejected,
            _ => JobStatus::Failed,
        }
    }

    /// Whether the orchestrator may re-run the task for this result.
    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.is_retryable())
    }
}
