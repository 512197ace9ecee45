//! Deployment status records published to consumers.

use crate::error::{ErrorCode, ErrorType};
use crate::ids::{ConfigurationArn, DeploymentId};
use crate::deployment::DeploymentType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Externally visible deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    InProgress,
    Succeeded,
    Failed,
    Rejected,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::InProgress => write!(f, "IN_PROGRESS"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Failure details attached to a terminal status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusDetails {
    /// Human-readable cause: outermost message joined with the root cause.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_cause: String,

    /// Ordered error codes, outer to inner; may contain duplicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_stack: Vec<ErrorCode>,

    /// Deduplicated type tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub error_types: BTreeSet<ErrorType>,
}

/// A persisted status update for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Deployment the record belongs to.
    pub deployment_id: DeploymentId,

    /// Versioned cloud identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_arn: Option<ConfigurationArn>,

    /// Which stream the deployment arrived on.
    pub deployment_type: DeploymentType,

    /// The published status.
    pub status: JobStatus,

    /// Failure details; empty for non-failed statuses.
    #[serde(default)]
    pub status_details: StatusDetails,

    /// Root component names the deployment targeted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root_packages: Vec<String>,
}
