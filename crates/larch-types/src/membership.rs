//! Group membership tables.
//!
//! Two dual tables track which components belong to which deployment
//! groups. `GroupToRoots` is authoritative and updated per committed
//! deployment; `ComponentsToGroups` is derived from it plus the transitive
//! hard-dependency closure and is never hand-edited.

use crate::deployment::DeploymentType;
use crate::ids::{ConfigurationArn, DeploymentId};
use crate::status::JobStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved group name representing all local intents.
pub const LOCAL_DEPLOYMENT_GROUP: &str = "LOCAL_DEPLOYMENT";

/// One root component entry inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRoot {
    /// Pinned version of the root.
    pub version: semver::Version,

    /// Configuration ARN of the deployment that installed the root.
    pub group_config_arn: String,

    /// Group name recorded at install time.
    pub group_config_name: String,
}

/// Authoritative table: group name → root component name → entry.
pub type GroupToRoots = BTreeMap<String, BTreeMap<String, GroupRoot>>;

/// Derived table: component name → group config ARN → group name.
pub type ComponentsToGroups = BTreeMap<String, BTreeMap<String, String>>;

/// Summary of the last deployment a group received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    /// Deployment the summary describes.
    pub deployment_id: DeploymentId,

    /// Which stream it arrived on.
    pub deployment_type: DeploymentType,

    /// Versioned cloud identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_arn: Option<ConfigurationArn>,

    /// Terminal status.
    pub status: JobStatus,

    /// When the deployment finished.
    pub finished_at: DateTime<Utc>,
}
