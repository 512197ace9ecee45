//! The normalized deployment document.
//!
//! Every intent shape the core accepts is converted to a
//! `DeploymentDocument` before execution.

use crate::ids::ConfigurationArn;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A root component pinned to an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootComponent {
    /// Component name; unique within a document.
    pub name: String,

    /// Pinned version.
    pub version: semver::Version,
}

impl RootComponent {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Per-component configuration update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationUpdate {
    /// Tree merged into the component's existing configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<serde_json::Value>,

    /// JSON pointers reset to their component defaults before the merge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reset: Vec<String>,
}

/// Per-component runtime overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWith {
    /// POSIX user the component's lifecycle steps run as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posix_user: Option<String>,

    /// POSIX group the component's lifecycle steps run as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posix_group: Option<String>,
}

/// Whether components are consulted before the service graph is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdatePolicyAction {
    /// Notify interested components and wait for their acknowledgment.
    NotifyComponents,
    /// Mutate immediately.
    SkipNotify,
}

/// Safety-window policy for the configuration swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentUpdatePolicy {
    /// Notification behavior.
    pub action: UpdatePolicyAction,

    /// Bound on how long to wait for component acknowledgment.
    pub timeout_secs: u64,
}

impl Default for ComponentUpdatePolicy {
    fn default() -> Self {
        Self {
            action: UpdatePolicyAction::NotifyComponents,
            timeout_secs: 60,
        }
    }
}

/// What to do when a deployment fails after mutating the service graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureHandlingPolicy {
    /// Revert to the pre-merge snapshot.
    #[default]
    Rollback,
    /// Leave the device in the failed state.
    DoNothing,
}

/// Document validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentValidationError {
    #[error("duplicate root component: {0}")]
    DuplicateRootComponent(String),

    #[error("root component with empty name")]
    EmptyComponentName,
}

/// The normalized form of a deployment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDocument {
    /// Deployment group the intent belongs to; local intents use the
    /// reserved `LOCAL_DEPLOYMENT` group.
    pub group_name: String,

    /// Versioned cloud identifier, when the intent has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_arn: Option<ConfigurationArn>,

    /// When the intent was created.
    pub timestamp: DateTime<Utc>,

    /// Ordered root components with pinned versions.
    pub root_components: Vec<RootComponent>,

    /// Per-component configuration updates.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration_updates: BTreeMap<String, ConfigurationUpdate>,

    /// Per-component runtime overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_overrides: BTreeMap<String, RunWith>,

    /// Safety-window policy.
    #[serde(default)]
    pub component_update_policy: ComponentUpdatePolicy,

    /// Post-merge failure policy.
    #[serde(default)]
    pub failure_handling_policy: FailureHandlingPolicy,

    /// Capabilities the device must advertise for this intent to apply.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_capabilities: BTreeSet<String>,
}

impl DeploymentDocument {
    /// Validate the document invariants: root names unique and non-empty.
    pub fn validate(&self) -> Result<(), DocumentValidationError> {
        let mut seen = BTreeSet::new();
        for root in &self.root_components {
            if root.name.is_empty() {
                return Err(DocumentValidationError::EmptyComponentName);
            }
            if !seen.insert(root.name.as_str()) {
                return Err(DocumentValidationError::DuplicateRootComponent(
                    root.name.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Names of the root components, in document order.
    pub fn root_names(&self) -> Vec<String> {
        self.root_components.iter().map(|r| r.name.clone()).collect()
    }
}
