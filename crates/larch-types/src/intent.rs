//! Raw intent shapes accepted by the core.
//!
//! Ingesters hand the core one of three document shapes; the converter
//! normalizes all of them into a [`DeploymentDocument`](crate::document::DeploymentDocument).

use crate::document::{ComponentUpdatePolicy, ConfigurationUpdate, FailureHandlingPolicy, RunWith};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A raw deployment intent, as received from an ingester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentIntent {
    /// Full configuration document downloaded from the cloud.
    CloudConfiguration(CloudConfiguration),
    /// Legacy in-band cloud-job payload.
    FleetConfiguration(FleetConfiguration),
    /// Local merge/remove request.
    LocalOverride(LocalOverrideRequest),
}

/// Target state for one component in a cloud configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudComponentTarget {
    /// Pinned version string; validated as semver during conversion.
    pub version: String,

    /// Configuration update for the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_update: Option<ConfigurationUpdate>,

    /// Runtime overrides for the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_with: Option<RunWith>,
}

/// Full configuration document downloaded via pre-signed URL.
///
/// Already close to the normalized target; conversion fills defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudConfiguration {
    /// Versioned configuration identifier.
    pub configuration_arn: String,

    /// Deployment group the configuration targets.
    pub group_name: String,

    /// Root components and their target state.
    pub components: BTreeMap<String, CloudComponentTarget>,

    /// Safety-window policy; defaulted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_update_policy: Option<ComponentUpdatePolicy>,

    /// Failure policy; defaults to rollback when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_handling_policy: Option<FailureHandlingPolicy>,

    /// When the configuration was created.
    pub creation_timestamp: DateTime<Utc>,

    /// Capabilities the device must advertise.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_capabilities: BTreeSet<String>,
}

/// Target state for one component in a legacy fleet document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetComponentTarget {
    /// Pinned version string; validated as semver during conversion.
    pub version: String,

    /// Whole configuration object for the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<serde_json::Value>,
}

/// Legacy in-band cloud-job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfiguration {
    /// Deployment group the configuration targets.
    pub group_name: String,

    /// Root components keyed by name.
    pub components: BTreeMap<String, FleetComponentTarget>,

    /// When the configuration was created.
    pub creation_timestamp: DateTime<Utc>,

    /// Failure policy; legacy documents that omit it get `DO_NOTHING`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_handling_policy: Option<FailureHandlingPolicy>,
}

/// Local merge/remove request.
///
/// Effective roots are computed against the currently-recorded local roots:
/// `(current − components_to_remove) ∪ components_to_merge`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalOverrideRequest {
    /// Components to add or re-pin, name → version string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components_to_merge: BTreeMap<String, String>,

    /// Components to drop from the local root set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components_to_remove: Vec<String>,

    /// Whole-object configuration replacement, name → configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub component_name_to_config: BTreeMap<String, serde_json::Value>,

    /// Merge/reset configuration updates, name → update.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration_updates: BTreeMap<String, ConfigurationUpdate>,

    /// Runtime overrides, name → overrides.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_overrides: BTreeMap<String, RunWith>,

    /// Safety-window policy; defaulted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_update_policy: Option<ComponentUpdatePolicy>,

    /// Failure policy; defaults to rollback when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_handling_policy: Option<FailureHandlingPolicy>,

    /// Capabilities the device must advertise.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub required_capabilities: BTreeSet<String>,
}
