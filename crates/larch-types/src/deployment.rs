//! Deployment records.
//!
//! A `Deployment` is an intent to reach a target state plus the bookkeeping
//! the core maintains while reconciling to it. It is created by an ingester,
//! owned by the queue until polled, owned by the orchestrator while
//! executing, and discarded once the finisher commits the result.

use crate::document::DeploymentDocument;
use crate::ids::{ConfigurationArn, DeploymentId};
use crate::intent::DeploymentIntent;
use serde::{Deserialize, Serialize};

/// Where a deployment intent originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    /// Cloud job stream ("first wins" semantics).
    CloudJob,
    /// Device-shadow stream ("latest wins" semantics).
    Shadow,
    /// Local request over IPC.
    Local,
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentType::CloudJob => write!(f, "CLOUD_JOB"),
            DeploymentType::Shadow => write!(f, "SHADOW"),
            DeploymentType::Local => write!(f, "LOCAL"),
        }
    }
}

/// Pipeline stage a deployment is in.
///
/// Stages beyond `Default` belong to the host-agent (nucleus) self-update
/// flow, which spans a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStage {
    /// Normal single-lifetime deployment.
    Default,
    /// Re-queued after a restart to finish pre-activation steps.
    Bootstrap,
    /// First post-restart boot of a nucleus update; observing health.
    HostAgentActivation,
    /// Post-rollback-restart boot; observing the reverted configuration.
    HostAgentRollback,
}

impl DeploymentStage {
    /// Whether this stage is entered after a process restart.
    pub fn post_restart(&self) -> bool {
        matches!(
            self,
            DeploymentStage::Bootstrap
                | DeploymentStage::HostAgentActivation
                | DeploymentStage::HostAgentRollback
        )
    }
}

impl std::fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStage::Default => write!(f, "DEFAULT"),
            DeploymentStage::Bootstrap => write!(f, "BOOTSTRAP"),
            DeploymentStage::HostAgentActivation => write!(f, "HOST_AGENT_ACTIVATION"),
            DeploymentStage::HostAgentRollback => write!(f, "HOST_AGENT_ROLLBACK"),
        }
    }
}

/// An intent to reach a target state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Stable identifier; deduplication key together with type and stage.
    pub id: DeploymentId,

    /// Where the intent came from.
    pub deployment_type: DeploymentType,

    /// Pipeline stage.
    pub stage: DeploymentStage,

    /// Cancellation marker. A cancelled deployment carries no intent; it
    /// asks the core to stop the deployment with the same identity.
    pub cancelled: bool,

    /// Versioned cloud identifier, when the intent has one.
    pub configuration_arn: Option<ConfigurationArn>,

    /// Raw intent as received from the ingester.
    pub intent: Option<DeploymentIntent>,

    /// Normalized document, filled in by the converter.
    pub document: Option<DeploymentDocument>,

    /// Failure detail persisted between nucleus-update stages.
    pub stage_details: Option<String>,
}

impl Deployment {
    /// Create a deployment for a raw intent, in the default stage.
    pub fn new(id: DeploymentId, deployment_type: DeploymentType, intent: DeploymentIntent) -> Self {
        Self {
            id,
            deployment_type,
            stage: DeploymentStage::Default,
            cancelled: false,
            configuration_arn: None,
            intent: Some(intent),
            document: None,
            stage_details: None,
        }
    }

    /// Create a cancellation marker for the deployment with this identity.
    pub fn cancellation(id: DeploymentId, deployment_type: DeploymentType) -> Self {
        Self {
            id,
            deployment_type,
            stage: DeploymentStage::Default,
            cancelled: true,
            configuration_arn: None,
            intent: None,
            document: None,
            stage_details: None,
        }
    }

    /// Set the stage.
    pub fn with_stage(mut self, stage: DeploymentStage) -> Self {
        self.stage = stage;
        self
    }

    /// Set the configuration ARN.
    pub fn with_configuration_arn(mut self, arn: ConfigurationArn) -> Self {
        self.configuration_arn = Some(arn);
        self
    }

    /// Queue identity: two deployments are "the same" iff these match.
    pub fn identity(&self) -> (DeploymentType, &DeploymentId, DeploymentStage) {
        (self.deployment_type, &self.id, self.stage)
    }

    /// Whether `other` targets the same deployment, ignoring stage.
    pub fn same_target(&self, other: &Deployment) -> bool {
        self.deployment_type == other.deployment_type && self.id == other.id
    }
}
