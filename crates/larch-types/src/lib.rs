//! LARCH Types - Core types for the edge deployment core
//!
//! LARCH (Local Agent for Reconciling Component Hierarchies) is the
//! deployment core of an edge-device agent. It drains configuration intents
//! from a cloud control plane or local requests and reconciles the set of
//! components running on the device to match them.
//!
//! ## Key Concepts
//!
//! - **Deployment**: an intent to reach a target state, plus the bookkeeping
//!   the core maintains while reconciling to it
//! - **DeploymentDocument**: the normalized form every intent shape is
//!   converted to before execution
//! - **Group membership**: dual tables mapping deployment groups to root
//!   components and components back to the groups that own them
//! - **Status records**: persisted, replayable terminal-status updates
//! - **Error taxonomy**: hierarchical error codes and orthogonal type tags
//!   carried by every failed deployment

#![deny(unsafe_code)]

pub mod deployment;
pub mod document;
pub mod error;
pub mod ids;
pub mod intent;
pub mod membership;
pub mod result;
pub mod status;

// Re-export main types
pub use deployment::{Deployment, DeploymentStage, DeploymentType};
pub use document::{
    ComponentUpdatePolicy, ConfigurationUpdate, DeploymentDocument, DocumentValidationError,
    FailureHandlingPolicy, RootComponent, RunWith, UpdatePolicyAction,
};
pub use error::{DeploymentError, ErrorCode, ErrorType};
pub use ids::{ConfigurationArn, DeploymentId};
pub use intent::{
    CloudComponentTarget, CloudConfiguration, DeploymentIntent, FleetComponentTarget,
    FleetConfiguration, LocalOverrideRequest,
};
pub use membership::{
    ComponentsToGroups, DeploymentSummary, GroupRoot, GroupToRoots, LOCAL_DEPLOYMENT_GROUP,
};
pub use result::{DeploymentResult, DeploymentResultStatus};
pub use status::{JobStatus, StatusDetails, StatusRecord};
