//! Safety-window coordination.
//!
//! Before mutating the service graph the merger registers an update action;
//! the coordinator notifies interested components, waits (bounded) for
//! their acknowledgment, and grants the window. A pending action can be
//! discarded by a cancellation until the moment it is granted.

use crate::error::Result;
use async_trait::async_trait;
use larch_types::DeploymentId;
use std::time::Duration;

/// Request to open a safety window.
#[derive(Debug, Clone)]
pub struct UpdateWindowRequest {
    /// Deployment asking for the window; key for discards.
    pub deployment_id: DeploymentId,

    /// Bound on the component-acknowledgment wait.
    pub timeout: Duration,

    /// Whether the pending update restarts the host-agent process.
    pub host_agent_restart: bool,
}

/// Outcome of waiting for a safety window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowGrant {
    /// The window opened; the merger may mutate the graph.
    Granted,
    /// The pending action was discarded before being granted.
    Discarded,
}

/// The safety service, as seen by the deployment core.
#[async_trait]
pub trait UpdateCoordinator: Send + Sync {
    /// Register an update action and wait for the window.
    ///
    /// Resolves `Granted` once components acknowledge (or the timeout
    /// elapses), `Discarded` if the action is discarded while pending.
    async fn acquire_window(&self, request: UpdateWindowRequest) -> Result<WindowGrant>;

    /// Discard a pending action. Returns true iff the action was still
    /// pending; false means it is past the point of no return.
    async fn discard_pending(&self, deployment_id: &DeploymentId) -> Result<bool>;
}
