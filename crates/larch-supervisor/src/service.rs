//! Service supervisor interface.
//!
//! The supervisor owns the process-wide service graph and its
//! effective-config tree. The core mutates that tree only through
//! [`ServiceGraph::replace_config`], which has replace-subtree-and-wait
//! semantics.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Full service-configuration map: service name → configuration subtree.
pub type ServiceConfigMap = BTreeMap<String, serde_json::Value>;

/// Reported lifecycle state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    New,
    Installed,
    Running,
    Finished,
    Stopping,
    Broken,
}

impl ServiceState {
    /// Whether the state counts as healthy-running for convergence.
    pub fn is_settled(&self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Finished)
    }
}

/// Point-in-time view of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Service name.
    pub name: String,

    /// Reported state.
    pub state: ServiceState,

    /// When the state last changed.
    pub state_mod_time: DateTime<Utc>,

    /// Whether the service has reached its declared desired state.
    pub reached_desired_state: bool,

    /// Whether the supervisor starts the service automatically.
    pub should_auto_start: bool,

    /// Built-in/system services are never removed by a deployment.
    pub builtin: bool,

    /// Declared per-service startup timeout.
    pub startup_timeout: Duration,
}

/// The service supervisor, as seen by the deployment core.
#[async_trait]
pub trait ServiceGraph: Send + Sync {
    /// Names of every supervised service.
    async fn service_names(&self) -> Result<Vec<String>>;

    /// The current effective service-configuration map.
    async fn current_config(&self) -> Result<ServiceConfigMap>;

    /// Point-in-time view of one service.
    async fn status(&self, name: &str) -> Result<ServiceSnapshot>;

    /// Direct hard-dependency edges of a service.
    async fn hard_dependencies(&self, name: &str) -> Result<Vec<String>>;

    /// Ask the supervisor to start a service.
    async fn request_start(&self, name: &str) -> Result<()>;

    /// Ask the supervisor to reinstall a (broken) service.
    async fn request_reinstall(&self, name: &str) -> Result<()>;

    /// Stop a service and resolve once it reports a terminal state.
    async fn close(&self, name: &str) -> Result<()>;

    /// Atomically swap service configuration in, waiting until applied.
    ///
    /// Services present in the graph but absent from `target` are left in
    /// place; removal is a separate, explicit step.
    async fn replace_config(&self, target: &ServiceConfigMap) -> Result<()>;

    /// Delete one service's configuration subtree and drop it from the
    /// supervisor context.
    async fn remove_service_config(&self, name: &str) -> Result<()>;

    /// Write the current effective config as a transaction log at `path`.
    async fn write_effective_config(&self, path: &Path) -> Result<()>;

    /// Request a supervised restart of the host-agent process.
    async fn request_restart(&self, grace: Duration) -> Result<()>;
}
