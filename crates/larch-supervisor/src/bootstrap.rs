//! Bootstrap-layer interface for host-agent self-updates.

use crate::error::Result;
use crate::service::ServiceConfigMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One pre/post-restart step recorded for a host-agent update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapTask {
    /// Component whose bootstrap lifecycle step runs across the restart.
    pub component_name: String,

    /// Whether the step has already run.
    pub completed: bool,
}

impl BootstrapTask {
    pub fn pending(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            completed: false,
        }
    }
}

/// The bootstrap layer, as seen by the deployment core.
#[async_trait]
pub trait BootstrapManager: Send + Sync {
    /// Pre-flight: does applying `target` require restarting the
    /// host-agent process?
    async fn restart_required(&self, target: &ServiceConfigMap) -> Result<bool>;

    /// Persist the bootstrap task list for the next process lifetime.
    async fn write_bootstrap_tasks(&self, tasks: &[BootstrapTask], path: &Path) -> Result<()>;

    /// Load a previously persisted bootstrap task list.
    async fn load_bootstrap_tasks(&self, path: &Path) -> Result<Vec<BootstrapTask>>;

    /// Run the tasks still pending in the persisted list. Returns true if
    /// another restart is required before activation can proceed.
    async fn run_pending(&self, path: &Path) -> Result<bool>;

    /// Whether the loader left a restart-panic marker in the nucleus work
    /// directory, meaning the last restart attempt failed and the loader
    /// already fell back.
    async fn restart_panic_marker_exists(&self) -> bool;
}
