//! Configuration merge engine.
//!
//! Given a target service-configuration map, the merger diffs it against
//! the running graph, negotiates a safety window, swaps the configuration
//! atomically, tracks convergence, and rolls back on failure.

pub mod activator;
pub mod convergence;
pub mod diff;
pub mod merger;

pub use activator::{ActivationOutcome, ActivationWatch, Activator, DefaultActivator};
pub use diff::ServiceDiff;
pub use merger::{ConfigMerger, MergeOutcome};

use crate::nucleus::NucleusUpdateActivator;
use larch_store::DeploymentDirectoryManager;
use larch_supervisor::{BootstrapManager, ServiceGraph};
use std::sync::Arc;
use std::time::Duration;

/// Factory for the activator variant.
///
/// The pre-flight check against the bootstrap manager decides whether this
/// merge can complete in-process or must go through a host-agent restart.
pub fn create_activator(
    restart_required: bool,
    graph: Arc<dyn ServiceGraph>,
    bootstrap: Arc<dyn BootstrapManager>,
    workspace: Arc<DeploymentDirectoryManager>,
    restart_grace: Duration,
) -> Arc<dyn Activator> {
    if restart_required {
        Arc::new(NucleusUpdateActivator::new(
            graph,
            bootstrap,
            workspace,
            restart_grace,
        ))
    } else {
        Arc::new(DefaultActivator::new(graph, workspace))
    }
}
