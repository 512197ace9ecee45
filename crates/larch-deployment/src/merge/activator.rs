//! Activators apply a prepared target configuration to the service graph.

use crate::merge::diff::ServiceDiff;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use larch_store::DeploymentDirectoryManager;
use larch_supervisor::{ServiceConfigMap, ServiceGraph, ServiceState};
use larch_types::{Deployment, DeploymentDocument, DeploymentError};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Services to observe after an activation, and the moment the graph
/// mutation began.
#[derive(Debug, Clone)]
pub struct ActivationWatch {
    /// Added and auto-start-updated services tracked to convergence.
    pub tracked: Vec<String>,

    /// Broken-state decisions compare against this instant.
    pub merge_start: DateTime<Utc>,
}

/// What an activator did with the target configuration.
#[derive(Debug, Clone)]
pub enum ActivationOutcome {
    /// The graph was mutated in-process; observe the watch to convergence.
    Converging(ActivationWatch),

    /// A host-agent restart was requested; the result is produced in the
    /// next process lifetime.
    RestartPending,
}

/// Applies a target configuration to the running service graph.
#[async_trait]
pub trait Activator: Send + Sync {
    /// Apply `target`. The rollback snapshot must exist before any visible
    /// service-graph mutation.
    async fn activate(
        &self,
        deployment: &Deployment,
        document: &DeploymentDocument,
        target: &ServiceConfigMap,
        diff: &ServiceDiff,
    ) -> Result<ActivationOutcome, DeploymentError>;

    /// Activator variant name.
    fn name(&self) -> &str;
}

/// In-process activator for deployments that do not touch the host agent.
pub struct DefaultActivator {
    graph: Arc<dyn ServiceGraph>,
    workspace: Arc<DeploymentDirectoryManager>,
}

impl DefaultActivator {
    pub fn new(graph: Arc<dyn ServiceGraph>, workspace: Arc<DeploymentDirectoryManager>) -> Self {
        Self { graph, workspace }
    }

    /// Swap the configuration in and drive the graph toward it.
    ///
    /// Shared by the forward pass and the rollback pass (which calls it
    /// with the snapshot config and the inverse diff).
    pub(crate) async fn apply(
        &self,
        target: &ServiceConfigMap,
        diff: &ServiceDiff,
    ) -> Result<ActivationWatch, DeploymentError> {
        let merge_start = Utc::now();

        // Atomic subtree swap through the supervisor's publish queue.
        self.graph.replace_config(target).await?;
        self.graph
            .write_effective_config(&self.workspace.target_config_file_path())
            .await?;

        // Reinstall services the supervisor currently reports broken.
        for name in self.graph.service_names().await? {
            if let Ok(snapshot) = self.graph.status(&name).await {
                if snapshot.state == ServiceState::Broken {
                    debug!(service = %name, "Reinstalling broken service");
                    self.graph.request_reinstall(&name).await?;
                }
            }
        }

        // Start added services that auto-start; user services are never
        // force-started.
        for name in &diff.to_add {
            let snapshot = self.graph.status(name).await?;
            if snapshot.should_auto_start {
                self.graph.request_start(name).await?;
            }
        }

        // Remove obsolete services: close blocks until terminal.
        for name in &diff.to_remove {
            self.graph.close(name).await?;
            self.graph.remove_service_config(name).await?;
        }

        let mut tracked: Vec<String> = Vec::new();
        for name in diff.to_add.iter().chain(diff.to_update.iter()) {
            let snapshot = self.graph.status(name).await?;
            if snapshot.should_auto_start {
                tracked.push(name.clone());
            }
        }

        Ok(ActivationWatch {
            tracked,
            merge_start,
        })
    }
}

#[async_trait]
impl Activator for DefaultActivator {
    #[instrument(skip_all, fields(deployment_id = %deployment.id))]
    async fn activate(
        &self,
        deployment: &Deployment,
        _document: &DeploymentDocument,
        target: &ServiceConfigMap,
        diff: &ServiceDiff,
    ) -> Result<ActivationOutcome, DeploymentError> {
        // Rollback snapshot before any visible mutation.
        self.workspace
            .take_config_snapshot(self.graph.as_ref())
            .await?;

        let watch = self.apply(target, diff).await?;
        info!(
            added = diff.to_add.len(),
            updated = diff.to_update.len(),
            removed = diff.to_remove.len(),
            tracked = watch.tracked.len(),
            "Activated target configuration"
        );
        Ok(ActivationOutcome::Converging(watch))
    }

    fn name(&self) -> &str {
        "default"
    }
}
