//! The per-deployment pipeline.
//!
//! One task drives a deployment from a normalized document to a merge
//! result: best-effort fleet-inventory refresh, dependency resolution,
//! artifact preparation, runtime-config resolution, then the hand-off to
//! the config merger.

use crate::merge::{ConfigMerger, MergeOutcome};
use larch_supervisor::{
    CancelToken, ComponentManager, ComponentManagerError, FleetInventory, FleetInventoryError,
};
use larch_types::{
    Deployment, DeploymentDocument, DeploymentResult, DeploymentResultStatus, GroupToRoots,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const INVENTORY_ATTEMPTS: u32 = 3;
const INVENTORY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const INVENTORY_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// What one pipeline run produced.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The pipeline ran to a classified result.
    Completed(DeploymentResult),

    /// The run was cancelled cleanly; no result is published.
    Cancelled,

    /// A host-agent restart was requested mid-merge.
    RestartPending,
}

/// One deployment's pipeline run.
pub struct DeploymentTask {
    deployment: Deployment,
    document: DeploymentDocument,
    components: Arc<dyn ComponentManager>,
    fleet: Arc<dyn FleetInventory>,
    merger: Arc<ConfigMerger>,
    group_to_roots: GroupToRoots,
    current_roots: Vec<String>,
    token: CancelToken,
}

impl DeploymentTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deployment: Deployment,
        document: DeploymentDocument,
        components: Arc<dyn ComponentManager>,
        fleet: Arc<dyn FleetInventory>,
        merger: Arc<ConfigMerger>,
        group_to_roots: GroupToRoots,
        current_roots: Vec<String>,
        token: CancelToken,
    ) -> Self {
        Self {
            deployment,
            document,
            components,
            fleet,
            merger,
            group_to_roots,
            current_roots,
            token,
        }
    }

    /// Run the pipeline once. Re-invocable: a retryable failure leaves no
    /// partial state behind.
    #[instrument(skip_all, fields(deployment_id = %self.deployment.id))]
    pub async fn run(&self) -> TaskOutcome {
        // 1. Capability discovery, best-effort.
        if self.refresh_fleet_inventory().await.is_err() {
            return TaskOutcome::Cancelled;
        }

        // 2. Resolve the transitive dependency graph.
        let resolved = match self
            .components
            .resolve_dependencies(&self.document, &self.group_to_roots)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => return Self::pre_merge_failure(err),
        };
        info!(components = resolved.len(), "Resolved dependencies");
        if self.token.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        // 3. Download and unpack artifacts; interruptible.
        match self.components.prepare_packages(&resolved, &self.token).await {
            Ok(()) => {}
            Err(ComponentManagerError::Cancelled) => return TaskOutcome::Cancelled,
            Err(err) => return Self::pre_merge_failure(err),
        }

        // 4. Build the target service-configuration map.
        let target = match self
            .components
            .resolve_runtime_config(&resolved, &self.document, &self.current_roots)
            .await
        {
            Ok(target) => target,
            Err(err) => return Self::pre_merge_failure(err),
        };

        // 5. Hand off to the merger; never interrupted once activating.
        match self
            .merger
            .merge(&self.deployment, &self.document, &target, &self.token)
            .await
        {
            Ok(MergeOutcome::Completed(result)) => TaskOutcome::Completed(result),
            Ok(MergeOutcome::Cancelled) => TaskOutcome::Cancelled,
            Ok(MergeOutcome::RestartPending) => TaskOutcome::RestartPending,
            Err(err) => TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedNoStateChange,
                err,
            )),
        }
    }

    fn pre_merge_failure(err: ComponentManagerError) -> TaskOutcome {
        TaskOutcome::Completed(DeploymentResult::failed(
            DeploymentResultStatus::FailedNoStateChange,
            err.into(),
        ))
    }

    /// Refresh the device's group list. Forbidden responses are swallowed;
    /// transient failures retry with capped exponential backoff and are
    /// swallowed once attempts run out. Only cancellation aborts the run.
    async fn refresh_fleet_inventory(&self) -> Result<(), ()> {
        let mut backoff = INVENTORY_INITIAL_BACKOFF;
        for attempt in 1..=INVENTORY_ATTEMPTS {
            match self.fleet.refresh_group_memberships().await {
                Ok(groups) => {
                    debug!(groups = groups.len(), "Refreshed fleet inventory");
                    return Ok(());
                }
                Err(FleetInventoryError::Forbidden(reason)) => {
                    debug!(reason, "Fleet inventory refresh forbidden; continuing");
                    return Ok(());
                }
                Err(FleetInventoryError::Transient(reason)) => {
                    if attempt == INVENTORY_ATTEMPTS {
                        warn!(reason, "Fleet inventory refresh exhausted retries; continuing");
                        return Ok(());
                    }
                    debug!(reason, attempt, "Fleet inventory refresh failed; backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.token.cancelled() => return Err(()),
                    }
                    backoff = (backoff * 2).min(INVENTORY_BACKOFF_CAP);
                }
            }
        }
        Ok(())
    }
}
