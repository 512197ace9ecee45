//! Host-agent (nucleus) self-update path.
//!
//! A deployment that updates the agent process itself cannot finish in one
//! process lifetime. The activator variant persists what the next lifetime
//! needs (bootstrap tasks, the target config, the flipped stage) and
//! requests a supervised restart; the update task re-enters after each
//! restart and walks the staged state machine to a terminal result.

use crate::merge::activator::{ActivationOutcome, ActivationWatch, Activator};
use crate::merge::convergence::wait_for_convergence;
use crate::merge::diff::ServiceDiff;
use crate::task::TaskOutcome;
use async_trait::async_trait;
use chrono::Utc;
use larch_store::DeploymentDirectoryManager;
use larch_supervisor::{BootstrapManager, BootstrapTask, ServiceConfigMap, ServiceGraph};
use larch_types::{
    Deployment, DeploymentDocument, DeploymentError, DeploymentResult, DeploymentResultStatus,
    DeploymentStage, ErrorCode, ErrorType,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Activator for merges that restart the host-agent process.
///
/// Persists the cross-restart state and returns without completing the
/// merge; the result is produced by a [`NucleusUpdateTask`] in the next
/// process lifetime.
pub struct NucleusUpdateActivator {
    graph: Arc<dyn ServiceGraph>,
    bootstrap: Arc<dyn BootstrapManager>,
    workspace: Arc<DeploymentDirectoryManager>,
    restart_grace: Duration,
}

impl NucleusUpdateActivator {
    pub fn new(
        graph: Arc<dyn ServiceGraph>,
        bootstrap: Arc<dyn BootstrapManager>,
        workspace: Arc<DeploymentDirectoryManager>,
        restart_grace: Duration,
    ) -> Self {
        Self {
            graph,
            bootstrap,
            workspace,
            restart_grace,
        }
    }
}

#[async_trait]
impl Activator for NucleusUpdateActivator {
    #[instrument(skip_all, fields(deployment_id = %deployment.id))]
    async fn activate(
        &self,
        deployment: &Deployment,
        _document: &DeploymentDocument,
        target: &ServiceConfigMap,
        diff: &ServiceDiff,
    ) -> Result<ActivationOutcome, DeploymentError> {
        // Rollback snapshot before anything else; the post-rollback boot
        // converges against it.
        self.workspace
            .take_config_snapshot(self.graph.as_ref())
            .await?;

        // The loader applies the target in the next lifetime.
        let rendered = serde_json::to_string_pretty(target)
            .map_err(|e| DeploymentError::io_write(e.to_string()))?;
        std::fs::write(self.workspace.target_config_file_path(), rendered)
            .map_err(|e| DeploymentError::io_write(e.to_string()))?;

        let tasks: Vec<BootstrapTask> = diff
            .to_add
            .iter()
            .chain(diff.to_update.iter())
            .map(BootstrapTask::pending)
            .collect();
        self.bootstrap
            .write_bootstrap_tasks(&tasks, &self.workspace.bootstrap_task_file_path())
            .await?;

        self.workspace
            .update_stage(DeploymentStage::HostAgentActivation, None)?;

        info!(
            bootstrap_tasks = tasks.len(),
            "Host-agent update staged; requesting restart"
        );
        self.graph.request_restart(self.restart_grace).await?;
        Ok(ActivationOutcome::RestartPending)
    }

    fn name(&self) -> &str {
        "nucleus-update"
    }
}

/// Post-restart stages of a host-agent update.
pub struct NucleusUpdateTask {
    deployment: Deployment,
    graph: Arc<dyn ServiceGraph>,
    bootstrap: Arc<dyn BootstrapManager>,
    workspace: Arc<DeploymentDirectoryManager>,
    poll_interval: Duration,
    restart_grace: Duration,
}

impl NucleusUpdateTask {
    pub fn new(
        deployment: Deployment,
        graph: Arc<dyn ServiceGraph>,
        bootstrap: Arc<dyn BootstrapManager>,
        workspace: Arc<DeploymentDirectoryManager>,
        poll_interval: Duration,
        restart_grace: Duration,
    ) -> Self {
        Self {
            deployment,
            graph,
            bootstrap,
            workspace,
            poll_interval,
            restart_grace,
        }
    }

    /// Drive the stage persisted in the deployment metadata.
    #[instrument(skip_all, fields(deployment_id = %self.deployment.id, stage = %self.deployment.stage))]
    pub async fn run(&self) -> TaskOutcome {
        match self.deployment.stage {
            DeploymentStage::Bootstrap => self.resume_bootstrap().await,
            DeploymentStage::HostAgentActivation => self.observe_activation().await,
            DeploymentStage::HostAgentRollback => self.observe_rollback().await,
            DeploymentStage::Default => TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedNoStateChange,
                DeploymentError::new(
                    ErrorCode::NucleusError,
                    "host-agent update task entered without a post-restart stage",
                )
                .with_type(ErrorType::NucleusError),
            )),
        }
    }

    /// Finish the pre-activation steps left over from the prior lifetime,
    /// then restart into activation.
    async fn resume_bootstrap(&self) -> TaskOutcome {
        let path = self.workspace.bootstrap_task_file_path();
        if let Err(err) = self.bootstrap.run_pending(&path).await {
            return TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedNoStateChange,
                err.into(),
            ));
        }
        if let Err(err) = self
            .workspace
            .update_stage(DeploymentStage::HostAgentActivation, None)
        {
            return TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedNoStateChange,
                err.into(),
            ));
        }
        info!("Bootstrap steps complete; requesting restart into activation");
        if let Err(err) = self.graph.request_restart(self.restart_grace).await {
            return TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedNoStateChange,
                err.into(),
            ));
        }
        TaskOutcome::RestartPending
    }

    /// First post-restart boot: observe health for the convergence window;
    /// on failure persist the rollback stage and restart again.
    async fn observe_activation(&self) -> TaskOutcome {
        if self.bootstrap.restart_panic_marker_exists().await {
            return TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedRollbackComplete,
                restart_panic_error(),
            ));
        }

        match self.observe_services().await {
            Ok(()) => {
                info!("Host-agent update converged");
                TaskOutcome::Completed(DeploymentResult::successful())
            }
            Err(error) => {
                warn!(error = %error, "Host-agent activation failed; staging rollback");
                if let Err(store_err) = self.workspace.update_stage(
                    DeploymentStage::HostAgentRollback,
                    Some(error.message().to_string()),
                ) {
                    return TaskOutcome::Completed(DeploymentResult::failed(
                        DeploymentResultStatus::FailedUnableToRollback,
                        DeploymentError::from(store_err).caused_by(error),
                    ));
                }
                if let Err(restart_err) = self.graph.request_restart(self.restart_grace).await {
                    return TaskOutcome::Completed(DeploymentResult::failed(
                        DeploymentResultStatus::FailedUnableToRollback,
                        DeploymentError::from(restart_err).caused_by(error),
                    ));
                }
                TaskOutcome::RestartPending
            }
        }
    }

    /// Post-rollback boot: observe the reverted configuration.
    async fn observe_rollback(&self) -> TaskOutcome {
        if self.bootstrap.restart_panic_marker_exists().await {
            return TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedRollbackComplete,
                restart_panic_error(),
            ));
        }

        let original = match &self.deployment.stage_details {
            Some(details) => DeploymentError::new(ErrorCode::NucleusError, details.clone())
                .with_type(ErrorType::NucleusError),
            // A silent loader restart dropped the persisted details.
            None => DeploymentError::io_write(
                "stage details missing after rollback; the loader restarted silently",
            ),
        };

        match self.observe_services().await {
            Ok(()) => TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedRollbackComplete,
                original,
            )),
            Err(error) => TaskOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedUnableToRollback,
                error.caused_by(original),
            )),
        }
    }

    /// Observe every auto-start service to its desired state.
    async fn observe_services(&self) -> Result<(), DeploymentError> {
        let mut tracked = Vec::new();
        for name in self.graph.service_names().await? {
            if let Ok(snapshot) = self.graph.status(&name).await {
                if snapshot.should_auto_start {
                    tracked.push(name);
                }
            }
        }
        let watch = ActivationWatch {
            tracked,
            merge_start: Utc::now(),
        };
        wait_for_convergence(self.graph.as_ref(), &watch, self.poll_interval).await
    }
}

fn restart_panic_error() -> DeploymentError {
    DeploymentError::new(
        ErrorCode::NucleusRestartFailure,
        "restart-panic marker present; the loader already fell back",
    )
    .with_type(ErrorType::NucleusError)
}
