//! The deployment orchestrator loop.
//!
//! Polls the queue, allocates a workspace, normalizes the intent, drives
//! exactly one task at a time, watches the queue for cancellations of the
//! active deployment, retries retryable failures, and hands results to the
//! finisher.

use crate::config::AgentConfig;
use crate::events::{DeploymentEvent, DeploymentEventEnvelope};
use crate::finisher::Finisher;
use larch_deployment::{convert, ConfigMerger, DeploymentQueue, DeploymentTask, NucleusUpdateTask, TaskOutcome};
use larch_store::{DeploymentDirectoryManager, MembershipStore, StatusKeeper};
use larch_supervisor::{
    BootstrapManager, CancelToken, ComponentManager, FleetInventory, ServiceGraph,
    UpdateCoordinator,
};
use larch_types::{
    ConfigurationArn, Deployment, DeploymentDocument, DeploymentError, DeploymentResult,
    DeploymentResultStatus, ErrorCode, ErrorType, JobStatus, StatusDetails, StatusRecord,
    LOCAL_DEPLOYMENT_GROUP,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum TaskRunner {
    Pipeline(Arc<DeploymentTask>),
    Nucleus(Arc<NucleusUpdateTask>),
}

impl TaskRunner {
    fn spawn(&self) -> JoinHandle<TaskOutcome> {
        match self {
            TaskRunner::Pipeline(task) => {
                let task = task.clone();
                tokio::spawn(async move { task.run().await })
            }
            TaskRunner::Nucleus(task) => {
                let task = task.clone();
                tokio::spawn(async move { task.run().await })
            }
        }
    }
}

struct ActiveDeployment {
    deployment: Deployment,
    runner: TaskRunner,
    token: CancelToken,
    handle: JoinHandle<TaskOutcome>,
    attempt: u32,
}

/// Long-running loop that reconciles queued intents one at a time.
pub struct DeploymentOrchestrator {
    config: AgentConfig,
    queue: Arc<DeploymentQueue>,
    workspace: Arc<DeploymentDirectoryManager>,
    membership: Arc<MembershipStore>,
    graph: Arc<dyn ServiceGraph>,
    components: Arc<dyn ComponentManager>,
    coordinator: Arc<dyn UpdateCoordinator>,
    bootstrap: Arc<dyn BootstrapManager>,
    fleet: Arc<dyn FleetInventory>,
    status: Arc<StatusKeeper>,
    merger: Arc<ConfigMerger>,
    finisher: Finisher,
    event_tx: broadcast::Sender<DeploymentEventEnvelope>,
    running: AtomicBool,
}

impl DeploymentOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        queue: Arc<DeploymentQueue>,
        workspace: Arc<DeploymentDirectoryManager>,
        membership: Arc<MembershipStore>,
        status: Arc<StatusKeeper>,
        graph: Arc<dyn ServiceGraph>,
        components: Arc<dyn ComponentManager>,
        coordinator: Arc<dyn UpdateCoordinator>,
        bootstrap: Arc<dyn BootstrapManager>,
        fleet: Arc<dyn FleetInventory>,
    ) -> Arc<Self> {
        let merger = Arc::new(ConfigMerger::new(
            graph.clone(),
            coordinator.clone(),
            bootstrap.clone(),
            workspace.clone(),
            config.merge.convergence_poll_interval(),
            config.merge.restart_grace(),
        ));
        let finisher = Finisher::new(
            status.clone(),
            membership.clone(),
            workspace.clone(),
            graph.clone(),
        );
        let (event_tx, _) = broadcast::channel(256);

        Arc::new(Self {
            config,
            queue,
            workspace,
            membership,
            graph,
            components,
            coordinator,
            bootstrap,
            fleet,
            status,
            merger,
            finisher,
            event_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Ask the loop to exit after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the orchestrator loop until stopped.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!("Deployment orchestrator started");
        self.resume_ongoing();

        let mut active: Option<ActiveDeployment> = None;
        while self.running.load(Ordering::SeqCst) {
            match active.take() {
                None => match self.queue.poll() {
                    None => {
                        tokio::time::sleep(self.config.orchestrator.poll_interval()).await;
                    }
                    Some(deployment) if deployment.cancelled => {
                        debug!(
                            id = %deployment.id,
                            "Cancellation without a matching deployment; dropped"
                        );
                    }
                    Some(deployment) => {
                        active = self.start_deployment(deployment).await;
                    }
                },
                Some(current) => {
                    if self.check_cancellation(&current).await {
                        self.emit(DeploymentEvent::Cancelled {
                            deployment_id: current.deployment.id.clone(),
                        });
                        continue;
                    }
                    if current.handle.is_finished() {
                        active = self.handle_completed(current).await;
                    } else {
                        active = Some(current);
                        tokio::time::sleep(self.config.orchestrator.poll_interval()).await;
                    }
                }
            }
        }
        info!("Deployment orchestrator stopped");
    }

    /// Re-queue a deployment whose workspace carries a post-restart stage.
    fn resume_ongoing(&self) {
        if !self.workspace.has_ongoing_deployment() {
            return;
        }
        match self.workspace.read_deployment_metadata() {
            Ok(deployment) if deployment.stage.post_restart() => {
                info!(
                    id = %deployment.id,
                    stage = %deployment.stage,
                    "Resuming deployment after restart"
                );
                self.queue.offer(deployment);
            }
            Ok(deployment) => {
                debug!(
                    id = %deployment.id,
                    "Interrupted workspace left for cleanup on next allocation"
                );
            }
            Err(err) => {
                warn!(error = %err, "Could not read ongoing deployment metadata");
            }
        }
    }

    async fn start_deployment(&self, mut deployment: Deployment) -> Option<ActiveDeployment> {
        let token = CancelToken::new();

        // Post-restart stages re-enter the nucleus update state machine;
        // their workspace (and IN_PROGRESS status) survived the restart.
        if deployment.stage.post_restart() {
            let runner = TaskRunner::Nucleus(Arc::new(NucleusUpdateTask::new(
                deployment.clone(),
                self.graph.clone(),
                self.bootstrap.clone(),
                self.workspace.clone(),
                self.config.merge.convergence_poll_interval(),
                self.config.merge.restart_grace(),
            )));
            let handle = runner.spawn();
            self.emit(DeploymentEvent::Started {
                deployment_id: deployment.id.clone(),
                deployment_type: deployment.deployment_type,
            });
            return Some(ActiveDeployment {
                deployment,
                runner,
                token,
                handle,
                attempt: 1,
            });
        }

        let arn = deployment
            .configuration_arn
            .clone()
            .unwrap_or_else(|| ConfigurationArn::new(deployment.id.as_str()));
        if let Err(err) = self.workspace.create_new_deployment_directory(&arn) {
            error!(error = %err, "Could not allocate deployment workspace");
            return self.finish_now(deployment, failed_no_state_change(err.into())).await;
        }

        let local_roots = self.membership.roots_for_group(LOCAL_DEPLOYMENT_GROUP);
        let known: BTreeSet<String> = self
            .graph
            .service_names()
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();
        let document = match convert(&deployment, &local_roots, &known) {
            Ok(document) => document,
            Err(err) => {
                warn!(id = %deployment.id, error = %err, "Deployment rejected");
                let _ = self.workspace.write_deployment_metadata(&deployment);
                return self
                    .finish_now(deployment, DeploymentResult::rejected(err))
                    .await;
            }
        };
        deployment.document = Some(document.clone());
        if let Err(err) = self.workspace.write_deployment_metadata(&deployment) {
            error!(error = %err, "Could not persist deployment metadata");
            return self.finish_now(deployment, failed_no_state_change(err.into())).await;
        }

        // IN_PROGRESS goes out exactly once, not once per attempt.
        self.publish_in_progress(&deployment, &document);
        self.emit(DeploymentEvent::Started {
            deployment_id: deployment.id.clone(),
            deployment_type: deployment.deployment_type,
        });

        let group_to_roots = self.membership.group_to_roots();
        let current_roots: Vec<String> = group_to_roots
            .values()
            .flat_map(|group| group.keys().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();
        let runner = TaskRunner::Pipeline(Arc::new(DeploymentTask::new(
            deployment.clone(),
            document,
            self.components.clone(),
            self.fleet.clone(),
            self.merger.clone(),
            group_to_roots,
            current_roots,
            token.clone(),
        )));
        let handle = runner.spawn();
        Some(ActiveDeployment {
            deployment,
            runner,
            token,
            handle,
            attempt: 1,
        })
    }

    /// Watch the queue for a cancellation of the active deployment. If the
    /// update action is still pending it is discarded and the task
    /// cancelled; past the point of no return the cancellation is ignored.
    async fn check_cancellation(&self, active: &ActiveDeployment) -> bool {
        if self
            .queue
            .take_cancellation(active.deployment.deployment_type, &active.deployment.id)
            .is_none()
        {
            return false;
        }

        match self.coordinator.discard_pending(&active.deployment.id).await {
            Ok(true) => {
                info!(id = %active.deployment.id, "Pending update discarded; cancelling deployment");
                active.token.cancel();
                active.handle.abort();
                true
            }
            Ok(false) => {
                info!(
                    id = %active.deployment.id,
                    "Update past the point of no return; cancellation ignored"
                );
                false
            }
            Err(err) => {
                warn!(error = %err, "Discard request failed; cancellation ignored");
                false
            }
        }
    }

    async fn handle_completed(&self, active: ActiveDeployment) -> Option<ActiveDeployment> {
        let ActiveDeployment {
            deployment,
            runner,
            token,
            handle,
            attempt,
        } = active;

        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => {
                debug!(id = %deployment.id, "Cancelled task reaped");
                return None;
            }
            Err(err) => {
                error!(id = %deployment.id, error = %err, "Deployment task aborted abnormally");
                let result = failed_no_state_change(
                    DeploymentError::new(
                        ErrorCode::NucleusError,
                        format!("deployment task aborted: {err}"),
                    )
                    .with_type(ErrorType::NucleusError),
                );
                return self.finish_now(deployment, result).await;
            }
        };

        match outcome {
            TaskOutcome::Cancelled => {
                // Cancellation is silent: no terminal status, no commit.
                info!(id = %deployment.id, "Deployment cancelled cleanly");
                self.emit(DeploymentEvent::Cancelled {
                    deployment_id: deployment.id.clone(),
                });
                None
            }
            TaskOutcome::RestartPending => {
                info!(id = %deployment.id, "Host-agent restart pending; result follows next lifetime");
                self.emit(DeploymentEvent::RestartPending {
                    deployment_id: deployment.id.clone(),
                });
                None
            }
            TaskOutcome::Completed(result) => {
                if result.is_retryable() && attempt < self.config.orchestrator.max_task_attempts {
                    warn!(
                        id = %deployment.id,
                        attempt,
                        "Retryable failure; re-running deployment task"
                    );
                    self.emit(DeploymentEvent::AttemptFailed {
                        deployment_id: deployment.id.clone(),
                        attempt,
                    });
                    let handle = runner.spawn();
                    return Some(ActiveDeployment {
                        deployment,
                        runner,
                        token,
                        handle,
                        attempt: attempt + 1,
                    });
                }
                self.finish_now(deployment, result).await
            }
        }
    }

    async fn finish_now(
        &self,
        deployment: Deployment,
        result: DeploymentResult,
    ) -> Option<ActiveDeployment> {
        let record = self.finisher.finish(&deployment, result).await;
        self.emit(DeploymentEvent::Finished {
            deployment_id: deployment.id,
            status: record.status,
        });
        None
    }

    fn publish_in_progress(&self, deployment: &Deployment, document: &DeploymentDocument) {
        let record = StatusRecord {
            deployment_id: deployment.id.clone(),
            configuration_arn: deployment.configuration_arn.clone(),
            deployment_type: deployment.deployment_type,
            status: JobStatus::InProgress,
            status_details: StatusDetails::default(),
            root_packages: document.root_names(),
        };
        if let Err(err) = self.status.persist_and_publish(record) {
            error!(error = %err, "Failed to publish IN_PROGRESS status");
        }
    }

    fn emit(&self, event: DeploymentEvent) {
        let _ = self.event_tx.send(DeploymentEventEnvelope::new(event));
    }
}

fn failed_no_state_change(err: DeploymentError) -> DeploymentResult {
    DeploymentResult::failed(DeploymentResultStatus::FailedNoStateChange, err)
}
