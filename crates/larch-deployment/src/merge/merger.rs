//! The config merger: diff, safety gate, activation, convergence, rollback.

use crate::merge::activator::{ActivationOutcome, DefaultActivator};
use crate::merge::convergence::wait_for_convergence;
use crate::merge::diff::ServiceDiff;
use crate::merge::create_activator;
use larch_store::DeploymentDirectoryManager;
use larch_supervisor::{
    BootstrapManager, CancelToken, ServiceConfigMap, ServiceGraph, UpdateCoordinator,
    UpdateWindowRequest, WindowGrant,
};
use larch_types::{
    Deployment, DeploymentDocument, DeploymentError, DeploymentResult, DeploymentResultStatus,
    FailureHandlingPolicy, UpdatePolicyAction,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// What a merge produced.
#[derive(Debug)]
pub enum MergeOutcome {
    /// The merge ran to a classified result.
    Completed(DeploymentResult),

    /// The pending update action was discarded; no result is published.
    Cancelled,

    /// A host-agent restart was requested; the result is produced in the
    /// next process lifetime.
    RestartPending,
}

/// Merges a target service configuration into the running graph.
///
/// Exactly one activation is in flight at a time per device; the
/// orchestrator guarantees this by running one deployment task at a time.
pub struct ConfigMerger {
    graph: Arc<dyn ServiceGraph>,
    coordinator: Arc<dyn UpdateCoordinator>,
    bootstrap: Arc<dyn BootstrapManager>,
    workspace: Arc<DeploymentDirectoryManager>,
    poll_interval: Duration,
    restart_grace: Duration,
}

impl ConfigMerger {
    pub fn new(
        graph: Arc<dyn ServiceGraph>,
        coordinator: Arc<dyn UpdateCoordinator>,
        bootstrap: Arc<dyn BootstrapManager>,
        workspace: Arc<DeploymentDirectoryManager>,
        poll_interval: Duration,
        restart_grace: Duration,
    ) -> Self {
        Self {
            graph,
            coordinator,
            bootstrap,
            workspace,
            poll_interval,
            restart_grace,
        }
    }

    /// Merge `target` into the running graph.
    ///
    /// Errors returned here happened before any service mutation; failures
    /// after the swap are classified into the returned result.
    #[instrument(skip_all, fields(deployment_id = %deployment.id))]
    pub async fn merge(
        &self,
        deployment: &Deployment,
        document: &DeploymentDocument,
        target: &ServiceConfigMap,
        token: &CancelToken,
    ) -> Result<MergeOutcome, DeploymentError> {
        let current = self.graph.current_config().await?;
        let builtin = self.builtin_services().await?;
        let diff = ServiceDiff::between(&current, target, &builtin);
        let restart_required = self.bootstrap.restart_required(target).await?;

        // Safety-window gate. A zero timeout bypasses the notify path even
        // when the policy asks for notification.
        let policy = &document.component_update_policy;
        if policy.action == UpdatePolicyAction::NotifyComponents && policy.timeout_secs > 0 {
            let grant = self
                .coordinator
                .acquire_window(UpdateWindowRequest {
                    deployment_id: deployment.id.clone(),
                    timeout: Duration::from_secs(policy.timeout_secs),
                    host_agent_restart: restart_required,
                })
                .await?;
            if grant == WindowGrant::Discarded {
                info!("Pending update action discarded; merge cancelled");
                return Ok(MergeOutcome::Cancelled);
            }
        }
        if token.is_cancelled() {
            return Ok(MergeOutcome::Cancelled);
        }

        let activator = create_activator(
            restart_required,
            self.graph.clone(),
            self.bootstrap.clone(),
            self.workspace.clone(),
            self.restart_grace,
        );
        info!(activator = activator.name(), "Activating target configuration");

        match activator.activate(deployment, document, target, &diff).await? {
            ActivationOutcome::RestartPending => Ok(MergeOutcome::RestartPending),
            ActivationOutcome::Converging(watch) => {
                match wait_for_convergence(self.graph.as_ref(), &watch, self.poll_interval).await {
                    Ok(()) => Ok(MergeOutcome::Completed(DeploymentResult::successful())),
                    Err(error) => self.handle_failure(document, current, &diff, error).await,
                }
            }
        }
    }

    /// Classify a post-activation failure, rolling back when the policy
    /// asks for it.
    async fn handle_failure(
        &self,
        document: &DeploymentDocument,
        rollback_config: ServiceConfigMap,
        diff: &ServiceDiff,
        error: DeploymentError,
    ) -> Result<MergeOutcome, DeploymentError> {
        if document.failure_handling_policy == FailureHandlingPolicy::DoNothing {
            warn!(error = %error, "Deployment failed; rollback not requested");
            return Ok(MergeOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedRollbackNotRequested,
                error,
            )));
        }

        warn!(error = %error, "Deployment failed; rolling back");
        let inverse = diff.rollback();
        let activator = DefaultActivator::new(self.graph.clone(), self.workspace.clone());

        let watch = match activator.apply(&rollback_config, &inverse).await {
            Ok(watch) => watch,
            Err(rollback_error) => {
                return Ok(MergeOutcome::Completed(DeploymentResult::failed(
                    DeploymentResultStatus::FailedUnableToRollback,
                    rollback_error.caused_by(error),
                )));
            }
        };

        match wait_for_convergence(self.graph.as_ref(), &watch, self.poll_interval).await {
            Ok(()) => {
                info!("Rollback converged");
                Ok(MergeOutcome::Completed(DeploymentResult::failed(
                    DeploymentResultStatus::FailedRollbackComplete,
                    error,
                )))
            }
            Err(rollback_error) => Ok(MergeOutcome::Completed(DeploymentResult::failed(
                DeploymentResultStatus::FailedUnableToRollback,
                rollback_error.caused_by(error),
            ))),
        }
    }

    async fn builtin_services(&self) -> Result<BTreeSet<String>, DeploymentError> {
        let mut builtin = BTreeSet::new();
        for name in self.graph.service_names().await? {
            if let Ok(snapshot) = self.graph.status(&name).await {
                if snapshot.builtin {
                    builtin.insert(name);
                }
            }
        }
        Ok(builtin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_supervisor::{
        InMemoryBootstrapManager, InMemoryServiceGraph, InMemoryUpdateCoordinator, ServiceState,
    };
    use larch_types::{
        ComponentUpdatePolicy, DeploymentId, DeploymentIntent, DeploymentType,
        LocalOverrideRequest, RootComponent,
    };
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        graph: Arc<InMemoryServiceGraph>,
        coordinator: Arc<InMemoryUpdateCoordinator>,
        merger: Arc<ConfigMerger>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let workspace =
            Arc::new(DeploymentDirectoryManager::new(tmp.path().join("deployments")).unwrap());
        workspace
            .create_new_deployment_directory(&larch_types::ConfigurationArn::new("arn:gg:cfg:g:1"))
            .unwrap();

        let graph = Arc::new(InMemoryServiceGraph::new());
        let coordinator = Arc::new(InMemoryUpdateCoordinator::new());
        let bootstrap = Arc::new(InMemoryBootstrapManager::new());
        let merger = Arc::new(ConfigMerger::new(
            graph.clone(),
            coordinator.clone(),
            bootstrap,
            workspace,
            Duration::from_millis(10),
            Duration::from_secs(2),
        ));
        Fixture {
            _tmp: tmp,
            graph,
            coordinator,
            merger,
        }
    }

    fn deployment(id: &str) -> Deployment {
        Deployment::new(
            DeploymentId::new(id),
            DeploymentType::CloudJob,
            DeploymentIntent::LocalOverride(LocalOverrideRequest::default()),
        )
    }

    fn document(policy: ComponentUpdatePolicy, failure: FailureHandlingPolicy) -> DeploymentDocument {
        DeploymentDocument {
            group_name: "thinggroup/group1".into(),
            configuration_arn: None,
            timestamp: chrono::Utc::now(),
            root_components: vec![RootComponent::new("component1", semver::Version::new(1, 0, 0))],
            configuration_updates: BTreeMap::new(),
            runtime_overrides: BTreeMap::new(),
            component_update_policy: policy,
            failure_handling_policy: failure,
            required_capabilities: BTreeSet::new(),
        }
    }

    fn target(names: &[&str]) -> ServiceConfigMap {
        names
            .iter()
            .map(|n| (n.to_string(), serde_json::json!({"version": "1.0.0"})))
            .collect()
    }

    #[tokio::test]
    async fn merge_adds_services_and_succeeds() {
        let fixture = fixture();
        fixture.graph.install("old", serde_json::json!({}));

        let outcome = fixture
            .merger
            .merge(
                &deployment("D1"),
                &document(ComponentUpdatePolicy::default(), FailureHandlingPolicy::Rollback),
                &target(&["component1"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        match outcome {
            MergeOutcome::Completed(result) => {
                assert_eq!(result.status, DeploymentResultStatus::Successful)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Obsolete service was closed and removed.
        assert_eq!(fixture.graph.closed_services(), vec!["old".to_string()]);
        let names = fixture.graph.service_names().await.unwrap();
        assert!(!names.contains(&"old".to_string()));
    }

    #[tokio::test]
    async fn zero_timeout_bypasses_notify_path() {
        let fixture = fixture();
        fixture.coordinator.hold();

        let policy = ComponentUpdatePolicy {
            action: UpdatePolicyAction::NotifyComponents,
            timeout_secs: 0,
        };
        let outcome = fixture
            .merger
            .merge(
                &deployment("D1"),
                &document(policy, FailureHandlingPolicy::Rollback),
                &target(&["component1"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, MergeOutcome::Completed(_)));
        assert!(fixture.coordinator.last_request().is_none());
    }

    #[tokio::test]
    async fn discarded_window_cancels_the_merge() {
        let fixture = fixture();
        fixture.coordinator.hold();
        let merger = fixture.merger.clone();

        let handle = tokio::spawn(async move {
            merger
                .merge(
                    &deployment("X"),
                    &document(ComponentUpdatePolicy::default(), FailureHandlingPolicy::Rollback),
                    &target(&["component1"]),
                    &CancelToken::new(),
                )
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(fixture
            .coordinator
            .discard_pending(&DeploymentId::new("X"))
            .await
            .unwrap());

        assert!(matches!(handle.await.unwrap(), MergeOutcome::Cancelled));
        // Nothing was activated.
        assert!(fixture.graph.service_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_without_rollback_reports_not_requested() {
        let fixture = fixture();
        fixture.graph.set_auto_converge(false);
        let merger = fixture.merger.clone();
        let graph = fixture.graph.clone();

        let handle = tokio::spawn(async move {
            merger
                .merge(
                    &deployment("D1"),
                    &document(ComponentUpdatePolicy::default(), FailureHandlingPolicy::DoNothing),
                    &target(&["component1"]),
                    &CancelToken::new(),
                )
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        graph.set_state("component1", ServiceState::Broken, false);

        match handle.await.unwrap() {
            MergeOutcome::Completed(result) => {
                assert_eq!(
                    result.status,
                    DeploymentResultStatus::FailedRollbackNotRequested
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_with_rollback_restores_previous_graph() {
        let fixture = fixture();
        fixture.graph.install("keeper", serde_json::json!({"version": "0.9.0"}));
        fixture.graph.set_auto_converge(false);
        let merger = fixture.merger.clone();
        let graph = fixture.graph.clone();

        let handle = tokio::spawn(async move {
            merger
                .merge(
                    &deployment("D1"),
                    &document(ComponentUpdatePolicy::default(), FailureHandlingPolicy::Rollback),
                    &target(&["keeper", "component1"]),
                    &CancelToken::new(),
                )
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        graph.set_state("component1", ServiceState::Broken, false);

        match handle.await.unwrap() {
            MergeOutcome::Completed(result) => {
                assert_eq!(result.status, DeploymentResultStatus::FailedRollbackComplete);
                let details = result.error.unwrap().status_details();
                assert_eq!(
                    details.error_stack[0],
                    larch_types::ErrorCode::DeploymentFailure
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        // The added service is gone again; the keeper survived.
        let names = fixture.graph.service_names().await.unwrap();
        assert!(!names.contains(&"component1".to_string()));
        assert!(names.contains(&"keeper".to_string()));
    }
}
