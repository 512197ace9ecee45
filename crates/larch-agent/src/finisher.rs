//! End-of-deployment bookkeeping.
//!
//! Turns a pipeline result into a terminal status record, updates the
//! membership tables, transitions the workspace, and publishes the record.
//! Membership is always written before the terminal status goes out, so
//! the next deployment reads a committed view.

use chrono::Utc;
use larch_store::{DeploymentDirectoryManager, MembershipStore, StatusKeeper};
use larch_supervisor::ServiceGraph;
use larch_types::{
    Deployment, DeploymentResult, DeploymentResultStatus, DeploymentSummary, DeploymentType,
    JobStatus, StatusDetails, StatusRecord,
};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Commits the outcome of a deployment.
pub struct Finisher {
    status: Arc<StatusKeeper>,
    membership: Arc<MembershipStore>,
    workspace: Arc<DeploymentDirectoryManager>,
    graph: Arc<dyn ServiceGraph>,
}

impl Finisher {
    pub fn new(
        status: Arc<StatusKeeper>,
        membership: Arc<MembershipStore>,
        workspace: Arc<DeploymentDirectoryManager>,
        graph: Arc<dyn ServiceGraph>,
    ) -> Self {
        Self {
            status,
            membership,
            workspace,
            graph,
        }
    }

    /// Commit `result` for `deployment`.
    ///
    /// Best-effort: a failing bookkeeping step is logged and the remaining
    /// steps still run, so a membership hiccup cannot swallow the terminal
    /// status.
    #[instrument(skip_all, fields(deployment_id = %deployment.id, status = ?result.status))]
    pub async fn finish(&self, deployment: &Deployment, result: DeploymentResult) -> StatusRecord {
        let job_status = result.job_status();
        let status_details = result
            .error
            .as_ref()
            .map(|e| e.status_details())
            .unwrap_or_else(StatusDetails::default);

        self.update_membership(deployment, &result, job_status).await;
        self.transition_workspace(job_status);

        let record = StatusRecord {
            deployment_id: deployment.id.clone(),
            configuration_arn: deployment.configuration_arn.clone(),
            deployment_type: deployment.deployment_type,
            status: job_status,
            status_details,
            root_packages: deployment
                .document
                .as_ref()
                .map(|d| d.root_names())
                .unwrap_or_default(),
        };
        if let Err(err) = self.status.persist_and_publish(record.clone()) {
            error!(error = %err, "Failed to publish terminal status");
        }

        info!(status = %job_status, "Deployment finished");
        record
    }

    /// Group membership reflects the committed graph: the target roots on
    /// success, the restored view after a completed rollback.
    async fn update_membership(
        &self,
        deployment: &Deployment,
        result: &DeploymentResult,
        job_status: JobStatus,
    ) {
        let document = match &deployment.document {
            Some(document) => document,
            None => return,
        };

        match result.status {
            DeploymentResultStatus::Successful => {
                if let Err(err) = self.membership.update_group_roots(
                    &document.group_name,
                    document.configuration_arn.as_ref(),
                    &document.root_components,
                ) {
                    error!(error = %err, "Failed to update group roots");
                }
                if let Err(err) = self.membership.recompute_component_groups(self.graph.as_ref()).await
                {
                    error!(error = %err, "Failed to recompute component groups");
                }
                if deployment.deployment_type == DeploymentType::Shadow {
                    if let Err(err) =
                        self.membership.set_last_shadow_deployment(deployment.id.clone())
                    {
                        error!(error = %err, "Failed to record shadow high-water mark");
                    }
                }
            }
            DeploymentResultStatus::FailedRollbackComplete => {
                if let Err(err) = self.membership.recompute_component_groups(self.graph.as_ref()).await
                {
                    error!(error = %err, "Failed to recompute component groups");
                }
            }
            _ => {}
        }

        let summary = DeploymentSummary {
            deployment_id: deployment.id.clone(),
            deployment_type: deployment.deployment_type,
            configuration_arn: deployment.configuration_arn.clone(),
            status: job_status,
            finished_at: Utc::now(),
        };
        if let Err(err) = self.membership.record_last_deployment(&document.group_name, summary) {
            error!(error = %err, "Failed to record last deployment");
        }
    }

    fn transition_workspace(&self, job_status: JobStatus) {
        let transition = match job_status {
            JobStatus::Succeeded => self.workspace.persist_last_successful_deployment(),
            _ => self.workspace.persist_last_failed_deployment(),
        };
        if let Err(err) = transition {
            error!(error = %err, "Failed to transition deployment workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_supervisor::InMemoryServiceGraph;
    use larch_types::{
        ComponentUpdatePolicy, ConfigurationArn, DeploymentDocument, DeploymentError,
        DeploymentId, DeploymentIntent, ErrorCode, FailureHandlingPolicy, LocalOverrideRequest,
        RootComponent,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        graph: Arc<InMemoryServiceGraph>,
        membership: Arc<MembershipStore>,
        workspace: Arc<DeploymentDirectoryManager>,
        finisher: Finisher,
        published: Arc<Mutex<Vec<StatusRecord>>>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let workspace =
            Arc::new(DeploymentDirectoryManager::new(tmp.path().join("deployments")).unwrap());
        let membership = Arc::new(MembershipStore::new(tmp.path().join("runtime")).unwrap());
        let status = Arc::new(StatusKeeper::new(tmp.path().join("processed")).unwrap());
        let graph = Arc::new(InMemoryServiceGraph::new());

        let published: Arc<Mutex<Vec<StatusRecord>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let published = published.clone();
            status.register_consumer(
                larch_types::DeploymentType::CloudJob,
                "capture",
                Box::new(move |record| {
                    published.lock().unwrap().push(record.clone());
                    true
                }),
            );
        }

        let finisher = Finisher::new(status, membership.clone(), workspace.clone(), graph.clone());
        Fixture {
            _tmp: tmp,
            graph,
            membership,
            workspace,
            finisher,
            published,
        }
    }

    fn deployment_with_document() -> Deployment {
        let mut deployment = Deployment::new(
            DeploymentId::new("D1"),
            larch_types::DeploymentType::CloudJob,
            DeploymentIntent::LocalOverride(LocalOverrideRequest::default()),
        )
        .with_configuration_arn(ConfigurationArn::new("arn:gg:cfg:group1:1"));
        deployment.document = Some(DeploymentDocument {
            group_name: "thinggroup/group1".into(),
            configuration_arn: Some(ConfigurationArn::new("arn:gg:cfg:group1:1")),
            timestamp: Utc::now(),
            root_components: vec![RootComponent::new("component1", semver::Version::new(1, 0, 0))],
            configuration_updates: BTreeMap::new(),
            runtime_overrides: BTreeMap::new(),
            component_update_policy: ComponentUpdatePolicy::default(),
            failure_handling_policy: FailureHandlingPolicy::Rollback,
            required_capabilities: Default::default(),
        });
        deployment
    }

    #[tokio::test]
    async fn success_updates_membership_and_commits_workspace() {
        let fixture = fixture();
        fixture.graph.install("component1", serde_json::json!({}));
        let deployment = deployment_with_document();
        fixture
            .workspace
            .create_new_deployment_directory(deployment.configuration_arn.as_ref().unwrap())
            .unwrap();

        let record = fixture
            .finisher
            .finish(&deployment, DeploymentResult::successful())
            .await;

        assert_eq!(record.status, JobStatus::Succeeded);
        assert_eq!(record.root_packages, vec!["component1"]);

        let roots = fixture.membership.group_to_roots();
        let group = roots.get("thinggroup/group1").unwrap();
        let entry = group.get("component1").unwrap();
        assert_eq!(entry.version, semver::Version::new(1, 0, 0));
        assert_eq!(entry.group_config_arn, "arn:gg:cfg:group1:1");
        assert_eq!(entry.group_config_name, "thinggroup/group1");

        assert!(fixture.workspace.last_successful_deployment().is_some());
        assert!(!fixture.workspace.has_ongoing_deployment());
        assert_eq!(fixture.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejection_commits_to_previous_failure_without_membership() {
        let fixture = fixture();
        let deployment = deployment_with_document();
        let dir = fixture
            .workspace
            .create_new_deployment_directory(deployment.configuration_arn.as_ref().unwrap())
            .unwrap();

        let record = fixture
            .finisher
            .finish(
                &deployment,
                DeploymentResult::rejected(DeploymentError::invalid_request("bad document")),
            )
            .await;

        assert_eq!(record.status, JobStatus::Rejected);
        assert!(record
            .status_details
            .error_stack
            .contains(&ErrorCode::InvalidRequest));
        assert!(fixture.membership.group_to_roots().is_empty());
        assert_eq!(fixture.workspace.last_failed_deployment(), Some(dir));
    }

    #[tokio::test]
    async fn failure_details_lead_with_deployment_failure() {
        let fixture = fixture();
        let deployment = deployment_with_document();

        let record = fixture
            .finisher
            .finish(
                &deployment,
                DeploymentResult::failed(
                    DeploymentResultStatus::FailedRollbackNotRequested,
                    DeploymentError::new(ErrorCode::ComponentBroken, "service broke")
                        .with_type(larch_types::ErrorType::ComponentError),
                ),
            )
            .await;

        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(
            record.status_details.error_stack,
            vec![ErrorCode::DeploymentFailure, ErrorCode::ComponentBroken]
        );
        assert_eq!(record.status_details.failure_cause, "service broke");
    }
}
