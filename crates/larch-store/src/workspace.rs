//! Per-deployment on-disk workspaces.
//!
//! Each deployment gets a directory named after its sanitized configuration
//! ARN. Three sibling symlinks record the crash-safe state of the pipeline:
//! `ongoing` points at the active workspace, `previous-success` and
//! `previous-failure` at the last committed outcomes. Opening a new ongoing
//! workspace deletes the prior one's tree; committing moves the ongoing
//! link to the matching previous-* link and deletes the link it replaces.

use crate::error::{Result, StoreError};
use crate::fs_util::{atomic_write_json, read_json_opt};
use larch_supervisor::ServiceGraph;
use larch_types::{ConfigurationArn, Deployment, DeploymentStage};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ONGOING_LINK: &str = "ongoing";
const PREVIOUS_SUCCESS_LINK: &str = "previous-success";
const PREVIOUS_FAILURE_LINK: &str = "previous-failure";

const METADATA_FILE: &str = "deployment_metadata.json";
const SNAPSHOT_FILE: &str = "rollback_snapshot.tlog";
const TARGET_CONFIG_FILE: &str = "target_config.tlog";
const BOOTSTRAP_TASK_FILE: &str = "bootstrap_tasks.json";

/// Manages per-deployment workspaces under one root directory.
pub struct DeploymentDirectoryManager {
    root: PathBuf,
}

impl DeploymentDirectoryManager {
    /// Open (creating if needed) the workspace root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Create a fresh workspace for `arn` and point `ongoing` at it.
    ///
    /// Any prior ongoing workspace tree is deleted first, not merely its
    /// symlink.
    pub fn create_new_deployment_directory(&self, arn: &ConfigurationArn) -> Result<PathBuf> {
        if let Some(prior) = self.link_target(ONGOING_LINK)? {
            debug!(path = %prior.display(), "Removing prior ongoing workspace");
            remove_tree(&prior)?;
            self.remove_link(ONGOING_LINK)?;
        }

        let dir = self.root.join(arn.directory_name());
        // A stale tree with the same name is from an interrupted run.
        remove_tree(&dir)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        self.point_link(ONGOING_LINK, &dir)?;

        info!(path = %dir.display(), "Opened deployment workspace");
        Ok(dir)
    }

    /// Commit the ongoing workspace as the last successful deployment.
    pub fn persist_last_successful_deployment(&self) -> Result<()> {
        self.commit_ongoing(PREVIOUS_SUCCESS_LINK)
    }

    /// Commit the ongoing workspace as the last failed deployment.
    pub fn persist_last_failed_deployment(&self) -> Result<()> {
        self.commit_ongoing(PREVIOUS_FAILURE_LINK)
    }

    /// Serialize the deployment into the ongoing workspace.
    pub fn write_deployment_metadata(&self, deployment: &Deployment) -> Result<()> {
        let path = self.require_ongoing()?.join(METADATA_FILE);
        atomic_write_json(&path, deployment)
    }

    /// Read the deployment back from the ongoing workspace.
    pub fn read_deployment_metadata(&self) -> Result<Deployment> {
        let path = self.require_ongoing()?.join(METADATA_FILE);
        read_json_opt(&path)?.ok_or(StoreError::NoOngoingDeployment)
    }

    /// Rewrite the persisted stage (and stage details) of the ongoing
    /// deployment; used between host-agent update stages.
    pub fn update_stage(
        &self,
        stage: DeploymentStage,
        stage_details: Option<String>,
    ) -> Result<Deployment> {
        let mut deployment = self.read_deployment_metadata()?;
        deployment.stage = stage;
        deployment.stage_details = stage_details;
        self.write_deployment_metadata(&deployment)?;
        Ok(deployment)
    }

    /// Write the supervisor's current effective config to the rollback
    /// snapshot in the ongoing workspace.
    pub async fn take_config_snapshot(&self, graph: &dyn ServiceGraph) -> Result<()> {
        graph
            .write_effective_config(&self.snapshot_file_path())
            .await
            .map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    /// Whether an ongoing workspace exists.
    pub fn has_ongoing_deployment(&self) -> bool {
        matches!(self.link_target(ONGOING_LINK), Ok(Some(_)))
    }

    /// Path of the deployment metadata in the ongoing workspace.
    pub fn deployment_metadata_file_path(&self) -> PathBuf {
        self.root.join(ONGOING_LINK).join(METADATA_FILE)
    }

    /// Path of the rollback snapshot in the ongoing workspace.
    pub fn snapshot_file_path(&self) -> PathBuf {
        self.root.join(ONGOING_LINK).join(SNAPSHOT_FILE)
    }

    /// Path of the target-config transaction log in the ongoing workspace.
    pub fn target_config_file_path(&self) -> PathBuf {
        self.root.join(ONGOING_LINK).join(TARGET_CONFIG_FILE)
    }

    /// Path of the bootstrap task list in the ongoing workspace.
    pub fn bootstrap_task_file_path(&self) -> PathBuf {
        self.root.join(ONGOING_LINK).join(BOOTSTRAP_TASK_FILE)
    }

    /// Resolved target of the `previous-success` symlink, if any.
    pub fn last_successful_deployment(&self) -> Option<PathBuf> {
        self.link_target(PREVIOUS_SUCCESS_LINK).ok().flatten()
    }

    /// Resolved target of the `previous-failure` symlink, if any.
    pub fn last_failed_deployment(&self) -> Option<PathBuf> {
        self.link_target(PREVIOUS_FAILURE_LINK).ok().flatten()
    }

    // --- Internal helpers ---

    fn commit_ongoing(&self, to_link: &str) -> Result<()> {
        let Some(target) = self.link_target(ONGOING_LINK)? else {
            // Idempotent: nothing ongoing, nothing to commit.
            return Ok(());
        };

        if let Some(old) = self.link_target(to_link)? {
            if old != target {
                remove_tree(&old)?;
            }
            self.remove_link(to_link)?;
        }
        self.point_link(to_link, &target)?;
        self.remove_link(ONGOING_LINK)?;

        info!(link = to_link, path = %target.display(), "Committed deployment workspace");
        Ok(())
    }

    fn link_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn link_target(&self, name: &str) -> Result<Option<PathBuf>> {
        let link = self.link_path(name);
        match fs::read_link(&link) {
            Ok(target) => Ok(Some(target)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&link, e)),
        }
    }

    fn point_link(&self, name: &str, target: &Path) -> Result<()> {
        let link = self.link_path(name);
        symlink_dir(target, &link).map_err(|e| StoreError::io(&link, e))
    }

    fn remove_link(&self, name: &str) -> Result<()> {
        let link = self.link_path(name);
        match fs::remove_file(&link) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&link, e)),
        }
    }

    fn require_ongoing(&self) -> Result<PathBuf> {
        self.link_target(ONGOING_LINK)?
            .ok_or(StoreError::NoOngoingDeployment)
    }
}

#[cfg(unix)]
use std::os::unix::fs::symlink as symlink_dir;
#[cfg(windows)]
use std::os::windows::fs::symlink_dir;

fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_types::{DeploymentId, DeploymentIntent, DeploymentType, LocalOverrideRequest};
    use tempfile::TempDir;

    fn arn(s: &str) -> ConfigurationArn {
        ConfigurationArn::new(s)
    }

    fn manager() -> (TempDir, DeploymentDirectoryManager) {
        let tmp = TempDir::new().unwrap();
        let manager = DeploymentDirectoryManager::new(tmp.path().join("deployments")).unwrap();
        (tmp, manager)
    }

    #[test]
    fn create_repoints_ongoing_and_cleans_prior() {
        let (_tmp, manager) = manager();

        let first = manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/one:1"))
            .unwrap();
        std::fs::write(first.join("stale.txt"), "x").unwrap();

        let second = manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/two:1"))
            .unwrap();

        assert!(!first.exists(), "prior ongoing tree must be deleted");
        assert!(second.exists());
        assert!(manager.has_ongoing_deployment());
    }

    #[test]
    fn successful_commit_moves_ongoing_to_previous_success() {
        let (_tmp, manager) = manager();
        let dir = manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/one:1"))
            .unwrap();

        manager.persist_last_successful_deployment().unwrap();

        assert_eq!(manager.last_successful_deployment(), Some(dir));
        assert!(!manager.has_ongoing_deployment());
        // Idempotent second call.
        manager.persist_last_successful_deployment().unwrap();
    }

    #[test]
    fn failed_commit_replaces_prior_failure() {
        let (_tmp, manager) = manager();

        let first = manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/one:1"))
            .unwrap();
        manager.persist_last_failed_deployment().unwrap();

        let second = manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/two:1"))
            .unwrap();
        manager.persist_last_failed_deployment().unwrap();

        assert!(!first.exists(), "prior previous-failure tree must be deleted");
        assert_eq!(manager.last_failed_deployment(), Some(second));
    }

    #[test]
    fn metadata_round_trips() {
        let (_tmp, manager) = manager();
        manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/one:1"))
            .unwrap();

        let deployment = Deployment::new(
            DeploymentId::new("D1"),
            DeploymentType::CloudJob,
            DeploymentIntent::LocalOverride(LocalOverrideRequest::default()),
        )
        .with_configuration_arn(arn("arn:gg:cfg:group/one:1"));

        manager.write_deployment_metadata(&deployment).unwrap();
        assert!(manager.deployment_metadata_file_path().exists());
        let read_back = manager.read_deployment_metadata().unwrap();

        assert_eq!(read_back.id, deployment.id);
        assert_eq!(read_back.deployment_type, deployment.deployment_type);
        assert_eq!(read_back.stage, deployment.stage);
        assert_eq!(read_back.configuration_arn, deployment.configuration_arn);
    }

    #[test]
    fn update_stage_persists_details() {
        let (_tmp, manager) = manager();
        manager
            .create_new_deployment_directory(&arn("arn:gg:cfg:group/one:1"))
            .unwrap();
        let deployment = Deployment::new(
            DeploymentId::new("D1"),
            DeploymentType::CloudJob,
            DeploymentIntent::LocalOverride(LocalOverrideRequest::default()),
        );
        manager.write_deployment_metadata(&deployment).unwrap();

        manager
            .update_stage(
                DeploymentStage::HostAgentRollback,
                Some("activation failed".into()),
            )
            .unwrap();

        let read_back = manager.read_deployment_metadata().unwrap();
        assert_eq!(read_back.stage, DeploymentStage::HostAgentRollback);
        assert_eq!(read_back.stage_details.as_deref(), Some("activation failed"));
    }
}
