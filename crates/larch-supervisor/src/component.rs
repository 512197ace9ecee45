//! Package-manager interface.

use crate::cancel::CancelToken;
use crate::service::ServiceConfigMap;
use async_trait::async_trait;
use larch_types::{DeploymentDocument, DeploymentError, ErrorCode, ErrorType, GroupToRoots};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resolved component at an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentIdentifier {
    /// Component name.
    pub name: String,

    /// Resolved version.
    pub version: semver::Version,
}

impl ComponentIdentifier {
    pub fn new(name: impl Into<String>, version: semver::Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for ComponentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Package-manager failures.
#[derive(Debug, Clone, Error)]
pub enum ComponentManagerError {
    /// No version satisfies the requested constraints. Non-retryable.
    #[error("no available version for {component}: {reason}")]
    NoAvailableVersion { component: String, reason: String },

    /// Transient package-store failure. Retryable.
    #[error("packaging failure: {0}")]
    Packaging(String),

    /// Recipe or artifact could not be loaded. Retryable.
    #[error("package loading failure: {0}")]
    PackageLoading(String),

    /// Artifact download failed. Retryable.
    #[error("artifact download failure: {0}")]
    ArtifactDownload(String),

    /// Preparation observed the cancellation token.
    #[error("preparation cancelled")]
    Cancelled,
}

impl ComponentManagerError {
    /// Whether re-running the step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ComponentManagerError::Packaging(_)
                | ComponentManagerError::PackageLoading(_)
                | ComponentManagerError::ArtifactDownload(_)
        )
    }
}

impl From<ComponentManagerError> for DeploymentError {
    fn from(err: ComponentManagerError) -> Self {
        let base = match &err {
            ComponentManagerError::NoAvailableVersion { .. } => {
                DeploymentError::new(ErrorCode::NoAvailableComponentVersion, err.to_string())
                    .with_type(ErrorType::DependencyError)
            }
            ComponentManagerError::Packaging(_) | ComponentManagerError::PackageLoading(_) => {
                DeploymentError::new(ErrorCode::ComponentPackagingError, err.to_string())
                    .with_type(ErrorType::DependencyError)
            }
            ComponentManagerError::ArtifactDownload(_) => {
                DeploymentError::new(ErrorCode::ArtifactDownloadError, err.to_string())
                    .with_type(ErrorType::DependencyError)
            }
            ComponentManagerError::Cancelled => {
                DeploymentError::new(ErrorCode::DeploymentFailure, err.to_string())
            }
        };
        if err.is_retryable() {
            base.retryable()
        } else {
            base
        }
    }
}

/// The package manager, as seen by the deployment core.
#[async_trait]
pub trait ComponentManager: Send + Sync {
    /// Resolve the transitive dependency graph of the document's roots,
    /// honoring version pins recorded for other groups.
    async fn resolve_dependencies(
        &self,
        document: &DeploymentDocument,
        group_to_roots: &GroupToRoots,
    ) -> std::result::Result<Vec<ComponentIdentifier>, ComponentManagerError>;

    /// Download and unpack artifacts for the resolved components.
    ///
    /// Long-running; implementations must observe `cancel` between
    /// artifacts and return [`ComponentManagerError::Cancelled`] promptly.
    async fn prepare_packages(
        &self,
        components: &[ComponentIdentifier],
        cancel: &CancelToken,
    ) -> std::result::Result<(), ComponentManagerError>;

    /// Build the target service-configuration map the merger will apply.
    async fn resolve_runtime_config(
        &self,
        components: &[ComponentIdentifier],
        document: &DeploymentDocument,
        current_roots: &[String],
    ) -> std::result::Result<ServiceConfigMap, ComponentManagerError>;
}
