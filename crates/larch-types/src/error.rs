//! Deployment failure chain and the error-code taxonomy.
//!
//! Failures are tagged variants: each link in a failure chain carries a
//! stable [`ErrorCode`], orthogonal [`ErrorType`] tags, optional context
//! codes, a retryability flag, and an optional cause. Status-detail
//! construction is a recursive descent over the chain and is a pure
//! function of it.

use crate::status::StatusDetails;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Hierarchical error codes surfaced in status details.
///
/// The hierarchy (outer → inner) is encoded in the order codes appear on a
/// failure chain, not in the enum itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DeploymentFailure,

    // I/O
    IoError,
    IoWriteError,
    IoUnzipError,
    IoMappingError,

    // Network
    NetworkError,

    // Cloud service
    CloudServiceError,
    ResourceNotFound,
    AccessDenied,
    BadRequest,
    ThrottlingError,
    ConflictedRequest,
    ServerError,

    // Artifact store
    S3Error,
    S3ServerError,
    S3ResourceNotFound,
    S3AccessDenied,
    S3BadRequest,
    S3HeadObjectAccessDenied,

    // Artifacts
    ArtifactDownloadError,
    DockerError,
    DockerImageNotValid,

    // Host agent (nucleus)
    NucleusError,
    MultipleNucleusError,
    NucleusRestartFailure,

    // Components
    ComponentError,
    ComponentBroken,
    ComponentUpdateError,
    NoAvailableComponentVersion,
    ComponentPackagingError,

    // Requests
    InvalidRequest,
}

impl ErrorCode {
    /// Wire representation of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DeploymentFailure => "DEPLOYMENT_FAILURE",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::IoWriteError => "IO_WRITE_ERROR",
            ErrorCode::IoUnzipError => "IO_UNZIP_ERROR",
            ErrorCode::IoMappingError => "IO_MAPPING_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::CloudServiceError => "CLOUD_SERVICE_ERROR",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::ThrottlingError => "THROTTLING_ERROR",
            ErrorCode::ConflictedRequest => "CONFLICTED_REQUEST",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::S3Error => "S3_ERROR",
            ErrorCode::S3ServerError => "S3_SERVER_ERROR",
            ErrorCode::S3ResourceNotFound => "S3_RESOURCE_NOT_FOUND",
            ErrorCode::S3AccessDenied => "S3_ACCESS_DENIED",
            ErrorCode::S3BadRequest => "S3_BAD_REQUEST",
            ErrorCode::S3HeadObjectAccessDenied => "S3_HEAD_OBJECT_ACCESS_DENIED",
            ErrorCode::ArtifactDownloadError => "ARTIFACT_DOWNLOAD_ERROR",
            ErrorCode::DockerError => "DOCKER_ERROR",
            ErrorCode::DockerImageNotValid => "DOCKER_IMAGE_NOT_VALID",
            ErrorCode::NucleusError => "NUCLEUS_ERROR",
            ErrorCode::MultipleNucleusError => "MULTIPLE_NUCLEUS_ERROR",
            ErrorCode::NucleusRestartFailure => "NUCLEUS_RESTART_FAILURE",
            ErrorCode::ComponentError => "COMPONENT_ERROR",
            ErrorCode::ComponentBroken => "COMPONENT_BROKEN",
            ErrorCode::ComponentUpdateError => "COMPONENT_UPDATE_ERROR",
            ErrorCode::NoAvailableComponentVersion => "NO_AVAILABLE_COMPONENT_VERSION",
            ErrorCode::ComponentPackagingError => "COMPONENT_PACKAGING_ERROR",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orthogonal error classification tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    DeviceError,
    NetworkError,
    PermissionError,
    RequestError,
    ServerError,
    DependencyError,
    NucleusError,
    ComponentError,
}

impl ErrorType {
    /// Wire representation of the type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::DeviceError => "DEVICE_ERROR",
            ErrorType::NetworkError => "NETWORK_ERROR",
            ErrorType::PermissionError => "PERMISSION_ERROR",
            ErrorType::RequestError => "REQUEST_ERROR",
            ErrorType::ServerError => "SERVER_ERROR",
            ErrorType::DependencyError => "DEPENDENCY_ERROR",
            ErrorType::NucleusError => "NUCLEUS_ERROR",
            ErrorType::ComponentError => "COMPONENT_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One link in a deployment failure chain.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DeploymentError {
    code: ErrorCode,
    message: String,
    error_types: Vec<ErrorType>,
    error_context: Vec<ErrorCode>,
    retryable: bool,
    #[source]
    source: Option<Box<DeploymentError>>,
}

impl DeploymentError {
    /// Create a new failure link.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            error_types: Vec::new(),
            error_context: Vec::new(),
            retryable: false,
            source: None,
        }
    }

    /// Attach a type tag.
    pub fn with_type(mut self, error_type: ErrorType) -> Self {
        self.error_types.push(error_type);
        self
    }

    /// Attach a context code reported after this link's own code.
    pub fn with_context(mut self, code: ErrorCode) -> Self {
        self.error_context.push(code);
        self
    }

    /// Mark the failure as retryable.
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    /// Chain a cause under this link.
    pub fn caused_by(mut self, cause: DeploymentError) -> Self {
        self.source = Some(Box::new(cause));
        self
    }

    /// This link's code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// This link's message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether re-running the failed step may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// The next link in the chain, if any.
    pub fn cause(&self) -> Option<&DeploymentError> {
        self.source.as_deref()
    }

    /// The innermost link of the chain.
    pub fn root_cause(&self) -> &DeploymentError {
        let mut link = self;
        while let Some(cause) = link.cause() {
            link = cause;
        }
        link
    }

    /// I/O failure helper; every store-layer failure surfaces this way.
    pub fn io_write(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::IoWriteError, message).with_type(ErrorType::DeviceError)
    }

    /// Request-validation failure helper.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message).with_type(ErrorType::RequestError)
    }

    /// Build status details for a failure chain rooted at this link.
    ///
    /// The stack leads with `DEPLOYMENT_FAILURE`, then walks the chain outer
    /// to inner appending each link's code followed by its context codes;
    /// duplicates across links are preserved. Type tags are accumulated as a
    /// set. The failure cause is the outermost message, joined with the
    /// root-cause message when they differ.
    pub fn status_details(&self) -> StatusDetails {
        let mut error_stack = vec![ErrorCode::DeploymentFailure];
        let mut error_types = BTreeSet::new();

        let mut link = Some(self);
        let mut outermost = true;
        while let Some(err) = link {
            if !(outermost && err.code == ErrorCode::DeploymentFailure) {
                error_stack.push(err.code);
            }
            error_stack.extend(err.error_context.iter().copied());
            error_types.extend(err.error_types.iter().copied());
            outermost = false;
            link = err.cause();
        }

        let root = self.root_cause();
        let failure_cause = if std::ptr::eq(root, self) {
            self.message.clone()
        } else {
            format!("{}: {}", self.message, root.message)
        };

        StatusDetails {
            failure_cause,
            error_stack,
            error_types,
        }
    }
}
