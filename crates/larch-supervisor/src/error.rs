//! Supervisor interface error types.

use larch_types::{DeploymentError, ErrorCode, ErrorType};
use thiserror::Error;

/// Errors surfaced by supervisor-side operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("supervisor i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration apply failed: {0}")]
    ConfigApply(String),

    #[error("restart request failed: {0}")]
    Restart(String),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SupervisorError> for DeploymentError {
    fn from(err: SupervisorError) -> Self {
        match &err {
            SupervisorError::ServiceNotFound(_) => {
                DeploymentError::new(ErrorCode::ComponentError, err.to_string())
                    .with_type(ErrorType::ComponentError)
            }
            SupervisorError::Io(_) => DeploymentError::io_write(err.to_string()),
            SupervisorError::ConfigApply(_) => {
                DeploymentError::new(ErrorCode::ComponentUpdateError, err.to_string())
                    .with_type(ErrorType::ComponentError)
            }
            SupervisorError::Restart(_) => {
                DeploymentError::new(ErrorCode::NucleusError, err.to_string())
                    .with_type(ErrorType::NucleusError)
            }
            SupervisorError::Serialization(_) => {
                DeploymentError::new(ErrorCode::IoMappingError, err.to_string())
                    .with_type(ErrorType::DeviceError)
            }
        }
    }
}

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;
