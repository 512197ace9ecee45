//! Store error types.

use larch_types::DeploymentError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no ongoing deployment directory")]
    NoOngoingDeployment,

    #[error("config snapshot failed: {0}")]
    Snapshot(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for DeploymentError {
    /// Every store failure surfaces as an I/O write error; callers fail the
    /// deployment before any service mutation.
    fn from(err: StoreError) -> Self {
        DeploymentError::io_write(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
