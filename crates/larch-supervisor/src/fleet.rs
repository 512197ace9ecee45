//! Best-effort cloud fleet-inventory interface.

use async_trait::async_trait;
use thiserror::Error;

/// Fleet-inventory failures, classified for the caller's retry policy.
#[derive(Debug, Clone, Error)]
pub enum FleetInventoryError {
    /// The device is not allowed to list its groups; callers swallow this.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Transient service failure; callers retry with capped backoff.
    #[error("transient: {0}")]
    Transient(String),
}

/// Cloud-side group directory, refreshed best-effort before resolution.
#[async_trait]
pub trait FleetInventory: Send + Sync {
    /// Refresh and return the device's group memberships.
    async fn refresh_group_memberships(
        &self,
    ) -> std::result::Result<Vec<String>, FleetInventoryError>;
}
