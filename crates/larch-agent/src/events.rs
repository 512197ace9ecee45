//! Deployment lifecycle events.
//!
//! Best-effort observability stream; a lagging subscriber never blocks the
//! orchestrator.

use chrono::{DateTime, Utc};
use larch_types::{DeploymentId, DeploymentType, JobStatus};
use serde::{Deserialize, Serialize};

/// Something the orchestrator did with a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeploymentEvent {
    /// A deployment left the queue and its task was spawned.
    Started {
        deployment_id: DeploymentId,
        deployment_type: DeploymentType,
    },

    /// A retryable attempt failed; the task will be re-run.
    AttemptFailed {
        deployment_id: DeploymentId,
        attempt: u32,
    },

    /// The active task was cancelled cleanly; no result follows.
    Cancelled { deployment_id: DeploymentId },

    /// The task staged a host-agent restart; the result is produced in the
    /// next process lifetime.
    RestartPending { deployment_id: DeploymentId },

    /// A terminal status was committed.
    Finished {
        deployment_id: DeploymentId,
        status: JobStatus,
    },
}

/// An event plus when it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEventEnvelope {
    /// The event.
    pub event: DeploymentEvent,

    /// When it was emitted.
    pub timestamp: DateTime<Utc>,
}

impl DeploymentEventEnvelope {
    pub fn new(event: DeploymentEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }
}
