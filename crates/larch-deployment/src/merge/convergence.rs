//! Convergence tracking after an activation.

use crate::merge::activator::ActivationWatch;
use chrono::Utc;
use larch_supervisor::{ServiceGraph, ServiceState};
use larch_types::{DeploymentError, ErrorCode, ErrorType};
use std::time::Duration;
use tracing::{debug, trace};

/// Poll tracked services until they settle.
///
/// A service counts as converged once it is settled (`RUNNING`/`FINISHED`)
/// at its declared desired state. A service that turns `BROKEN` after the
/// merge started fails the wait; one that was already broken beforehand is
/// skipped, the decision being the state modification time. A tracked
/// service that exceeds its declared startup timeout fails the wait.
pub async fn wait_for_convergence(
    graph: &dyn ServiceGraph,
    watch: &ActivationWatch,
    poll_interval: Duration,
) -> Result<(), DeploymentError> {
    loop {
        let mut all_settled = true;

        for name in &watch.tracked {
            let snapshot = graph.status(name).await.map_err(|e| {
                DeploymentError::new(
                    ErrorCode::ComponentBroken,
                    format!("tracked service {name} disappeared: {e}"),
                )
                .with_type(ErrorType::ComponentError)
            })?;

            if snapshot.state == ServiceState::Broken {
                if snapshot.state_mod_time > watch.merge_start {
                    return Err(DeploymentError::new(
                        ErrorCode::ComponentBroken,
                        format!("service {name} broke after the merge started"),
                    )
                    .with_type(ErrorType::ComponentError));
                }
                // Broken before the merge and unchanged since: not this
                // deployment's failure.
                debug!(service = %name, "Skipping service broken before merge");
                continue;
            }

            if snapshot.reached_desired_state && snapshot.state.is_settled() {
                continue;
            }

            let elapsed = (Utc::now() - watch.merge_start)
                .to_std()
                .unwrap_or_default();
            if elapsed > snapshot.startup_timeout {
                return Err(DeploymentError::new(
                    ErrorCode::ComponentUpdateError,
                    format!(
                        "service {name} did not reach its desired state within {:?}",
                        snapshot.startup_timeout
                    ),
                )
                .with_type(ErrorType::ComponentError));
            }

            all_settled = false;
        }

        if all_settled {
            trace!(tracked = watch.tracked.len(), "All tracked services settled");
            return Ok(());
        }
        tokio::time::sleep(poll_interval).await;
    }
}
