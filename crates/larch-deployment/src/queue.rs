//! Deployment queue with key-based deduplication and replacement.
//!
//! Cloud intents arrive unbatched and can be re-sent; the queue absorbs
//! retransmits without re-executing. The shadow stream is latest-wins, the
//! job stream first-wins; the replacement rules below are the only source
//! of reordering in the core.

use larch_types::{Deployment, DeploymentStage, DeploymentType};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, trace};

/// Thread-safe FIFO of pending deployments.
///
/// All mutations run under a single mutex; `poll` never blocks.
#[derive(Default)]
pub struct DeploymentQueue {
    entries: Mutex<VecDeque<Deployment>>,
}

impl DeploymentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a deployment.
    ///
    /// Returns false when the offer is a duplicate no-op; true when the
    /// deployment was enqueued or replaced an existing entry. Rules, in
    /// order, against every queued entry:
    ///
    /// 1. same (type, id, stage) and same cancellation marker → duplicate;
    /// 2. a BOOTSTRAP offer replaces a queued DEFAULT entry with the same
    ///    (type, id) in place;
    /// 3. a cancellation replaces its target in place, except a queued
    ///    BOOTSTRAP entry, which cannot be cancelled via the queue;
    /// 4. a SHADOW offer replaces the queued non-head SHADOW entry in its
    ///    slot, keeping at most one enqueued SHADOW beyond the head;
    /// 5. otherwise append at the tail.
    pub fn offer(&self, deployment: Deployment) -> bool {
        let mut entries = self.entries.lock().unwrap();

        // Rule 1: duplicate detection is stage- and cancellation-aware.
        if entries.iter().any(|e| {
            e.identity() == deployment.identity() && e.cancelled == deployment.cancelled
        }) {
            trace!(id = %deployment.id, "Duplicate deployment rejected");
            return false;
        }

        // Rule 2: BOOTSTRAP supersedes DEFAULT for the same id.
        if deployment.stage == DeploymentStage::Bootstrap {
            if let Some(slot) = entries.iter().position(|e| {
                e.same_target(&deployment) && e.stage == DeploymentStage::Default
            }) {
                debug!(id = %deployment.id, slot, "Bootstrap deployment replaced default entry");
                entries[slot] = deployment;
                return true;
            }
        }

        // Rule 3: a cancellation replaces its queued target in place.
        if deployment.cancelled {
            if let Some(slot) = entries.iter().position(|e| e.same_target(&deployment)) {
                if entries[slot].stage == DeploymentStage::Bootstrap {
                    trace!(id = %deployment.id, "Bootstrap entry cannot be cancelled via queue");
                    return false;
                }
                debug!(id = %deployment.id, slot, "Cancellation replaced queued entry");
                entries[slot] = deployment;
                return true;
            }
        }

        // Rule 4: at most one enqueued SHADOW beyond any head entry.
        if deployment.deployment_type == DeploymentType::Shadow {
            if let Some(slot) = entries
                .iter()
                .enumerate()
                .position(|(i, e)| i > 0 && e.deployment_type == DeploymentType::Shadow)
            {
                debug!(id = %deployment.id, slot, "Shadow deployment replaced queued shadow");
                entries[slot] = deployment;
                return true;
            }
        }

        // Rule 5: plain append.
        trace!(id = %deployment.id, "Deployment enqueued");
        entries.push_back(deployment);
        true
    }

    /// Remove and return the head of the queue, if any.
    pub fn poll(&self) -> Option<Deployment> {
        self.entries.lock().unwrap().pop_front()
    }

    /// Remove and return a queued cancellation targeting `(type, id)`.
    ///
    /// Used by the orchestrator to spot cancellations of the active task.
    pub fn take_cancellation(
        &self,
        deployment_type: DeploymentType,
        id: &larch_types::DeploymentId,
    ) -> Option<Deployment> {
        let mut entries = self.entries.lock().unwrap();
        let slot = entries
            .iter()
            .position(|e| e.cancelled && e.deployment_type == deployment_type && &e.id == id)?;
        entries.remove(slot)
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Current contents, head first.
    pub fn snapshot(&self) -> Vec<Deployment> {
        self.entries.lock().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_types::{DeploymentId, DeploymentIntent, LocalOverrideRequest};

    fn deployment(id: &str, deployment_type: DeploymentType) -> Deployment {
        Deployment::new(
            DeploymentId::new(id),
            deployment_type,
            DeploymentIntent::LocalOverride(LocalOverrideRequest::default()),
        )
    }

    #[test]
    fn duplicate_offers_are_rejected() {
        let queue = DeploymentQueue::new();
        assert!(queue.offer(deployment("D1", DeploymentType::CloudJob)));
        assert!(!queue.offer(deployment("D1", DeploymentType::CloudJob)));
        assert_eq!(queue.snapshot().len(), 1);
    }

    #[test]
    fn same_id_different_stage_is_not_a_duplicate() {
        let queue = DeploymentQueue::new();
        assert!(queue.offer(deployment("D1", DeploymentType::CloudJob)));
        assert!(queue.offer(
            deployment("D1", DeploymentType::CloudJob).with_stage(DeploymentStage::HostAgentActivation)
        ));
        assert_eq!(queue.snapshot().len(), 2);
    }

    #[test]
    fn bootstrap_replaces_default_in_place() {
        let queue = DeploymentQueue::new();
        queue.offer(deployment("D0", DeploymentType::Local));
        queue.offer(deployment("D1", DeploymentType::CloudJob));
        queue.offer(deployment("D2", DeploymentType::Local));

        let bootstrap =
            deployment("D1", DeploymentType::CloudJob).with_stage(DeploymentStage::Bootstrap);
        assert!(queue.offer(bootstrap));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[1].id, DeploymentId::new("D1"));
        assert_eq!(snapshot[1].stage, DeploymentStage::Bootstrap);
    }

    #[test]
    fn cancellation_replaces_target_in_place() {
        let queue = DeploymentQueue::new();
        queue.offer(deployment("D1", DeploymentType::CloudJob));
        queue.offer(deployment("D2", DeploymentType::CloudJob));

        assert!(queue.offer(Deployment::cancellation(
            DeploymentId::new("D1"),
            DeploymentType::CloudJob
        )));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].cancelled);
        assert_eq!(snapshot[0].id, DeploymentId::new("D1"));
    }

    #[test]
    fn queued_bootstrap_cannot_be_cancelled() {
        let queue = DeploymentQueue::new();
        queue.offer(deployment("D1", DeploymentType::CloudJob).with_stage(DeploymentStage::Bootstrap));

        assert!(!queue.offer(Deployment::cancellation(
            DeploymentId::new("D1"),
            DeploymentType::CloudJob
        )));
        assert!(!queue.snapshot()[0].cancelled);
    }

    #[test]
    fn at_most_one_shadow_beyond_head() {
        let queue = DeploymentQueue::new();
        queue.offer(deployment("S1", DeploymentType::Shadow));
        queue.offer(deployment("J1", DeploymentType::CloudJob));
        // S1 is at the head: appended, not replaced.
        queue.offer(deployment("S2", DeploymentType::Shadow));
        // S2 is beyond the head: replaced in its slot.
        queue.offer(deployment("S3", DeploymentType::Shadow));

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].id, DeploymentId::new("S1"));
        assert_eq!(snapshot[1].id, DeploymentId::new("J1"));
        assert_eq!(snapshot[2].id, DeploymentId::new("S3"));
    }

    #[test]
    fn poll_is_fifo() {
        let queue = DeploymentQueue::new();
        queue.offer(deployment("D1", DeploymentType::CloudJob));
        queue.offer(deployment("D2", DeploymentType::Local));

        assert_eq!(queue.poll().unwrap().id, DeploymentId::new("D1"));
        assert_eq!(queue.poll().unwrap().id, DeploymentId::new("D2"));
        assert!(queue.poll().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn take_cancellation_finds_marker_for_active_id() {
        let queue = DeploymentQueue::new();
        queue.offer(deployment("D2", DeploymentType::CloudJob));
        queue.offer(Deployment::cancellation(
            DeploymentId::new("X"),
            DeploymentType::CloudJob,
        ));

        let taken = queue
            .take_cancellation(DeploymentType::CloudJob, &DeploymentId::new("X"))
            .unwrap();
        assert!(taken.cancelled);
        assert_eq!(queue.snapshot().len(), 1);
        assert!(queue
            .take_cancellation(DeploymentType::CloudJob, &DeploymentId::new("X"))
            .is_none());
    }
}
