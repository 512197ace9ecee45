//! Status keeper: persisted, replayable deployment status updates.
//!
//! Records are retained FIFO per deployment type until a consumer accepts
//! them, so terminal statuses survive disconnects and are re-published on
//! reconnect.

use crate::error::Result;
use crate::fs_util::{atomic_write_json, read_json_opt};
use larch_types::{DeploymentType, StatusRecord};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// A registered status consumer.
///
/// Returns true when the record has been accepted (e.g. acknowledged by the
/// cloud). Consumers run on the publisher's task and must not block
/// indefinitely.
pub type StatusConsumer = Box<dyn Fn(&StatusRecord) -> bool + Send + Sync>;

const DEPLOYMENT_TYPES: [DeploymentType; 3] = [
    DeploymentType::CloudJob,
    DeploymentType::Shadow,
    DeploymentType::Local,
];

/// Persists status records and fans them out to consumers.
pub struct StatusKeeper {
    dir: PathBuf,
    consumers: RwLock<BTreeMap<String, Vec<(String, StatusConsumer)>>>,
    retained: Mutex<BTreeMap<String, VecDeque<StatusRecord>>>,
}

impl StatusKeeper {
    /// Open (creating if needed) the keeper's directory and load any
    /// retained records.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| crate::error::StoreError::io(&dir, e))?;

        let mut retained = BTreeMap::new();
        for deployment_type in DEPLOYMENT_TYPES {
            let key = deployment_type.to_string();
            let path = dir.join(format!("{key}.json"));
            if let Some(records) = read_json_opt::<Vec<StatusRecord>>(&path)? {
                retained.insert(key, records.into());
            }
        }

        Ok(Self {
            dir,
            consumers: RwLock::new(BTreeMap::new()),
            retained: Mutex::new(retained),
        })
    }

    /// Register a consumer for one deployment type.
    ///
    /// Returns false (and does nothing) when `consumer_id` is already
    /// registered for that type.
    pub fn register_consumer(
        &self,
        deployment_type: DeploymentType,
        consumer_id: &str,
        consumer: StatusConsumer,
    ) -> bool {
        let mut consumers = self.consumers.write().unwrap();
        let entry = consumers.entry(deployment_type.to_string()).or_default();
        if entry.iter().any(|(id, _)| id == consumer_id) {
            warn!(consumer_id, %deployment_type, "Consumer already registered");
            return false;
        }
        entry.push((consumer_id.to_string(), consumer));
        true
    }

    /// Append a record and publish the type's retained FIFO.
    ///
    /// Accepted records are removed; the rest stay persisted for replay.
    pub fn persist_and_publish(&self, record: StatusRecord) -> Result<()> {
        let deployment_type = record.deployment_type;
        {
            let mut retained = self.retained.lock().unwrap();
            retained
                .entry(deployment_type.to_string())
                .or_default()
                .push_back(record);
            self.persist_locked(&retained, deployment_type)?;
        }
        self.publish_persisted_status_updates(deployment_type)
    }

    /// Replay retained records for a type in FIFO order, removing those a
    /// consumer accepts. Called on reconnect; a second call with accepting
    /// consumers is a no-op.
    pub fn publish_persisted_status_updates(&self, deployment_type: DeploymentType) -> Result<()> {
        let consumers = self.consumers.read().unwrap();
        let registered = consumers
            .get(&deployment_type.to_string())
            .map(|v| v.as_slice())
            .unwrap_or(&[]);

        let mut retained = self.retained.lock().unwrap();
        let Some(queue) = retained.get_mut(&deployment_type.to_string()) else {
            return Ok(());
        };
        if queue.is_empty() {
            return Ok(());
        }

        let before = queue.len();
        queue.retain(|record| {
            if registered.is_empty() {
                return true;
            }
            let accepted = registered.iter().all(|(_, consumer)| consumer(record));
            !accepted
        });

        if queue.len() != before {
            debug!(
                %deployment_type,
                published = before - queue.len(),
                retained = queue.len(),
                "Published persisted status updates"
            );
        }
        self.persist_locked(&retained, deployment_type)
    }

    /// Retained records for a type, oldest first.
    pub fn retained_records(&self, deployment_type: DeploymentType) -> Vec<StatusRecord> {
        self.retained
            .lock()
            .unwrap()
            .get(&deployment_type.to_string())
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn persist_locked(
        &self,
        retained: &BTreeMap<String, VecDeque<StatusRecord>>,
        deployment_type: DeploymentType,
    ) -> Result<()> {
        let key = deployment_type.to_string();
        let records: Vec<&StatusRecord> =
            retained.get(&key).map(|q| q.iter().collect()).unwrap_or_default();
        atomic_write_json(&self.dir.join(format!("{key}.json")), &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larch_types::{DeploymentId, JobStatus, StatusDetails};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(id: &str, status: JobStatus) -> StatusRecord {
        StatusRecord {
            deployment_id: DeploymentId::new(id),
            configuration_arn: None,
            deployment_type: DeploymentType::CloudJob,
            status,
            status_details: StatusDetails::default(),
            root_packages: vec!["component1".into()],
        }
    }

    #[test]
    fn duplicate_consumer_registration_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let keeper = StatusKeeper::new(tmp.path()).unwrap();
        assert!(keeper.register_consumer(DeploymentType::CloudJob, "jobs", Box::new(|_| true)));
        assert!(!keeper.register_consumer(DeploymentType::CloudJob, "jobs", Box::new(|_| true)));
    }

    #[test]
    fn accepted_records_are_removed() {
        let tmp = TempDir::new().unwrap();
        let keeper = StatusKeeper::new(tmp.path()).unwrap();
        keeper.register_consumer(DeploymentType::CloudJob, "jobs", Box::new(|_| true));

        keeper
            .persist_and_publish(record("D1", JobStatus::InProgress))
            .unwrap();
        assert!(keeper.retained_records(DeploymentType::CloudJob).is_empty());
    }

    #[test]
    fn rejected_records_are_retained_and_replayed_in_order() {
        let tmp = TempDir::new().unwrap();
        let keeper = StatusKeeper::new(tmp.path()).unwrap();

        let accepting = Arc::new(AtomicU32::new(0));
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let accepting = accepting.clone();
            let seen = seen.clone();
            keeper.register_consumer(
                DeploymentType::CloudJob,
                "jobs",
                Box::new(move |r| {
                    seen.lock().unwrap().push(r.deployment_id.to_string());
                    accepting.load(Ordering::SeqCst) == 1
                }),
            );
        }

        keeper
            .persist_and_publish(record("D1", JobStatus::InProgress))
            .unwrap();
        keeper
            .persist_and_publish(record("D1", JobStatus::Succeeded))
            .unwrap();
        assert_eq!(keeper.retained_records(DeploymentType::CloudJob).len(), 2);

        // "Reconnect": consumer starts accepting; replay drains FIFO.
        accepting.store(1, Ordering::SeqCst);
        keeper
            .publish_persisted_status_updates(DeploymentType::CloudJob)
            .unwrap();
        assert!(keeper.retained_records(DeploymentType::CloudJob).is_empty());

        let seen = seen.lock().unwrap();
        // Publish order preserved on every delivery.
        let replayed = &seen[seen.len() - 2..];
        assert_eq!(replayed, &["D1".to_string(), "D1".to_string()]);

        // Second replay is a no-op.
        keeper
            .publish_persisted_status_updates(DeploymentType::CloudJob)
            .unwrap();
    }

    #[test]
    fn retained_records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let keeper = StatusKeeper::new(tmp.path()).unwrap();
            keeper
                .persist_and_publish(record("D1", JobStatus::Failed))
                .unwrap();
        }
        let keeper = StatusKeeper::new(tmp.path()).unwrap();
        let records = keeper.retained_records(DeploymentType::CloudJob);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, JobStatus::Failed);
    }
}
