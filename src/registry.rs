use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{CronbeatError, Result};
use crate::job::{Job, JobKind};
use crate::store::{Coordinator, EventKind, Keyspace, WatchEvent};

/// Change derived from one watch event, for the scheduler to act on.
#[derive(Debug, Clone)]
pub enum RegistryChange {
    Upserted(Arc<Job>),
    Removed(i64),
}

/// The jobs assigned to this node, indexed by id.
///
/// The map is rebuilt wholesale by [`JobRegistry::load_snapshot`] and
/// mutated only by [`JobRegistry::apply`]; readers get `Arc` snapshots
/// and never observe a torn entry.
pub struct JobRegistry {
    coord: Coordinator,
    node_uuid: String,
    jobs: RwLock<HashMap<i64, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new(coord: Coordinator, node_uuid: impl Into<String>) -> Self {
        Self {
            coord,
            node_uuid: node_uuid.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn node_uuid(&self) -> &str {
        &self.node_uuid
    }

    /// List every assignment under this node's prefix and rebuild the map.
    ///
    /// Malformed or invalid entries are logged and skipped; one bad job
    /// never aborts the snapshot. Returns how many jobs were indexed.
    pub async fn load_snapshot(&self) -> Result<usize> {
        let prefix = self.coord.keyspace().job_prefix(&self.node_uuid);
        let kvs = self.coord.get_prefix(&prefix).await?;

        let mut jobs = HashMap::with_capacity(kvs.len());
        for kv in kvs {
            match decode_job(&kv.key, &kv.value) {
                Some(job) => {
                    jobs.insert(job.id, Arc::new(job));
                }
                None => continue,
            }
        }
        let count = jobs.len();
        *self.jobs.write().expect("registry map poisoned") = jobs;
        Ok(count)
    }

    /// Change stream over this node's assignment prefix.
    pub fn watch(&self) -> Result<UnboundedReceiverStream<WatchEvent>> {
        let prefix = self.coord.keyspace().job_prefix(&self.node_uuid);
        self.coord.watch_prefix(&prefix)
    }

    /// Fold one watch event into the map. Put events re-validate before
    /// upserting; a bad put leaves any prior entry in place.
    pub fn apply(&self, event: &WatchEvent) -> Option<RegistryChange> {
        match event.kind {
            EventKind::Put => {
                let job = Arc::new(decode_job(&event.key, &event.value)?);
                self.jobs
                    .write()
                    .expect("registry map poisoned")
                    .insert(job.id, job.clone());
                Some(RegistryChange::Upserted(job))
            }
            EventKind::Delete => {
                let id = Keyspace::job_id_from_key(&event.key);
                self.jobs
                    .write()
                    .expect("registry map poisoned")
                    .remove(&id)?;
                Some(RegistryChange::Removed(id))
            }
        }
    }

    /// Fetch a single job straight from the store, with the revision a
    /// caller needs for an optimistic update.
    pub async fn resolve_run(&self, job_id: i64) -> Result<(Job, i64)> {
        let key = self.coord.keyspace().job(&self.node_uuid, job_id);
        let kv = self
            .coord
            .get(&key)
            .await?
            .ok_or_else(|| CronbeatError::NotFound(key.clone()))?;
        let mut job: Job = serde_json::from_slice(&kv.value)?;
        if job.kind == JobKind::Command {
            job.split_cmd();
        }
        Ok((job, kv.mod_revision))
    }

    pub fn get(&self, job_id: i64) -> Option<Arc<Job>> {
        self.jobs
            .read()
            .expect("registry map poisoned")
            .get(&job_id)
            .cloned()
    }

    pub fn jobs(&self) -> Vec<Arc<Job>> {
        self.jobs
            .read()
            .expect("registry map poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().expect("registry map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_job(key: &str, value: &[u8]) -> Option<Job> {
    let mut job: Job = match serde_json::from_slice(value) {
        Ok(job) => job,
        Err(err) => {
            tracing::warn!(key, error = %err, "job entry failed to deserialize, skipping");
            return None;
        }
    };
    if let Err(err) = job.check() {
        tracing::warn!(key, error = %err, "job entry is invalid, skipping");
        return None;
    }
    Some(job)
}
