//! Contracts of the relational persistence layer the core calls into.
//!
//! The real layer (job/user/node CRUD, audit logs) lives in the control
//! plane; the core only needs these narrow traits. `MemoryRepo` backs the
//! embedded binary and the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{CronbeatError, Result};
use crate::joblog::{JobLogEntry, JobLogPatch};

#[derive(Debug, Clone)]
pub struct UserContact {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub uuid: String,
    pub ip: String,
    pub pid: String,
}

/// Sink for per-run log records.
#[async_trait]
pub trait JobLogRepo: Send + Sync {
    /// Insert the partial record created at run start; returns its id.
    async fn insert(&self, entry: JobLogEntry) -> Result<i64>;

    /// Patch the terminal outcome onto an existing record.
    async fn update(&self, id: i64, patch: JobLogPatch) -> Result<()>;
}

/// Lookup surface for notification recipients and node records.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user_contact(&self, id: i64) -> Result<UserContact>;

    async fn node_record(&self, uuid: &str) -> Result<NodeRecord>;
}

#[derive(Debug, Clone)]
pub struct StoredLog {
    pub id: i64,
    pub entry: JobLogEntry,
    pub patch: Option<JobLogPatch>,
}

/// In-memory implementation of both contracts.
#[derive(Default)]
pub struct MemoryRepo {
    logs: Mutex<Vec<StoredLog>>,
    users: Mutex<HashMap<i64, UserContact>>,
    nodes: Mutex<HashMap<String, NodeRecord>>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserContact) {
        self.users.lock().expect("user map poisoned").insert(user.id, user);
    }

    pub fn add_node(&self, node: NodeRecord) {
        self.nodes.lock().expect("node map poisoned").insert(node.uuid.clone(), node);
    }

    pub fn logs(&self) -> Vec<StoredLog> {
        self.logs.lock().expect("log store poisoned").clone()
    }
}

#[async_trait]
impl JobLogRepo for MemoryRepo {
    async fn insert(&self, entry: JobLogEntry) -> Result<i64> {
        let mut logs = self.logs.lock().expect("log store poisoned");
        let id = logs.len() as i64 + 1;
        logs.push(StoredLog {
            id,
            entry,
            patch: None,
        });
        Ok(id)
    }

    async fn update(&self, id: i64, patch: JobLogPatch) -> Result<()> {
        let mut logs = self.logs.lock().expect("log store poisoned");
        let log = logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| CronbeatError::NotFound(format!("job log {id}")))?;
        log.patch = Some(patch);
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryRepo {
    async fn user_contact(&self, id: i64) -> Result<UserContact> {
        self.users
            .lock()
            .expect("user map poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| CronbeatError::NotFound(format!("user {id}")))
    }

    async fn node_record(&self, uuid: &str) -> Result<NodeRecord> {
        self.nodes
            .lock()
            .expect("node map poisoned")
            .get(uuid)
            .cloned()
            .ok_or_else(|| CronbeatError::NotFound(format!("node {uuid}")))
    }
}
