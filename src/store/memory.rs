use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{CronbeatError, Result};
use crate::store::engine::{
    EventKind, KeyValue, KvEngine, LeaseId, WatchEvent, NO_PRIOR_REVISION,
};

/// How often the sweeper looks for expired leases.
const SWEEP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    mod_revision: i64,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct Lease {
    deadline: Instant,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Shared {
    keys: BTreeMap<String, Entry>,
    leases: HashMap<i64, Lease>,
    watchers: Vec<Watcher>,
    revision: i64,
    next_lease: i64,
}

impl Shared {
    fn bump(&mut self) -> i64 {
        self.revision += 1;
        self.revision
    }

    fn broadcast(&mut self, event: WatchEvent) {
        self.watchers
            .retain(|w| !event.key.starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
    }

    fn remove_key(&mut self, key: &str) -> bool {
        if self.keys.remove(key).is_none() {
            return false;
        }
        let revision = self.bump();
        self.broadcast(WatchEvent {
            kind: EventKind::Delete,
            key: key.to_string(),
            value: Vec::new(),
            revision,
        });
        true
    }

    fn insert_key(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> i64 {
        let revision = self.bump();
        self.keys.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                mod_revision: revision,
                lease,
            },
        );
        self.broadcast(WatchEvent {
            kind: EventKind::Put,
            key: key.to_string(),
            value,
            revision,
        });
        revision
    }

    /// Drop expired leases and every key bound to them.
    fn expire_leases(&mut self, now: Instant) {
        let expired: Vec<i64> = self
            .leases
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.leases.remove(&id);
            self.drop_bound_keys(LeaseId(id));
        }
    }

    fn drop_bound_keys(&mut self, lease: LeaseId) {
        let bound: Vec<String> = self
            .keys
            .iter()
            .filter(|(_, e)| e.lease == Some(lease))
            .map(|(k, _)| k.clone())
            .collect();
        for key in bound {
            self.remove_key(&key);
        }
    }
}

/// In-process engine implementing the etcd-class contract: store-wide
/// revisions, TTL leases with automatic key expiry, prefix watches.
///
/// Backs the embedded single-node deployment and the test suite. Must be
/// created inside a tokio runtime: construction spawns the lease sweeper.
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Mutex<Shared>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(Shared::default()));
        spawn_sweeper(Arc::downgrade(&shared));
        Self { shared }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        // a poisoned store mutex is unrecoverable for the whole engine
        self.shared.lock().expect("memory engine state poisoned")
    }
}

fn spawn_sweeper(shared: Weak<Mutex<Shared>>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            let mut state = shared.lock().expect("memory engine state poisoned");
            state.expire_leases(Instant::now());
        }
    });
}

#[async_trait]
impl KvEngine for MemoryEngine {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let state = self.lock();
        Ok(state.keys.get(key).map(|e| KeyValue {
            key: key.to_string(),
            value: e.value.clone(),
            mod_revision: e.mod_revision,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let state = self.lock();
        Ok(state
            .keys
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                mod_revision: e.mod_revision,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<i64> {
        let mut state = self.lock();
        Ok(state.insert_key(key, value, None))
    }

    async fn put_with_lease(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> Result<i64> {
        let mut state = self.lock();
        if !state.leases.contains_key(&lease.0) {
            return Err(CronbeatError::NotFound(lease.to_string()));
        }
        Ok(state.insert_key(key, value, Some(lease)))
    }

    async fn cas_put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: i64,
        lease: Option<LeaseId>,
    ) -> Result<i64> {
        let mut state = self.lock();
        let current = state.keys.get(key).map(|e| e.mod_revision);
        let matches = match current {
            None => expected_revision == NO_PRIOR_REVISION,
            Some(rev) => expected_revision == rev,
        };
        if !matches {
            return Err(CronbeatError::CasConflict(key.to_string()));
        }
        if let Some(lease) = lease {
            if !state.leases.contains_key(&lease.0) {
                return Err(CronbeatError::NotFound(lease.to_string()));
            }
        }
        Ok(state.insert_key(key, value, lease))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.lock();
        Ok(state.remove_key(key))
    }

    async fn lease_grant(&self, ttl_secs: i64) -> Result<LeaseId> {
        let mut state = self.lock();
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            Lease {
                deadline: Instant::now() + Duration::from_secs(ttl_secs.max(0) as u64),
            },
        );
        Ok(LeaseId(id))
    }

    async fn lease_revoke(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.lock();
        if state.leases.remove(&lease.0).is_none() {
            return Err(CronbeatError::NotFound(lease.to_string()));
        }
        state.drop_bound_keys(lease);
        Ok(())
    }

    fn watch_prefix(&self, prefix: &str) -> mpsc::UnboundedReceiver<WatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        rx
    }
}
