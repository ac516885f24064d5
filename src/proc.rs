//! Lease-backed heartbeat tracking for in-flight runs.
//!
//! A running execution is visible as a key under the node's run prefix.
//! The key is bound to a TTL lease, so it disappears on its own within
//! one TTL after a crash, and immediately on graceful completion.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::Result;
use crate::store::{Coordinator, WatchEvent};

/// Value stored under a run's heartbeat key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcState {
    #[serde(rename = "time")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub killed: bool,
}

/// Heartbeat registration for exactly one run.
///
/// `start`/`stop` are idempotent under concurrent calls: an atomic
/// Idle/Running flag admits each transition once. The store I/O mutex is
/// held across the `start` put and re-taken by `stop`, so a delete can
/// never be overtaken by a put still in flight; a delete issued first
/// would be overwritten, leaving a zombie key until TTL expiry.
/// If `stop` wins the flag race before `start` reaches the put, the key
/// lives at most one TTL; the bounded staleness window is accepted.
pub struct RunTracker {
    coord: Coordinator,
    key: String,
    state: ProcState,
    ttl_secs: i64,
    running: AtomicBool,
    io: tokio::sync::Mutex<()>,
}

impl RunTracker {
    pub fn new(
        coord: Coordinator,
        node_uuid: &str,
        job_id: i64,
        run_id: i64,
        ttl_secs: i64,
    ) -> Self {
        let key = coord.keyspace().proc(node_uuid, job_id, run_id);
        Self {
            coord,
            key,
            state: ProcState {
                started_at: Utc::now(),
                killed: false,
            },
            ttl_secs,
            running: AtomicBool::new(false),
            io: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Register the run: writes the heartbeat value under a fresh lease.
    /// No-op if already running.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _io = self.io.lock().await;
        let payload = serde_json::to_vec(&self.state)?;
        self.coord
            .put_with_ttl(&self.key, payload, self.ttl_secs)
            .await?;
        Ok(())
    }

    /// Deregister the run. No-op if not running. Waits for an in-flight
    /// `start` put before deleting; a failed delete is only logged since
    /// the lease expires the key within one TTL anyway.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _io = self.io.lock().await;
        if let Err(err) = self.coord.delete(&self.key).await {
            tracing::warn!(key = %self.key, error = %err, "run heartbeat delete failed");
        }
    }
}

/// Change stream over every run key of a node. Operational visibility
/// only; execution does not depend on it.
pub fn watch_runs(coord: &Coordinator, node_uuid: &str) -> Result<UnboundedReceiverStream<WatchEvent>> {
    let prefix = coord.keyspace().proc_prefix(node_uuid);
    coord.watch_prefix(&prefix)
}
