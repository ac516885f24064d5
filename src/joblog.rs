use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Partial record inserted when a run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub name: String,
    pub job_id: i64,
    pub command: String,
    pub ip: String,
    pub hostname: String,
    pub node_uuid: String,
    pub spec: String,
    pub start_time: DateTime<Utc>,
}

impl JobLogEntry {
    pub fn for_run(job: &Job, start_time: DateTime<Utc>) -> Self {
        Self {
            name: job.name.clone(),
            job_id: job.id,
            command: job.command.clone(),
            ip: job.ip.clone(),
            hostname: job.hostname.clone(),
            node_uuid: job.run_on.clone(),
            spec: job.spec.clone(),
            start_time,
        }
    }
}

/// Terminal-outcome fields patched onto an existing entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogPatch {
    /// Retries consumed before the terminal outcome.
    pub retry_times: i32,
    pub success: bool,
    /// Captured output on success, error text on failure.
    pub output: String,
    pub end_time: DateTime<Utc>,
}
