//! The retrying execution state machine that turns one trigger into
//! handler attempts, log records, and failure notifications.

pub mod handler;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::NodeIdentity;
use crate::job::{Job, NotifyChannel};
use crate::joblog::{JobLogEntry, JobLogPatch};
use crate::notify::{Message, Notifier};
use crate::persist::{Directory, JobLogRepo, NodeRecord};
use crate::store::Coordinator;

pub use handler::{ExecutionResult, JobHandler, HTTP_EXEC_TIMEOUT};

/// Everything a run needs, injected once at agent construction and
/// cloned per run.
#[derive(Clone)]
pub struct RunContext {
    pub coord: Coordinator,
    pub node: NodeIdentity,
    pub logs: Arc<dyn JobLogRepo>,
    pub directory: Arc<dyn Directory>,
    pub notifier: Notifier,
    pub http: reqwest::Client,
    pub proc_ttl_secs: i64,
    /// Webhook payload kind; "feishu" changes recipient resolution.
    pub webhook_kind: String,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        coord: Coordinator,
        node: NodeIdentity,
        logs: Arc<dyn JobLogRepo>,
        directory: Arc<dyn Directory>,
        notifier: Notifier,
        proc_ttl_secs: i64,
        webhook_kind: impl Into<String>,
    ) -> Self {
        Self {
            coord,
            node,
            logs,
            directory,
            notifier,
            http: reqwest::Client::new(),
            proc_ttl_secs,
            webhook_kind: webhook_kind.into(),
        }
    }
}

/// One job bound to the context it executes in.
#[derive(Clone)]
pub struct JobRunner {
    job: Arc<Job>,
    ctx: RunContext,
}

impl JobRunner {
    pub fn new(job: Arc<Job>, ctx: RunContext) -> Self {
        Self { job, ctx }
    }

    /// Drive one scheduled trigger through the full attempt budget.
    ///
    /// Stops on the first success. Between failed attempts sleeps the
    /// configured retry interval, or a backoff growing by one minute per
    /// attempt when no interval is set. Exhausting the budget records a
    /// failure log entry and hands a notification to the dispatcher.
    pub async fn run_scheduled(&self) {
        let job = &self.job;
        tracing::info!(job_id = job.id, name = %job.name, command = %job.command, "job triggered");

        let started = Utc::now();
        let log_id = self.create_log(started).await;
        let attempts = job.attempts();
        let handler = JobHandler::for_job(job);

        let mut last = ExecutionResult::failure(String::new(), "not attempted");
        for attempt in 0..attempts {
            let result = handler.execute(job, &self.ctx).await;
            if result.is_success() {
                self.finish_log(log_id, result.output.clone(), attempt, true)
                    .await;
                return;
            }
            tracing::warn!(
                job_id = job.id,
                attempt,
                error = result.error.as_deref().unwrap_or(""),
                "job attempt failed"
            );
            last = result;

            if attempt + 1 < attempts {
                let delay = if job.retry_interval > 0 {
                    Duration::from_secs(job.retry_interval as u64)
                } else {
                    // growing backoff, one extra minute per attempt
                    Duration::from_secs(60 * (attempt as u64 + 1))
                };
                tokio::time::sleep(delay).await;
            }
        }

        let error_text = last.error.clone().unwrap_or_default();
        self.finish_log(log_id, error_text.clone(), attempts - 1, false)
            .await;
        self.notify_failure(
            format!("job [{}] execution failed", job.name),
            format!(
                "job[{}] run on node[{}] execute failed, retried {} times, output: {}, error: {}",
                job.id, job.run_on, job.retry_times, last.output, error_text
            ),
        )
        .await;
    }

    /// On-demand entry point: exactly one attempt, panic-isolated so a
    /// misbehaving handler can never take the scheduler down.
    pub async fn run_once(self) {
        let runner = self.clone();
        let attempt = tokio::spawn(async move { runner.attempt_once().await });
        if let Err(err) = attempt.await {
            if err.is_panic() {
                tracing::error!(job_id = self.job.id, error = %err, "panic running job");
            }
        }
    }

    async fn attempt_once(&self) {
        let job = &self.job;
        let started = Utc::now();
        let log_id = self.create_log(started).await;
        let handler = JobHandler::for_job(job);

        let result = handler.execute(job, &self.ctx).await;
        if result.is_success() {
            self.finish_log(log_id, result.output, 0, true).await;
            return;
        }

        let error_text = result.error.clone().unwrap_or_default();
        self.finish_log(log_id, error_text.clone(), 0, false).await;
        self.notify_failure(
            format!("job [{}] immediate execution failed", job.name),
            format!(
                "job[{}] run on node[{}] once execute failed, output: {}, error: {}",
                job.id, job.run_on, result.output, error_text
            ),
        )
        .await;
    }

    /// Log-record creation failure never blocks execution.
    async fn create_log(&self, started: DateTime<Utc>) -> Option<i64> {
        let mut entry = JobLogEntry::for_run(&self.job, started);
        // assignments don't always carry host details; the agent knows its own
        if entry.ip.is_empty() {
            entry.ip = self.ctx.node.ip.clone();
        }
        if entry.hostname.is_empty() {
            entry.hostname = self.ctx.node.hostname.clone();
        }
        match self.ctx.logs.insert(entry).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(
                    job_id = self.job.id,
                    node_uuid = %self.job.run_on,
                    error = %err,
                    "failed to create job log"
                );
                None
            }
        }
    }

    async fn finish_log(&self, log_id: Option<i64>, output: String, retried: i32, success: bool) {
        let Some(id) = log_id else { return };
        let patch = JobLogPatch {
            retry_times: retried,
            success,
            output,
            end_time: Utc::now(),
        };
        if let Err(err) = self.ctx.logs.update(id, patch).await {
            tracing::warn!(
                job_id = self.job.id,
                node_uuid = %self.job.run_on,
                error = %err,
                "failed to update job log"
            );
        }
    }

    /// Resolve recipients and submit the failure message. Recipients that
    /// fail to resolve are skipped; an empty recipient list still goes to
    /// the dispatcher, which drops it per channel policy.
    async fn notify_failure(&self, subject: String, body: String) {
        let job = &self.job;
        let node = match self.ctx.directory.node_record(&job.run_on).await {
            Ok(node) => node,
            Err(err) => {
                tracing::warn!(job_id = job.id, node_uuid = %job.run_on, error = %err, "failed to find node");
                NodeRecord {
                    uuid: job.run_on.clone(),
                    ip: String::new(),
                    pid: String::new(),
                }
            }
        };

        let mut to = Vec::new();
        for user_id in &job.notify_to {
            let Ok(user) = self.ctx.directory.user_contact(*user_id).await else {
                continue;
            };
            match job.notify_channel {
                NotifyChannel::Mail => to.push(user.email),
                NotifyChannel::Webhook if self.ctx.webhook_kind == "feishu" => {
                    to.push(user.username)
                }
                NotifyChannel::Webhook => {}
            }
        }

        let message = Message {
            channel: job.notify_channel,
            ip: format!("{}:{}", node.ip, node.pid),
            subject,
            body,
            to,
            occur_time: String::new(),
        };
        self.ctx.notifier.submit(message).await;
    }
}
