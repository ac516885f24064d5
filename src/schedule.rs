//! Per-job cron timers.
//!
//! Each registered job gets its own timer task; a trigger spawns the run
//! on its own task, so a long-running or sleeping run never delays other
//! jobs' triggers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::exec::{JobRunner, RunContext};
use crate::job::Job;

pub struct CronScheduler {
    ctx: RunContext,
    timers: Mutex<HashMap<i64, CancellationToken>>,
    /// While set, triggers are skipped (node switch turned off).
    suspended: Arc<AtomicBool>,
    root: CancellationToken,
}

impl CronScheduler {
    pub fn new(ctx: RunContext, suspended: Arc<AtomicBool>) -> Self {
        Self {
            ctx,
            timers: Mutex::new(HashMap::new()),
            suspended,
            root: CancellationToken::new(),
        }
    }

    /// Register or replace the timer for a job. Fails only when the cron
    /// expression does not parse.
    pub fn schedule(&self, job: Arc<Job>) -> Result<()> {
        let schedule = job.schedule()?;
        let token = self.root.child_token();

        let previous = self
            .timers
            .lock()
            .expect("timer map poisoned")
            .insert(job.id, token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let ctx = self.ctx.clone();
        let suspended = self.suspended.clone();
        tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    tracing::info!(job_id = job.id, "schedule has no upcoming occurrence");
                    break;
                };
                let wait = (next - Utc::now())
                    .to_std()
                    .unwrap_or(Duration::from_secs(0));
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                if suspended.load(Ordering::Relaxed) {
                    tracing::debug!(job_id = job.id, "node suspended, skipping trigger");
                    continue;
                }
                let runner = JobRunner::new(job.clone(), ctx.clone());
                tokio::spawn(async move { runner.run_scheduled().await });
            }
        });
        Ok(())
    }

    /// Cancel the timer for a removed job.
    pub fn unschedule(&self, job_id: i64) {
        if let Some(token) = self
            .timers
            .lock()
            .expect("timer map poisoned")
            .remove(&job_id)
        {
            token.cancel();
            tracing::info!(job_id, "job unscheduled");
        }
    }

    pub fn len(&self) -> usize {
        self.timers.lock().expect("timer map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer; running jobs finish on their own tasks.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.timers.lock().expect("timer map poisoned").clear();
    }
}
