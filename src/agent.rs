//! Node agent: wires the store client, registry, scheduler, and
//! dispatcher together and drives the watch loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::exec::{JobRunner, RunContext};
use crate::job::Job;
use crate::notify::Dispatcher;
use crate::persist::{Directory, JobLogRepo};
use crate::registry::{JobRegistry, RegistryChange};
use crate::schedule::CronScheduler;
use crate::store::{Coordinator, EventKind, Keyspace, KvEngine, WatchEvent};

pub struct NodeAgent {
    config: AgentConfig,
    coord: Coordinator,
    registry: Arc<JobRegistry>,
    scheduler: Arc<CronScheduler>,
    suspended: Arc<AtomicBool>,
    ctx: RunContext,
}

impl NodeAgent {
    pub fn new(
        config: AgentConfig,
        engine: Arc<dyn KvEngine>,
        logs: Arc<dyn JobLogRepo>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let coord = Coordinator::connected(config.store.clone(), engine);
        let registry = Arc::new(JobRegistry::new(coord.clone(), config.node.uuid.clone()));

        let (notifier, _notify_loop) = Dispatcher::new(&config.notify).spawn();
        let ctx = RunContext::new(
            coord.clone(),
            config.node.clone(),
            logs,
            directory,
            notifier,
            config.store.proc_ttl_secs,
            config.notify.webhook.kind.clone(),
        );

        let suspended = Arc::new(AtomicBool::new(false));
        let scheduler = Arc::new(CronScheduler::new(ctx.clone(), suspended.clone()));

        Self {
            config,
            coord,
            registry,
            scheduler,
            suspended,
            ctx,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Load the snapshot, schedule everything, then follow the watch
    /// streams until the shutdown token fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let count = self.registry.load_snapshot().await?;
        tracing::info!(
            node_uuid = %self.config.node.uuid,
            jobs = count,
            "job snapshot loaded"
        );
        for job in self.registry.jobs() {
            self.schedule_job(job);
        }

        let mut job_events = self.registry.watch()?;
        let mut once_events = self
            .coord
            .watch_prefix(&self.coord.keyspace().once_prefix())?;
        let switch_key = self.coord.keyspace().system_switch(&self.config.node.uuid);
        let mut switch_events = self.coord.watch_prefix(&switch_key)?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = job_events.next() => self.on_job_event(event),
                Some(event) = once_events.next() => self.on_once_event(event).await,
                Some(event) = switch_events.next() => self.on_switch_event(event),
                else => break,
            }
        }

        self.scheduler.shutdown();
        tracing::info!(node_uuid = %self.config.node.uuid, "agent stopped");
        Ok(())
    }

    fn schedule_job(&self, job: Arc<Job>) {
        if let Err(err) = self.scheduler.schedule(job.clone()) {
            tracing::warn!(job_id = job.id, error = %err, "failed to schedule job");
        }
    }

    fn on_job_event(&self, event: WatchEvent) {
        match self.registry.apply(&event) {
            Some(RegistryChange::Upserted(job)) => {
                tracing::info!(job_id = job.id, name = %job.name, "job assignment updated");
                self.schedule_job(job);
            }
            Some(RegistryChange::Removed(id)) => {
                tracing::info!(job_id = id, "job assignment removed");
                self.scheduler.unschedule(id);
            }
            None => {}
        }
    }

    /// A one-off marker names the node that must run the job right away,
    /// exactly once, through the recovery-guarded path.
    async fn on_once_event(&self, event: WatchEvent) {
        if event.kind != EventKind::Put {
            return;
        }
        let target = String::from_utf8_lossy(&event.value);
        if target != self.config.node.uuid.as_str() {
            return;
        }
        let job_id = Keyspace::job_id_from_key(&event.key);
        match self.registry.resolve_run(job_id).await {
            Ok((job, _revision)) => {
                tracing::info!(job_id, "one-off execution requested");
                let runner = JobRunner::new(Arc::new(job), self.ctx.clone());
                tokio::spawn(async move { runner.run_once().await });
                // the marker is consumed by the executing node
                if let Err(err) = self.coord.delete(&event.key).await {
                    tracing::warn!(key = %event.key, error = %err, "failed to clear one-off marker");
                }
            }
            Err(err) => {
                tracing::warn!(job_id, error = %err, "one-off marker names an unknown job");
            }
        }
    }

    fn on_switch_event(&self, event: WatchEvent) {
        let off = event.kind == EventKind::Put
            && matches!(
                String::from_utf8_lossy(&event.value).to_lowercase().as_str(),
                "false" | "0" | "off"
            );
        let was = self.suspended.swap(off, Ordering::Relaxed);
        if was != off {
            tracing::info!(suspended = off, "node switch changed");
        }
    }
}
