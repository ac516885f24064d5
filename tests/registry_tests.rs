use std::sync::Arc;

use tokio_stream::StreamExt;

use cronbeat::config::StoreConfig;
use cronbeat::error::CronbeatError;
use cronbeat::job::{AssignStatus, HttpMethod, Job, JobKind, NotifyChannel};
use cronbeat::registry::{JobRegistry, RegistryChange};
use cronbeat::store::{Coordinator, MemoryEngine};

fn coordinator() -> Coordinator {
    Coordinator::connected(StoreConfig::default(), Arc::new(MemoryEngine::new()))
}

fn command_job(id: i64, command: &str) -> Job {
    Job {
        id,
        name: format!("job-{id}"),
        command: command.to_string(),
        timeout: 0,
        retry_times: 0,
        retry_interval: 0,
        kind: JobKind::Command,
        http_method: HttpMethod::Get,
        notify_channel: NotifyChannel::Mail,
        status: AssignStatus::Assigned,
        notify_to: vec![],
        spec: "* * * * *".to_string(),
        run_on: "node-a".to_string(),
        hostname: String::new(),
        ip: String::new(),
        argv: vec![],
    }
}

async fn put_job(coord: &Coordinator, job: &Job) {
    let key = coord.keyspace().job(&job.run_on, job.id);
    coord
        .put(&key, serde_json::to_vec(job).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn snapshot_round_trip_pre_tokenizes_commands() {
    let coord = coordinator();
    put_job(&coord, &command_job(1, r#"sh -c "echo hi""#)).await;

    let registry = JobRegistry::new(coord.clone(), "node-a");
    let count = registry.load_snapshot().await.unwrap();
    assert_eq!(count, 1);

    let job = registry.get(1).unwrap();
    assert_eq!(job.argv, vec!["sh", "-c", "echo hi"]);
}

#[tokio::test]
async fn snapshot_skips_bad_entries_without_aborting() {
    let coord = coordinator();
    put_job(&coord, &command_job(1, "echo ok")).await;

    // not JSON at all
    let garbled = coord.keyspace().job("node-a", 2);
    coord.put(&garbled, b"{not json".to_vec()).await.unwrap();

    // deserializes but fails validation
    let mut invalid = command_job(3, "echo nope");
    invalid.name = "   ".to_string();
    put_job(&coord, &invalid).await;

    let registry = JobRegistry::new(coord.clone(), "node-a");
    let count = registry.load_snapshot().await.unwrap();
    assert_eq!(count, 1);
    assert!(registry.get(1).is_some());
    assert!(registry.get(2).is_none());
    assert!(registry.get(3).is_none());
}

#[tokio::test]
async fn snapshot_replaces_previous_state() {
    let coord = coordinator();
    put_job(&coord, &command_job(1, "echo one")).await;

    let registry = JobRegistry::new(coord.clone(), "node-a");
    registry.load_snapshot().await.unwrap();
    assert_eq!(registry.len(), 1);

    let key = coord.keyspace().job("node-a", 1);
    coord.delete(&key).await.unwrap();
    put_job(&coord, &command_job(2, "echo two")).await;

    registry.load_snapshot().await.unwrap();
    assert!(registry.get(1).is_none());
    assert!(registry.get(2).is_some());
}

#[tokio::test]
async fn watch_events_upsert_and_remove() {
    let coord = coordinator();
    let registry = JobRegistry::new(coord.clone(), "node-a");
    let mut events = registry.watch().unwrap();

    put_job(&coord, &command_job(5, "echo watched")).await;
    let event = events.next().await.unwrap();
    match registry.apply(&event) {
        Some(RegistryChange::Upserted(job)) => assert_eq!(job.id, 5),
        other => panic!("expected upsert, got {other:?}"),
    }
    assert!(registry.get(5).is_some());

    let key = coord.keyspace().job("node-a", 5);
    coord.delete(&key).await.unwrap();
    let event = events.next().await.unwrap();
    match registry.apply(&event) {
        Some(RegistryChange::Removed(id)) => assert_eq!(id, 5),
        other => panic!("expected removal, got {other:?}"),
    }
    assert!(registry.get(5).is_none());
}

#[tokio::test]
async fn bad_put_keeps_the_prior_entry() {
    let coord = coordinator();
    let registry = JobRegistry::new(coord.clone(), "node-a");
    let mut events = registry.watch().unwrap();

    put_job(&coord, &command_job(9, "echo good")).await;
    let event = events.next().await.unwrap();
    assert!(registry.apply(&event).is_some());

    let key = coord.keyspace().job("node-a", 9);
    coord.put(&key, b"###".to_vec()).await.unwrap();
    let event = events.next().await.unwrap();
    assert!(registry.apply(&event).is_none());

    let kept = registry.get(9).unwrap();
    assert_eq!(kept.command, "echo good");
}

#[tokio::test]
async fn resolve_run_returns_job_and_revision() {
    let coord = coordinator();
    put_job(&coord, &command_job(4, "uptime -p")).await;

    let registry = JobRegistry::new(coord.clone(), "node-a");
    let (job, revision) = registry.resolve_run(4).await.unwrap();
    assert_eq!(job.id, 4);
    assert_eq!(job.argv, vec!["uptime", "-p"]);
    assert!(revision > 0);

    let err = registry.resolve_run(999).await.unwrap_err();
    assert!(matches!(err, CronbeatError::NotFound(_)));
}
