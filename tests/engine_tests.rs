use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::extract::{RawQuery, State};
use axum::routing::get;
use axum::Router;

use cronbeat::config::{NodeIdentity, NotifyConfig, StoreConfig};
use cronbeat::exec::{JobRunner, RunContext};
use cronbeat::job::{AssignStatus, HttpMethod, Job, JobKind, NotifyChannel};
use cronbeat::notify::Dispatcher;
use cronbeat::persist::MemoryRepo;
use cronbeat::store::{Coordinator, MemoryEngine};

fn run_context(repo: Arc<MemoryRepo>) -> RunContext {
    let coord = Coordinator::connected(StoreConfig::default(), Arc::new(MemoryEngine::new()));
    let (notifier, _delivery) = Dispatcher::new(&NotifyConfig::default()).spawn();
    RunContext::new(
        coord,
        NodeIdentity::new("node-a"),
        repo.clone(),
        repo,
        notifier,
        60,
        "",
    )
}

fn job(id: i64, kind: JobKind, command: &str) -> Job {
    let mut job = Job {
        id,
        name: format!("job-{id}"),
        command: command.to_string(),
        timeout: 0,
        retry_times: 0,
        // non-zero so validation leaves retry_times alone
        retry_interval: 1,
        kind,
        http_method: HttpMethod::Get,
        notify_channel: NotifyChannel::Mail,
        status: AssignStatus::Assigned,
        notify_to: vec![],
        spec: "* * * * *".to_string(),
        run_on: "node-a".to_string(),
        hostname: String::new(),
        ip: String::new(),
        argv: vec![],
    };
    job.check().unwrap();
    job
}

fn attempt_count(marker: &Path) -> usize {
    std::fs::read_to_string(marker)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn zero_retries_means_exactly_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let repo = Arc::new(MemoryRepo::new());

    let job = job(
        1,
        JobKind::Command,
        &format!("sh -c \"echo x >> {}; exit 1\"", marker.display()),
    );
    assert_eq!(job.attempts(), 1);

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    assert_eq!(attempt_count(&marker), 1);
    let logs = repo.logs();
    assert_eq!(logs.len(), 1);
    let patch = logs[0].patch.as_ref().unwrap();
    assert!(!patch.success);
    assert_eq!(patch.retry_times, 0);
}

#[tokio::test]
async fn failing_job_consumes_the_whole_attempt_budget() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let repo = Arc::new(MemoryRepo::new());

    let mut job = job(
        2,
        JobKind::Command,
        &format!("sh -c \"echo x >> {}; exit 1\"", marker.display()),
    );
    job.retry_times = 1;

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    assert_eq!(attempt_count(&marker), 2);
    let logs = repo.logs();
    let patch = logs[0].patch.as_ref().unwrap();
    assert!(!patch.success);
    assert_eq!(patch.retry_times, 1);
}

#[tokio::test]
async fn success_stops_further_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let repo = Arc::new(MemoryRepo::new());

    let mut job = job(
        3,
        JobKind::Command,
        &format!("sh -c \"echo x >> {}\"", marker.display()),
    );
    job.retry_times = 3;

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    assert_eq!(attempt_count(&marker), 1);
    let patch = repo.logs()[0].patch.clone().unwrap();
    assert!(patch.success);
    assert_eq!(patch.retry_times, 0);
}

#[tokio::test]
async fn success_after_retry_records_the_attempt_index() {
    let dir = tempfile::tempdir().unwrap();
    let flag = dir.path().join("ran-before");
    let repo = Arc::new(MemoryRepo::new());

    // first attempt plants the flag and fails, second succeeds
    let mut job = job(
        4,
        JobKind::Command,
        &format!(
            "sh -c \"test -f {flag} && exit 0 || (touch {flag}; exit 1)\"",
            flag = flag.display()
        ),
    );
    job.retry_times = 3;

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    let patch = repo.logs()[0].patch.clone().unwrap();
    assert!(patch.success);
    assert_eq!(patch.retry_times, 1);
}

#[tokio::test]
async fn run_once_performs_a_single_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let repo = Arc::new(MemoryRepo::new());

    let mut job = job(
        5,
        JobKind::Command,
        &format!("sh -c \"echo x >> {}; exit 3\"", marker.display()),
    );
    job.retry_times = 5;

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_once()
        .await;

    assert_eq!(attempt_count(&marker), 1);
    let patch = repo.logs()[0].patch.clone().unwrap();
    assert!(!patch.success);
}

#[tokio::test]
async fn failure_with_zero_resolvable_recipients_still_logs() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    // empty directory: neither users nor the node record resolve
    let repo = Arc::new(MemoryRepo::new());

    let mut job = job(
        6,
        JobKind::Command,
        &format!("sh -c \"echo x >> {}; exit 1\"", marker.display()),
    );
    job.notify_to = vec![10, 11];

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    let logs = repo.logs();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].patch.as_ref().unwrap().success);
}

// === HTTP handler ===

type Hits = Arc<Mutex<Vec<String>>>;

async fn record_get(State(hits): State<Hits>, RawQuery(query): RawQuery) -> &'static str {
    hits.lock().unwrap().push(format!("GET {}", query.unwrap_or_default()));
    "ok"
}

async fn record_post(State(hits): State<Hits>, body: String) -> &'static str {
    hits.lock().unwrap().push(format!("POST {body}"));
    "ok"
}

async fn always_failing() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::BAD_GATEWAY, "boom")
}

async fn serve_recording() -> (SocketAddr, Hits) {
    let hits: Hits = Arc::default();
    let app = Router::new()
        .route("/x", get(record_get).post(record_post))
        .route("/fail", get(always_failing))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

#[tokio::test]
async fn http_get_dispatches_exactly_one_request() {
    let (addr, hits) = serve_recording().await;
    let repo = Arc::new(MemoryRepo::new());

    let job = job(
        7,
        JobKind::Http,
        &format!("http://{addr}/x?y=1"),
    );
    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    assert_eq!(hits.lock().unwrap().as_slice(), ["GET y=1"]);
    let patch = repo.logs()[0].patch.clone().unwrap();
    assert!(patch.success);
    assert_eq!(patch.output, "ok");
}

#[tokio::test]
async fn http_post_splits_url_and_body_on_question_mark() {
    let (addr, hits) = serve_recording().await;
    let repo = Arc::new(MemoryRepo::new());

    let mut job = job(
        8,
        JobKind::Http,
        &format!("http://{addr}/x?bodypayload"),
    );
    job.http_method = HttpMethod::Post;

    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    assert_eq!(hits.lock().unwrap().as_slice(), ["POST bodypayload"]);
    assert!(repo.logs()[0].patch.as_ref().unwrap().success);
}

#[tokio::test]
async fn http_non_200_is_a_handler_failure() {
    let (addr, _hits) = serve_recording().await;
    let repo = Arc::new(MemoryRepo::new());

    let job = job(9, JobKind::Http, &format!("http://{addr}/fail"));
    JobRunner::new(Arc::new(job), run_context(repo.clone()))
        .run_scheduled()
        .await;

    let patch = repo.logs()[0].patch.clone().unwrap();
    assert!(!patch.success);
    assert!(patch.output.contains("502"));
}
