use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use cronbeat::agent::NodeAgent;
use cronbeat::config::{
    AgentConfig, MailConfig, NodeIdentity, NotifyConfig, StoreConfig, WebhookConfig,
};
use cronbeat::job::Job;
use cronbeat::persist::MemoryRepo;
use cronbeat::shutdown::shutdown_token;
use cronbeat::store::{Coordinator, MemoryEngine};

#[derive(Parser, Debug)]
#[command(name = "cronbeat")]
#[command(version)]
#[command(about = "Distributed cron node backed by a watchable key-value store")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run an execution node
    Node(NodeArgs),
}

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Stable node identity; generated when omitted
    #[arg(long)]
    node_uuid: Option<String>,

    /// Hostname reported in job logs and alerts
    #[arg(long, default_value = "")]
    hostname: String,

    /// IP reported in job logs and alerts
    #[arg(long, default_value = "")]
    ip: String,

    /// Namespace root for every coordination-store key
    #[arg(long, default_value = "/cronbeat")]
    namespace: String,

    /// JSON file with job definitions to seed into the embedded store
    #[arg(long)]
    jobs: Option<std::path::PathBuf>,

    /// TTL of run heartbeat keys, seconds
    #[arg(long, default_value = "60")]
    proc_ttl: i64,

    /// Per-request store deadline, seconds
    #[arg(long, default_value = "5")]
    request_timeout: u64,

    // === Mail channel ===
    #[arg(long, default_value = "")]
    smtp_host: String,

    #[arg(long, default_value = "0")]
    smtp_port: u16,

    #[arg(long, default_value = "")]
    smtp_from: String,

    #[arg(long, default_value = "")]
    smtp_secret: String,

    #[arg(long, default_value = "")]
    smtp_nickname: String,

    // === Webhook channel ===
    #[arg(long, default_value = "")]
    webhook_url: String,

    /// Payload shape; "feishu" renders the card template
    #[arg(long, default_value = "")]
    webhook_kind: String,
}

async fn run_node(args: NodeArgs) -> cronbeat::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let uuid = args
        .node_uuid
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let node = NodeIdentity::new(uuid).with_host(args.hostname, args.ip);

    let store = StoreConfig {
        namespace: args.namespace,
        request_timeout: Duration::from_secs(args.request_timeout),
        proc_ttl_secs: args.proc_ttl,
        ..StoreConfig::default()
    };
    let notify = NotifyConfig::new(
        MailConfig {
            host: args.smtp_host,
            port: args.smtp_port,
            from: args.smtp_from,
            secret: args.smtp_secret,
            nickname: args.smtp_nickname,
        },
        WebhookConfig {
            kind: args.webhook_kind,
            url: args.webhook_url,
        },
    );
    let config = AgentConfig::new(node).with_store(store).with_notify(notify);

    tracing::info!(
        node_uuid = %config.node.uuid,
        namespace = %config.store.namespace,
        "starting cronbeat node"
    );

    // embedded engine and repo; a networked store binding plugs in behind
    // the same traits
    let engine = Arc::new(MemoryEngine::new());
    let repo = Arc::new(MemoryRepo::new());

    if let Some(path) = args.jobs {
        seed_jobs(&config, engine.clone(), &path).await?;
    }

    let agent = NodeAgent::new(config, engine, repo.clone(), repo);
    agent.run(shutdown_token()).await
}

/// Mirror job definitions from a JSON file into the embedded store, the
/// way a control plane would write assignments.
async fn seed_jobs(
    config: &AgentConfig,
    engine: Arc<MemoryEngine>,
    path: &std::path::Path,
) -> cronbeat::error::Result<()> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| cronbeat::error::CronbeatError::NotFound(format!("{}: {err}", path.display())))?;
    let mut jobs: Vec<Job> = serde_json::from_str(&raw)?;

    let coord = Coordinator::connected(config.store.clone(), engine);
    for job in &mut jobs {
        if job.run_on.is_empty() {
            job.run_on = config.node.uuid.clone();
        }
        let key = coord.keyspace().job(&job.run_on, job.id);
        coord.put(&key, serde_json::to_vec(job)?).await?;
    }
    tracing::info!(count = jobs.len(), path = %path.display(), "seeded job definitions");
    Ok(())
}

#[tokio::main]
async fn main() -> cronbeat::error::Result<()> {
    let args = Args::parse();
    match args.command {
        Commands::Node(node_args) => run_node(node_args).await,
    }
}
