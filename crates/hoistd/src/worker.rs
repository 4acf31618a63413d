//! The `hoistd worker` command: one poll loop, one agent at a time.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use hoist_worker::{ApiClient, Runner, RunnerConfig};

#[derive(clap::Args)]
pub struct WorkerArgs {
    /// Matching API base URL.
    #[arg(long, env = "HOIST_API_SERVER", default_value = "http://localhost:18888")]
    pub api_server: String,

    /// Capability rules used for job matching (comma-separated).
    #[arg(long, env = "HOIST_QUERY_RULES", default_value = "queue=default", value_delimiter = ',')]
    pub query_rules: Vec<String>,

    /// Additional agent tags, metadata only (comma-separated).
    #[arg(long, env = "HOIST_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Queue name; claimed as a synthetic `queue=<name>` rule and passed
    /// to the agent.
    #[arg(long, env = "HOIST_QUEUE")]
    pub queue: Option<String>,

    /// Path to the agent binary.
    #[arg(long, env = "HOIST_AGENT_PATH", default_value = "/usr/local/bin/hoist-agent")]
    pub agent_path: String,

    /// Token passed through to the agent.
    #[arg(long, env = "HOIST_AGENT_TOKEN")]
    pub agent_token: String,

    /// Poll interval in seconds.
    #[arg(long, env = "HOIST_POLL_INTERVAL_SECS", default_value = "2")]
    pub poll_interval_secs: u64,

    /// Grace period for an in-flight job at shutdown, in seconds.
    #[arg(long, env = "HOIST_GRACE_PERIOD_SECS", default_value = "10")]
    pub grace_period_secs: u64,
}

pub async fn run(args: WorkerArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        !args.query_rules.is_empty(),
        "at least one query rule is required"
    );

    let worker_id = uuid::Uuid::new_v4().to_string();
    info!(
        %worker_id,
        api_server = %args.api_server,
        query_rules = ?args.query_rules,
        tags = ?args.tags,
        queue = ?args.queue,
        agent_path = %args.agent_path,
        "hoist worker starting"
    );

    let client = ApiClient::new(&args.api_server, &worker_id)?;
    let runner = Runner::new(
        client,
        RunnerConfig {
            query_rules: args.query_rules,
            tags: args.tags,
            queue: args.queue,
            agent_path: args.agent_path,
            agent_token: args.agent_token,
            poll_interval: Duration::from_secs(args.poll_interval_secs),
        },
        &worker_id,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        runner.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // An in-flight agent invocation is waited for, never killed; past
    // the grace period we proceed anyway.
    if tokio::time::timeout(Duration::from_secs(args.grace_period_secs), handle)
        .await
        .is_err()
    {
        warn!("worker did not stop within grace period");
    }

    info!("hoist worker stopped");
    Ok(())
}
