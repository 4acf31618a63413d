//! The `hoistd server` command: job index + reservation monitor +
//! matching API in one process.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use hoist_index::JobIndex;
use hoist_monitor::authority::RegisterStackRequest;
use hoist_monitor::{Authority, HttpAuthority, Monitor};

#[derive(clap::Args)]
pub struct ServerArgs {
    /// Agent token for the scheduling authority.
    #[arg(long, env = "HOIST_AGENT_TOKEN")]
    pub agent_token: String,

    /// Base URL of the scheduling authority.
    #[arg(long, env = "HOIST_AUTHORITY_URL", default_value = "http://localhost:9400")]
    pub authority_url: String,

    /// Unique stack key to register under.
    #[arg(long, env = "HOIST_STACK_KEY", default_value = "hoist-scheduler")]
    pub stack_key: String,

    /// Queue keys to monitor (comma-separated).
    #[arg(long, env = "HOIST_QUEUES", default_value = "default", value_delimiter = ',')]
    pub queues: Vec<String>,

    /// Data directory for the job index.
    #[arg(long, env = "HOIST_DATA_DIR", default_value = "/var/lib/hoist")]
    pub data_dir: PathBuf,

    /// HTTP listen port for the matching API.
    #[arg(long, env = "HOIST_PORT", default_value = "18888")]
    pub port: u16,

    /// Monitor poll interval in seconds.
    #[arg(long, env = "HOIST_POLL_INTERVAL_SECS", default_value = "1")]
    pub poll_interval_secs: u64,

    /// Grace period for background tasks at shutdown, in seconds.
    #[arg(long, env = "HOIST_GRACE_PERIOD_SECS", default_value = "10")]
    pub grace_period_secs: u64,
}

pub async fn run(args: ServerArgs) -> anyhow::Result<()> {
    anyhow::ensure!(!args.queues.is_empty(), "at least one queue is required");

    info!(
        stack_key = %args.stack_key,
        queues = ?args.queues,
        authority = %args.authority_url,
        "hoist server starting"
    );

    // The index failing to open is the one fatal startup error.
    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = args.data_dir.join("hoist.redb");
    let index = JobIndex::open(&db_path)?;
    info!(path = ?db_path, "job index opened");

    let authority = HttpAuthority::new(&args.authority_url, &args.agent_token)?;
    let stack = authority
        .register_stack(RegisterStackRequest {
            key: args.stack_key.clone(),
            stack_type: "custom".to_string(),
            queue_key: args.queues[0].clone(),
            metadata: HashMap::from([
                ("version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
                ("type".to_string(), "hoist-scheduler".to_string()),
            ]),
        })
        .await?;
    info!(key = %stack.key, queue = %stack.queue_key, "registered stack");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Reservation monitor ────────────────────────────────────

    let monitor = Monitor::new(
        authority.clone(),
        args.stack_key.clone(),
        args.queues.clone(),
        index.clone(),
        Duration::from_secs(args.poll_interval_secs),
    );
    let monitor_handle = tokio::spawn(async move {
        monitor.run(shutdown_rx).await;
    });

    // ── Matching API ───────────────────────────────────────────

    let router = hoist_api::build_router(index);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "matching API listening");

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Join the monitor, bounded by the grace period.
    if tokio::time::timeout(Duration::from_secs(args.grace_period_secs), monitor_handle)
        .await
        .is_err()
    {
        warn!("monitor did not stop within grace period");
    }

    info!(stack_key = %args.stack_key, "deregistering stack");
    if let Err(e) = authority.deregister_stack(&args.stack_key).await {
        error!(error = %e, "failed to deregister stack");
    }

    info!("hoist server stopped");
    Ok(())
}
