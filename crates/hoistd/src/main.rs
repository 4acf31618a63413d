//! hoistd — the hoist daemon.
//!
//! One binary, two roles:
//! - `hoistd server` — reservation monitor + matching API over the job
//!   index; registers with the scheduling authority as a stack.
//! - `hoistd worker` — poll loop that claims matching jobs and drives
//!   the external agent binary.
//!
//! # Usage
//!
//! ```text
//! hoistd server --agent-token $TOKEN --queues default,deploy
//! hoistd worker --agent-token $TOKEN --query-rules queue=default,arch=amd64
//! ```

use clap::{Parser, Subcommand};

mod server;
mod worker;

#[derive(Parser)]
#[command(name = "hoistd", about = "hoist — capability-keyed CI job distribution", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler: reservation monitor plus matching API.
    Server(server::ServerArgs),
    /// Run a worker polling the matching API.
    Worker(worker::WorkerArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hoistd=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Server(args) => server::run(args).await,
        Command::Worker(args) => worker::run(args).await,
    }
}
