//! The worker's claim/execute/complete cycle.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info};

use hoist_core::Job;

use crate::client::ApiClient;
use crate::error::WorkerError;

/// Operator-supplied worker configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Capability rules used for job matching.
    pub query_rules: Vec<String>,
    /// Additional agent tags (metadata only, not used for matching).
    pub tags: Vec<String>,
    /// Queue name; emitted as a synthetic `queue=<name>` rule when set.
    pub queue: Option<String>,
    /// Path to the agent binary.
    pub agent_path: String,
    /// Token passed through to the agent.
    pub agent_token: String,
    /// Poll interval between claim attempts.
    pub poll_interval: Duration,
}

/// Polls the matching API and drives the external agent, one job at a
/// time.
pub struct Runner {
    client: ApiClient,
    config: RunnerConfig,
    worker_name: String,
}

impl Runner {
    /// Create a runner identified by the given locally generated id.
    pub fn new(client: ApiClient, config: RunnerConfig, worker_id: &str) -> Self {
        let short = worker_id.get(..8).unwrap_or(worker_id);
        Self {
            client,
            config,
            worker_name: format!("worker-{short}"),
        }
    }

    /// Run the poll loop until the shutdown signal fires.
    ///
    /// Strictly sequential: a slow cycle delays the next tick rather
    /// than overlapping it. Per-cycle errors are logged, never fatal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            query_rules = ?self.config.query_rules,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "worker started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.process_next().await {
                        Ok(true) => {}
                        Ok(false) => debug!("no job available"),
                        Err(e) => error!(error = %e, "error processing job"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("worker shutting down");
                    break;
                }
            }
        }
    }

    /// One cycle: claim, execute, complete. Returns whether a job was
    /// processed.
    pub async fn process_next(&self) -> Result<bool, WorkerError> {
        let Some(job) = self.client.claim_job(&self.claim_rules()).await? else {
            return Ok(false);
        };

        info!(
            job_id = %job.id,
            queue = %job.queue_key,
            rules = ?job.agent_query_rules,
            "claimed job"
        );

        match self.run_agent(&job).await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                // Terminal either way; completion is still reported.
                error!(job_id = %job.id, code = ?status.code(), "agent exited with failure");
            }
            Err(e) => {
                // The agent never ran; leave the job to its TTL.
                error!(error = %e, job_id = %job.id, "error running agent");
                return Err(e);
            }
        }

        if let Err(e) = self.client.complete_job(&job.id).await {
            error!(error = %e, job_id = %job.id, "error marking job complete");
        } else {
            info!(job_id = %job.id, "completed job");
        }
        Ok(true)
    }

    /// The capability set this worker claims with: the configured queue
    /// (as a synthetic rule) plus its query rules.
    fn claim_rules(&self) -> Vec<String> {
        let mut rules = Vec::with_capacity(self.config.query_rules.len() + 1);
        if let Some(queue) = &self.config.queue {
            rules.push(format!("queue={queue}"));
        }
        rules.extend(self.config.query_rules.iter().cloned());
        rules
    }

    /// Invoke the agent for one claimed job and wait for it to exit.
    ///
    /// Combined stdout/stderr is forwarded to logging, line-prefixed
    /// with the job id's short form.
    async fn run_agent(&self, job: &Job) -> Result<std::process::ExitStatus, WorkerError> {
        let tags = merge_tags(&self.config.query_rules, &self.config.tags);
        let short_id = job.id.get(..8).unwrap_or(&job.id).to_string();

        let mut cmd = Command::new(&self.config.agent_path);
        cmd.arg("start")
            .args(["--acquire-job", &job.id])
            .args(["--token", &self.config.agent_token])
            .args(["--tags", &tags])
            .args(["--name", &self.worker_name]);
        if let Some(queue) = &self.config.queue {
            cmd.args(["--queue", queue]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            job_id = %job.id,
            tags = %tags,
            name = %self.worker_name,
            "starting agent"
        );
        let mut child = cmd.spawn()?;

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(forward_output(out, short_id.clone())));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(forward_output(err, short_id.clone())));

        let status = child.wait().await?;
        if let Some(task) = stdout {
            let _ = task.await;
        }
        if let Some(task) = stderr {
            let _ = task.await;
        }
        Ok(status)
    }
}

/// Forward agent output to logging, one prefixed line at a time.
async fn forward_output<R: AsyncRead + Unpin>(reader: R, prefix: String) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.is_empty() {
            info!("[{prefix}] {line}");
        }
    }
}

/// Combine capability rules and metadata tags into the agent's
/// comma-separated tag string.
///
/// For the `queue` key the last value wins and is emitted once, so later
/// sources (extra tags) override earlier ones (query rules). All other
/// tags pass through verbatim, duplicates allowed; entries without a
/// `key=value` shape are dropped.
///
/// Example: `["queue=default", "arch=amd64", "queue=production"]` →
/// `"arch=amd64,queue=production"`.
pub fn merge_tags(rules: &[String], tags: &[String]) -> String {
    let mut merged = Vec::new();
    let mut last_queue: Option<&str> = None;

    for tag in rules.iter().chain(tags.iter()) {
        let Some((key, value)) = tag.split_once('=') else {
            continue;
        };
        if key == "queue" {
            last_queue = Some(value);
        } else {
            merged.push(tag.clone());
        }
    }

    if let Some(queue) = last_queue {
        if !queue.is_empty() {
            merged.push(format!("queue={queue}"));
        }
    }

    merged.join(",")
}
