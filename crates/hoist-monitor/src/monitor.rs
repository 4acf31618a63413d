//! The reservation monitor loop.
//!
//! One tick walks every configured queue in sequence: page through the
//! authority's scheduled-job listing, batch-reserve each page, insert the
//! granted jobs into the index. A slow tick delays the next tick rather
//! than overlapping it, so no cursor or reservation state needs to
//! survive across ticks.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use hoist_core::{epoch_secs, Job};
use hoist_index::JobIndex;

use crate::authority::{
    Authority, AuthorityError, BatchReserveRequest, ListScheduledJobsRequest, ScheduledJob,
};

/// Listing page size requested from the authority.
const PAGE_SIZE: u32 = 50;

/// Upstream reservation hold, in seconds. Independent of the store TTL;
/// the two validity windows can diverge and the authority stays the
/// source of truth.
const RESERVATION_EXPIRY_SECS: u64 = 300;

/// Polls the authority and feeds granted jobs into the job index.
pub struct Monitor<A> {
    authority: A,
    stack_key: String,
    queues: Vec<String>,
    index: JobIndex,
    interval: Duration,
}

impl<A: Authority> Monitor<A> {
    /// Create a monitor for the given queues.
    pub fn new(
        authority: A,
        stack_key: String,
        queues: Vec<String>,
        index: JobIndex,
        interval: Duration,
    ) -> Self {
        Self {
            authority,
            stack_key,
            queues,
            index,
            interval,
        }
    }

    /// Run the poll loop until the shutdown signal fires.
    ///
    /// Queue errors are logged and isolated per tick; the loop itself
    /// only ends on shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queues = ?self.queues,
            interval_ms = self.interval.as_millis() as u64,
            "reservation monitor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("reservation monitor shutting down");
                    break;
                }
            }
        }
    }

    /// Process every configured queue once, sequentially.
    pub async fn tick(&self) {
        for queue_key in &self.queues {
            if let Err(e) = self.poll_queue(queue_key).await {
                error!(error = %e, queue = %queue_key, "error polling queue");
            }
        }
    }

    /// Page through one queue's listing, reserving as we go.
    ///
    /// Pagination restarts from scratch next tick; no cursor persists.
    async fn poll_queue(&self, queue_key: &str) -> Result<(), AuthorityError> {
        let mut cursor: Option<String> = None;
        let mut indexed = 0usize;

        loop {
            let resp = self
                .authority
                .list_scheduled_jobs(ListScheduledJobsRequest {
                    stack_key: self.stack_key.clone(),
                    queue_key: queue_key.to_string(),
                    page_size: PAGE_SIZE,
                    start_cursor: cursor.clone(),
                })
                .await?;

            if resp.queue.paused {
                info!(queue = %queue_key, "queue is paused, skipping");
                return Ok(());
            }

            if !resp.jobs.is_empty() {
                match self.reserve_page(queue_key, &resp.jobs).await {
                    Ok(count) => indexed += count,
                    Err(e) => error!(error = %e, queue = %queue_key, "error reserving jobs"),
                }
            }

            if !resp.page_info.has_next_page {
                break;
            }
            cursor = Some(resp.page_info.end_cursor);
        }

        if indexed > 0 {
            info!(count = indexed, queue = %queue_key, "indexed jobs");
        }
        Ok(())
    }

    /// Batch-reserve one page and insert whatever the authority granted.
    ///
    /// Returns the number of jobs inserted. Jobs listed but not granted
    /// lost a race to another actor and are dropped without comment; a
    /// failed insert is logged and does not abort its siblings.
    async fn reserve_page(
        &self,
        queue_key: &str,
        jobs: &[ScheduledJob],
    ) -> Result<usize, AuthorityError> {
        let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();

        let granted = self
            .authority
            .batch_reserve(BatchReserveRequest {
                stack_key: self.stack_key.clone(),
                job_ids,
                reservation_expiry_secs: RESERVATION_EXPIRY_SECS,
            })
            .await?;
        let granted_ids: HashSet<&String> = granted.reserved.iter().collect();

        let reserved_at = epoch_secs();
        let mut inserted = 0usize;
        for scheduled in jobs {
            if !granted_ids.contains(&scheduled.id) {
                continue;
            }

            let job = Job {
                id: scheduled.id.clone(),
                queue_key: queue_key.to_string(),
                agent_query_rules: scheduled.agent_query_rules.clone(),
                priority: scheduled.priority,
                scheduled_at: scheduled.scheduled_at,
                reserved_at,
            };

            if let Err(e) = self.index.insert(&job) {
                error!(error = %e, job_id = %scheduled.id, "error storing job");
                continue;
            }
            inserted += 1;
        }

        info!(
            reserved = granted.reserved.len(),
            listed = jobs.len(),
            queue = %queue_key,
            "reserved jobs"
        );
        Ok(inserted)
    }
}
