//! Job records and the status lifecycle.

use serde::{Deserialize, Serialize};

/// A CI job reserved from the upstream authority and held in the index
/// until a worker claims it.
///
/// Immutable after insertion; lifecycle state lives in the per-job
/// metadata record, not on the job body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique id assigned by the upstream authority.
    pub id: String,
    /// The upstream queue this job was listed under.
    pub queue_key: String,
    /// Unordered `key=value` capability rules the job requires.
    pub agent_query_rules: Vec<String>,
    /// Upstream priority. Informational only — ordering is FIFO per key.
    pub priority: i64,
    /// When the authority scheduled the job (epoch seconds).
    pub scheduled_at: u64,
    /// When this scheduler reserved the job upstream (epoch seconds).
    pub reserved_at: u64,
}

/// Lifecycle status of an indexed job.
///
/// Transitions are monotonic: reserved → claimed → complete. A status
/// never moves backwards; skipping forward is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Reserved upstream and queued locally, waiting for a worker.
    Reserved,
    /// Removed from its queue by a worker; execution in progress.
    Claimed,
    /// Terminal. The worker reported the job done.
    Complete,
}

impl JobStatus {
    /// Whether advancing to `next` preserves monotonicity.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self.rank() < next.rank()
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Reserved => 0,
            JobStatus::Claimed => 1,
            JobStatus::Complete => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Reserved => "reserved",
            JobStatus::Claimed => "claimed",
            JobStatus::Complete => "complete",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
