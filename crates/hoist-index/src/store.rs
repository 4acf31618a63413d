//! JobIndex — redb-backed job queues and metadata.
//!
//! Queue records hold the FIFO sequence of jobs for one capability key;
//! metadata records track each job's lifecycle independently. Both carry
//! an expiry stamp (milliseconds) rewritten on every insert, so active
//! queues stay alive while idle ones age out. The store supports both
//! on-disk and in-memory backends (the latter for testing).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use hoist_core::{epoch_millis, normalize_query_rules, Job, JobStatus};

use crate::error::{IndexError, IndexResult};
use crate::tables::{JOB_META, QUEUES};

/// Convert any `Display` error into an `IndexError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| IndexError::$variant(e.to_string())
    };
}

/// Queue lifetime with no intervening inserts.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// The FIFO sequence stored per capability key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueRecord {
    jobs: Vec<Job>,
    expires_at_ms: u64,
}

/// Per-job lifecycle record, independent of its queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// The upstream queue the job was listed under.
    pub queue_key: String,
    /// Normalized capability key the job was indexed under.
    pub query_rules: String,
    /// When the job was reserved upstream (epoch seconds).
    pub reserved_at: u64,
    /// Lifecycle status; transitions are monotonic.
    pub status: JobStatus,
    /// Expiry stamp (epoch milliseconds).
    pub expires_at_ms: u64,
}

/// Thread-safe job index backed by redb.
#[derive(Clone)]
pub struct JobIndex {
    db: Arc<Database>,
    ttl: Duration,
}

impl JobIndex {
    /// Open (or create) a persistent index at the given path with the
    /// default TTL.
    pub fn open(path: &Path) -> IndexResult<Self> {
        Self::open_with_ttl(path, DEFAULT_TTL)
    }

    /// Open (or create) a persistent index with an explicit TTL.
    pub fn open_with_ttl(path: &Path, ttl: Duration) -> IndexResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let index = Self {
            db: Arc::new(db),
            ttl,
        };
        index.ensure_tables()?;
        debug!(?path, ttl_secs = ttl.as_secs(), "job index opened");
        Ok(index)
    }

    /// Create an ephemeral in-memory index (for testing).
    pub fn open_in_memory() -> IndexResult<Self> {
        Self::open_in_memory_with_ttl(DEFAULT_TTL)
    }

    /// Create an ephemeral in-memory index with an explicit TTL.
    pub fn open_in_memory_with_ttl(ttl: Duration) -> IndexResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let index = Self {
            db: Arc::new(db),
            ttl,
        };
        index.ensure_tables()?;
        debug!("in-memory job index opened");
        Ok(index)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> IndexResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(QUEUES).map_err(map_err!(Table))?;
        txn.open_table(JOB_META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Append a job to the tail of its capability key's queue and write
    /// its metadata with status `reserved`.
    ///
    /// Refreshes the TTL on both the queue and the metadata — inserts
    /// keep active queues alive.
    pub fn insert(&self, job: &Job) -> IndexResult<()> {
        let key = normalize_query_rules(&job.agent_query_rules);
        let now = epoch_millis();
        let expires_at_ms = now + self.ttl.as_millis() as u64;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut queues = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let mut record = match queues.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    let record: QueueRecord =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    // An expired queue restarts empty rather than reviving stale jobs.
                    if record.expires_at_ms > now {
                        record
                    } else {
                        QueueRecord::default()
                    }
                }
                None => QueueRecord::default(),
            };
            record.jobs.push(job.clone());
            record.expires_at_ms = expires_at_ms;
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            queues
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        {
            let mut meta = txn.open_table(JOB_META).map_err(map_err!(Table))?;
            let record = JobMetadata {
                queue_key: job.queue_key.clone(),
                query_rules: key.clone(),
                reserved_at: job.reserved_at,
                status: JobStatus::Reserved,
                expires_at_ms,
            };
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            meta.insert(job.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %job.id, %key, "job indexed");
        Ok(())
    }

    /// Atomically remove and return the head job for the given capability
    /// set, marking its metadata claimed.
    ///
    /// Returns `Ok(None)` when the key has no live queue or the queue is
    /// empty — that is an ordinary outcome, not an error. The pop and the
    /// queue rewrite happen in one write transaction; redb serializes
    /// writers, so one queued job goes to exactly one concurrent claimer.
    pub fn claim(&self, rules: &[String]) -> IndexResult<Option<Job>> {
        let key = normalize_query_rules(rules);
        let now = epoch_millis();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed: Option<Job>;
        {
            let mut queues = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let record: Option<QueueRecord> =
                match queues.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            claimed = match record {
                Some(mut record) if record.expires_at_ms > now && !record.jobs.is_empty() => {
                    let job = record.jobs.remove(0);
                    if record.jobs.is_empty() {
                        queues.remove(key.as_str()).map_err(map_err!(Write))?;
                    } else {
                        let value =
                            serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                        queues
                            .insert(key.as_str(), value.as_slice())
                            .map_err(map_err!(Write))?;
                    }
                    Some(job)
                }
                Some(_) => {
                    // Expired or drained record: drop it.
                    queues.remove(key.as_str()).map_err(map_err!(Write))?;
                    None
                }
                None => None,
            };
        }
        if let Some(job) = &claimed {
            let mut meta = txn.open_table(JOB_META).map_err(map_err!(Table))?;
            let record: Option<JobMetadata> =
                match meta.get(job.id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
            // Metadata expires independently of the queue; a missing record
            // just means the status update has nowhere to land.
            if let Some(mut record) = record {
                if record.expires_at_ms > now
                    && record.status.can_transition_to(JobStatus::Claimed)
                {
                    record.status = JobStatus::Claimed;
                    let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                    meta.insert(job.id.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.id, %key, "job claimed");
        }
        Ok(claimed)
    }

    /// Advance a job's metadata status to `complete`.
    ///
    /// A no-op, error-free, when the metadata has already expired or the
    /// status is already terminal.
    pub fn complete(&self, job_id: &str) -> IndexResult<()> {
        let now = epoch_millis();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta = txn.open_table(JOB_META).map_err(map_err!(Table))?;
            let record: Option<JobMetadata> = match meta.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match record {
                None => {}
                Some(record) if record.expires_at_ms <= now => {
                    meta.remove(job_id).map_err(map_err!(Write))?;
                }
                Some(mut record) => {
                    if record.status.can_transition_to(JobStatus::Complete) {
                        record.status = JobStatus::Complete;
                        let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                        meta.insert(job_id, value.as_slice())
                            .map_err(map_err!(Write))?;
                        debug!(%job_id, "job completed");
                    }
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Fetch a job's metadata record, treating expired records as absent.
    pub fn metadata(&self, job_id: &str) -> IndexResult<Option<JobMetadata>> {
        let now = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let meta = txn.open_table(JOB_META).map_err(map_err!(Table))?;
        match meta.get(job_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: JobMetadata =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok((record.expires_at_ms > now).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Advisory snapshot of live queue lengths, keyed by capability key.
    ///
    /// Not transactionally consistent with concurrent claims or inserts;
    /// expired queues are excluded.
    pub fn stats(&self) -> IndexResult<BTreeMap<String, u64>> {
        let now = epoch_millis();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let queues = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        let mut lengths = BTreeMap::new();
        for entry in queues.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let record: QueueRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if record.expires_at_ms > now && !record.jobs.is_empty() {
                lengths.insert(key.value().to_string(), record.jobs.len() as u64);
            }
        }
        Ok(lengths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job(id: &str, rules: &[&str]) -> Job {
        Job {
            id: id.to_string(),
            queue_key: "default".to_string(),
            agent_query_rules: rules.iter().map(|s| s.to_string()).collect(),
            priority: 0,
            scheduled_at: 1000,
            reserved_at: 1010,
        }
    }

    fn rules(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    // ── Claim semantics ────────────────────────────────────────────

    #[test]
    fn insert_then_claim_is_fifo() {
        let index = JobIndex::open_in_memory().unwrap();
        index
            .insert(&test_job("a", &["queue=default", "arch=amd64"]))
            .unwrap();
        index
            .insert(&test_job("b", &["arch=amd64", "queue=default"]))
            .unwrap();

        let first = index.claim(&rules(&["queue=default", "arch=amd64"])).unwrap();
        let second = index.claim(&rules(&["arch=amd64", "queue=default"])).unwrap();

        assert_eq!(first.unwrap().id, "a");
        assert_eq!(second.unwrap().id, "b");
        assert!(index.claim(&rules(&["queue=default", "arch=amd64"])).unwrap().is_none());
    }

    #[test]
    fn claim_unknown_key_returns_none() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();

        let got = index.claim(&rules(&["nonexistent=rule"])).unwrap();
        assert!(got.is_none());
        // The populated queue is untouched.
        assert_eq!(index.stats().unwrap().get("queue=default"), Some(&1));
    }

    #[test]
    fn claim_with_empty_rules_uses_empty_key() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("bare", &[])).unwrap();

        let got = index.claim(&[]).unwrap();
        assert_eq!(got.unwrap().id, "bare");
    }

    #[test]
    fn concurrent_claims_deliver_at_most_once() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("only", &["queue=default"])).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let index = index.clone();
            handles.push(std::thread::spawn(move || {
                index.claim(&rules(&["queue=default"])).unwrap()
            }));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn claimed_jobs_are_never_redelivered() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();

        assert!(index.claim(&rules(&["queue=default"])).unwrap().is_some());
        assert!(index.claim(&rules(&["queue=default"])).unwrap().is_none());
    }

    // ── Metadata lifecycle ─────────────────────────────────────────

    #[test]
    fn insert_writes_reserved_metadata() {
        let index = JobIndex::open_in_memory().unwrap();
        index
            .insert(&test_job("a", &["b=2", "a=1"]))
            .unwrap();

        let meta = index.metadata("a").unwrap().unwrap();
        assert_eq!(meta.status, JobStatus::Reserved);
        assert_eq!(meta.query_rules, "a=1,b=2");
        assert_eq!(meta.queue_key, "default");
        assert_eq!(meta.reserved_at, 1010);
    }

    #[test]
    fn claim_and_complete_advance_status() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();

        index.claim(&rules(&["queue=default"])).unwrap().unwrap();
        assert_eq!(index.metadata("a").unwrap().unwrap().status, JobStatus::Claimed);

        index.complete("a").unwrap();
        assert_eq!(index.metadata("a").unwrap().unwrap().status, JobStatus::Complete);
    }

    #[test]
    fn complete_is_idempotent_and_never_regresses() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();
        index.claim(&rules(&["queue=default"])).unwrap().unwrap();

        index.complete("a").unwrap();
        index.complete("a").unwrap();
        assert_eq!(index.metadata("a").unwrap().unwrap().status, JobStatus::Complete);
    }

    #[test]
    fn complete_unknown_job_is_noop() {
        let index = JobIndex::open_in_memory().unwrap();
        index.complete("never-seen").unwrap();
        assert!(index.metadata("never-seen").unwrap().is_none());
    }

    // ── TTL ────────────────────────────────────────────────────────

    #[test]
    fn expired_queue_yields_no_job() {
        let index = JobIndex::open_in_memory_with_ttl(Duration::from_millis(50)).unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();

        std::thread::sleep(Duration::from_millis(120));

        assert!(index.claim(&rules(&["queue=default"])).unwrap().is_none());
        assert!(index.stats().unwrap().is_empty());
    }

    #[test]
    fn insert_refreshes_queue_ttl() {
        let index = JobIndex::open_in_memory_with_ttl(Duration::from_millis(300)).unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();

        // Past half the TTL, a second insert pushes expiry out again.
        std::thread::sleep(Duration::from_millis(200));
        index.insert(&test_job("b", &["queue=default"])).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let got = index.claim(&rules(&["queue=default"])).unwrap();
        assert_eq!(got.unwrap().id, "a");
    }

    #[test]
    fn complete_after_expiry_is_noop() {
        let index = JobIndex::open_in_memory_with_ttl(Duration::from_millis(50)).unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();

        std::thread::sleep(Duration::from_millis(120));

        index.complete("a").unwrap();
        assert!(index.metadata("a").unwrap().is_none());
    }

    // ── Stats ──────────────────────────────────────────────────────

    #[test]
    fn stats_tracks_inserts_minus_claims() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();
        index.insert(&test_job("b", &["queue=default"])).unwrap();
        index.insert(&test_job("c", &["arch=arm64"])).unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.get("queue=default"), Some(&2));
        assert_eq!(stats.get("arch=arm64"), Some(&1));
        assert_eq!(stats.values().sum::<u64>(), 3);

        index.claim(&rules(&["queue=default"])).unwrap().unwrap();
        let stats = index.stats().unwrap();
        assert_eq!(stats.get("queue=default"), Some(&1));
        assert_eq!(stats.values().sum::<u64>(), 2);
    }

    #[test]
    fn stats_omits_drained_queues() {
        let index = JobIndex::open_in_memory().unwrap();
        index.insert(&test_job("a", &["queue=default"])).unwrap();
        index.claim(&rules(&["queue=default"])).unwrap().unwrap();

        assert!(index.stats().unwrap().is_empty());
    }

    // ── Persistence ────────────────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let index = JobIndex::open(&db_path).unwrap();
            index.insert(&test_job("a", &["queue=default"])).unwrap();
        }

        let index = JobIndex::open(&db_path).unwrap();
        let got = index.claim(&rules(&["queue=default"])).unwrap();
        assert_eq!(got.unwrap().id, "a");
    }
}
