//! redb table definitions for the job index.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized
//! records). Expiry stamps live inside the values; expired entries are
//! treated as absent on read and removed lazily.

use redb::TableDefinition;

/// FIFO queue records keyed by normalized capability key.
pub const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Per-job metadata records keyed by job id.
pub const JOB_META: TableDefinition<&str, &[u8]> = TableDefinition::new("job");
