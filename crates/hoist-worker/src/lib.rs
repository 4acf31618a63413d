//! hoist-worker — the worker poll loop.
//!
//! A worker owns no persisted identity: it is just a capability set, a
//! poll interval, and an agent binary. Each tick it asks the matching
//! API for one job, runs the agent for it, and reports completion —
//! strictly one job in flight at a time.

pub mod client;
pub mod error;
pub mod runner;

pub use client::ApiClient;
pub use error::WorkerError;
pub use runner::{merge_tags, Runner, RunnerConfig};
