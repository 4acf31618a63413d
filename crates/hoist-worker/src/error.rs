//! Error types for the worker.

use thiserror::Error;

/// Errors from the worker's API calls and agent invocations.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("api server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to run agent: {0}")]
    Agent(#[from] std::io::Error),
}
