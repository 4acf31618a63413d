//! hoist-api — the matching API.
//!
//! Stateless axum handlers over the job index. Validation happens here,
//! before the store is touched; the handlers otherwise delegate directly
//! to index operations.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/health` | Liveness probe |
//! | GET | `/jobs?query=...` | Claim the oldest job matching the rules |
//! | POST | `/jobs/{id}/complete` | Report a claimed job finished |
//! | GET | `/stats` | Queue lengths per capability key |

pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use hoist_index::JobIndex;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub index: JobIndex,
}

/// Build the complete API router.
pub fn build_router(index: JobIndex) -> Router {
    let state = ApiState { index };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/jobs", get(handlers::claim_job))
        .route("/jobs/{id}/complete", post(handlers::complete_job))
        .route("/stats", get(handlers::stats))
        .with_state(state)
}
