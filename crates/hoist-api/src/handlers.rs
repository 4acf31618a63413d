//! Matching API handlers.
//!
//! Each handler validates its input, then reads/writes via `JobIndex`
//! and returns JSON responses.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use tracing::{debug, error};

use crate::ApiState;

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(serde_json::json!({ "error": msg })),
    )
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Query string for a claim request.
#[derive(serde::Deserialize)]
pub struct ClaimParams {
    /// Comma-separated `key=value` rules.
    pub query: Option<String>,
}

/// GET /jobs?query=<comma-separated key=value rules>
///
/// Claims the oldest job indexed under the normalized form of the given
/// rules. 200 with the job body on a hit, 204 when nothing matches,
/// 400 when the query is missing or has no non-empty rule.
pub async fn claim_job(
    State(state): State<ApiState>,
    Query(params): Query<ClaimParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(query) = params.query else {
        return error_response("query parameter is required", StatusCode::BAD_REQUEST)
            .into_response();
    };

    let rules: Vec<String> = query
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    if rules.is_empty() {
        return error_response("query parameter is required", StatusCode::BAD_REQUEST)
            .into_response();
    }

    let worker_id = headers
        .get("x-worker-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    debug!(?rules, %worker_id, "claiming job");

    match state.index.claim(&rules) {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, "error claiming job");
            error_response("internal server error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

/// POST /jobs/{id}/complete
pub async fn complete_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if id.trim().is_empty() {
        return error_response("job id is required", StatusCode::BAD_REQUEST).into_response();
    }

    match state.index.complete(&id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            error!(error = %e, job_id = %id, "error completing job");
            error_response("internal server error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}

/// Body of a stats response.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct StatsResponse {
    /// Live queue length per capability key.
    pub queues: BTreeMap<String, u64>,
    /// Sum of all queue lengths.
    pub total: u64,
}

/// GET /stats
///
/// Advisory snapshot; not transactionally consistent with concurrent
/// claims and inserts.
pub async fn stats(State(state): State<ApiState>) -> impl IntoResponse {
    match state.index.stats() {
        Ok(queues) => {
            let total = queues.values().sum();
            Json(StatsResponse { queues, total }).into_response()
        }
        Err(e) => {
            error!(error = %e, "error getting stats");
            error_response("internal server error", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response()
        }
    }
}
