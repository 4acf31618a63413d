//! HTTP client for the matching API.

use std::time::Duration;

use reqwest::StatusCode;

use hoist_core::{normalize_query_rules, Job};

use crate::error::WorkerError;

/// Client for the matching API, tagged with this worker's id.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    worker_id: String,
}

impl ApiClient {
    /// Build a client for the API server at `base_url`.
    pub fn new(base_url: &str, worker_id: &str) -> Result<Self, WorkerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.to_string(),
        })
    }

    /// Claim the oldest job matching the given capability rules.
    ///
    /// `Ok(None)` means no job was available this tick.
    pub async fn claim_job(&self, rules: &[String]) -> Result<Option<Job>, WorkerError> {
        let query = normalize_query_rules(rules);
        let resp = self
            .http
            .get(format!("{}/jobs", self.base_url))
            .query(&[("query", query.as_str())])
            .header("X-Worker-ID", &self.worker_id)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NO_CONTENT {
            Ok(None)
        } else if status.is_success() {
            Ok(Some(resp.json().await?))
        } else {
            Err(WorkerError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }

    /// Report a claimed job as finished.
    pub async fn complete_job(&self, job_id: &str) -> Result<(), WorkerError> {
        let resp = self
            .http
            .post(format!("{}/jobs/{job_id}/complete", self.base_url))
            .header("X-Worker-ID", &self.worker_id)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WorkerError::Status {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }
}
