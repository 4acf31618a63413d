//! Scheduling-authority client.
//!
//! Wire types and the [`Authority`] trait for the upstream protocol:
//! stack register/deregister, paginated scheduled-job listing, and batch
//! reservation. [`HttpAuthority`] is the production implementation.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from authority calls.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authority returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// A job the authority lists as scheduled and unclaimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub agent_query_rules: Vec<String>,
    pub priority: i64,
    pub scheduled_at: u64,
}

/// Queue state reported alongside a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInfo {
    pub key: String,
    pub paused: bool,
}

/// Cursor pagination state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: String,
}

/// Request for one page of the scheduled-job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListScheduledJobsRequest {
    pub stack_key: String,
    pub queue_key: String,
    pub page_size: u32,
    pub start_cursor: Option<String>,
}

/// One page of the scheduled-job listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListScheduledJobsResponse {
    pub jobs: Vec<ScheduledJob>,
    pub queue: QueueInfo,
    pub page_info: PageInfo,
}

/// Request to reserve a batch of jobs by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReserveRequest {
    pub stack_key: String,
    pub job_ids: Vec<String>,
    /// Upstream hold time; distinct from the local store TTL.
    pub reservation_expiry_secs: u64,
}

/// The subset of a batch the authority actually granted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReserveResponse {
    pub reserved: Vec<String>,
}

/// Request to register this scheduler as a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStackRequest {
    pub key: String,
    pub stack_type: String,
    pub queue_key: String,
    pub metadata: HashMap<String, String>,
}

/// Registration acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterStackResponse {
    pub key: String,
    pub queue_key: String,
}

/// The upstream scheduling authority, as consumed by the monitor.
pub trait Authority: Send + Sync {
    fn register_stack(
        &self,
        req: RegisterStackRequest,
    ) -> impl Future<Output = Result<RegisterStackResponse, AuthorityError>> + Send;

    fn deregister_stack(
        &self,
        stack_key: &str,
    ) -> impl Future<Output = Result<(), AuthorityError>> + Send;

    fn list_scheduled_jobs(
        &self,
        req: ListScheduledJobsRequest,
    ) -> impl Future<Output = Result<ListScheduledJobsResponse, AuthorityError>> + Send;

    fn batch_reserve(
        &self,
        req: BatchReserveRequest,
    ) -> impl Future<Output = Result<BatchReserveResponse, AuthorityError>> + Send;
}

/// HTTP implementation of the authority protocol.
#[derive(Clone)]
pub struct HttpAuthority {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpAuthority {
    /// Build a client for the authority at `base_url`, authenticating
    /// every call with the given agent token.
    pub fn new(base_url: &str, token: &str) -> Result<Self, AuthorityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, AuthorityError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(AuthorityError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl Authority for HttpAuthority {
    async fn register_stack(
        &self,
        req: RegisterStackRequest,
    ) -> Result<RegisterStackResponse, AuthorityError> {
        let resp = self
            .http
            .post(format!("{}/stacks", self.base_url))
            .bearer_auth(&self.token)
            .json(&req)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn deregister_stack(&self, stack_key: &str) -> Result<(), AuthorityError> {
        let resp = self
            .http
            .delete(format!("{}/stacks/{stack_key}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn list_scheduled_jobs(
        &self,
        req: ListScheduledJobsRequest,
    ) -> Result<ListScheduledJobsResponse, AuthorityError> {
        let mut query = vec![("page_size", req.page_size.to_string())];
        if let Some(cursor) = &req.start_cursor {
            query.push(("cursor", cursor.clone()));
        }
        let resp = self
            .http
            .get(format!(
                "{}/stacks/{}/queues/{}/scheduled-jobs",
                self.base_url, req.stack_key, req.queue_key
            ))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn batch_reserve(
        &self,
        req: BatchReserveRequest,
    ) -> Result<BatchReserveResponse, AuthorityError> {
        let resp = self
            .http
            .post(format!(
                "{}/stacks/{}/jobs/batch-reserve",
                self.base_url, req.stack_key
            ))
            .bearer_auth(&self.token)
            .json(&req)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}
