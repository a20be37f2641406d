//! REST client for the background worker pool.
//!
//! ```text
//! POST   {base}/tasks        DispatchBatch        -> 202 { "task_id": "..." }
//! GET    {base}/tasks/{id}                        -> ExternalTaskReport
//! DELETE {base}/tasks/{id}                        -> 2xx
//! ```
//!
//! 429 and 503 mean the pool is saturated, other 4xx mean the request will
//! never be accepted, and anything else is treated as the pool being
//! unreachable.

use std::time::Duration;

use async_trait::async_trait;
use outreach_jobs::{
    DispatchBatch, ExternalTaskReport, WorkerPool, WorkerPoolError, WorkerPoolResult,
};
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: String,
}

pub struct HttpWorkerPool {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpWorkerPool {
    pub fn new(base_url: impl Into<String>, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> WorkerPoolResult<reqwest::Response> {
        request.send().await.map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> WorkerPoolError {
    WorkerPoolError::Unreachable(err.to_string())
}

/// Map a non-success response to a pool error.
async fn status_error(response: reqwest::Response, task_id: Option<&str>) -> WorkerPoolError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    classify(status, body, task_id)
}

fn classify(status: StatusCode, body: String, task_id: Option<&str>) -> WorkerPoolError {
    match (status, task_id) {
        (StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE, _) => {
            WorkerPoolError::Saturated
        }
        (StatusCode::NOT_FOUND, Some(id)) => WorkerPoolError::UnknownTask(id.to_string()),
        (s, _) if s.is_client_error() => {
            WorkerPoolError::Rejected(format!("{}: {}", s.as_u16(), body))
        }
        (s, _) => WorkerPoolError::Unreachable(format!("{}: {}", s.as_u16(), body)),
    }
}

#[async_trait]
impl WorkerPool for HttpWorkerPool {
    async fn submit(&self, batch: &DispatchBatch) -> WorkerPoolResult<String> {
        let response = self
            .send(self.request(reqwest::Method::POST, "/tasks").json(batch))
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response, None).await);
        }

        let body: SubmitResponse = response.json().await.map_err(transport_error)?;
        tracing::debug!(job_id = %batch.job_id, task_id = %body.task_id, "worker pool accepted batch");
        Ok(body.task_id)
    }

    async fn cancel(&self, external_task_id: &str) -> WorkerPoolResult<()> {
        let path = format!("/tasks/{external_task_id}");
        let response = self.send(self.request(reqwest::Method::DELETE, &path)).await?;

        if !response.status().is_success() {
            return Err(status_error(response, Some(external_task_id)).await);
        }
        Ok(())
    }

    async fn poll(&self, external_task_id: &str) -> WorkerPoolResult<ExternalTaskReport> {
        let path = format!("/tasks/{external_task_id}");
        let response = self.send(self.request(reqwest::Method::GET, &path)).await?;

        if !response.status().is_success() {
            return Err(status_error(response, Some(external_task_id)).await);
        }

        response.json().await.map_err(transport_error)
    }
}
