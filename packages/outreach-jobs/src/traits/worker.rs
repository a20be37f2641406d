//! The external worker pool that scrapes, generates and submits messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkerPoolResult;
use crate::types::{ExternalStatus, ItemOutcome, JobId, WorkItem, WorkItemId};

/// One unit of work handed to the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchItem {
    pub work_item_id: WorkItemId,
    pub url: String,
}

/// A batch of work items submitted as one external task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchBatch {
    pub job_id: JobId,
    pub items: Vec<DispatchItem>,
}

impl DispatchBatch {
    pub fn new(job_id: JobId, items: &[WorkItem]) -> Self {
        Self {
            job_id,
            items: items
                .iter()
                .map(|item| DispatchItem {
                    work_item_id: item.id,
                    url: item.url.clone(),
                })
                .collect(),
        }
    }

    pub fn work_item_ids(&self) -> Vec<WorkItemId> {
        self.items.iter().map(|item| item.work_item_id).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Per-item result inside a task report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalItemResult {
    pub work_item_id: WorkItemId,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// What the pool says about a task, either pushed to us or returned by a poll.
///
/// `results` is cumulative: a poll may repeat results already seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTaskReport {
    pub external_task_id: String,
    pub status: ExternalStatus,
    #[serde(default)]
    pub results: Vec<ExternalItemResult>,
    /// Task-level failure reason, when `status` is `failure`.
    #[serde(default)]
    pub error: Option<String>,
}

impl ExternalTaskReport {
    pub fn new(external_task_id: impl Into<String>, status: ExternalStatus) -> Self {
        Self {
            external_task_id: external_task_id.into(),
            status,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn with_result(mut self, work_item_id: WorkItemId, outcome: ItemOutcome) -> Self {
        self.results.push(ExternalItemResult {
            work_item_id,
            outcome,
        });
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Client for the decoupled background worker pool.
///
/// Calls must not block on the work itself: `submit` returns as soon as the
/// pool has accepted the batch.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    /// Submit a batch; returns the pool's task id.
    async fn submit(&self, batch: &DispatchBatch) -> WorkerPoolResult<String>;

    /// Ask the pool to stop a task. Best effort.
    async fn cancel(&self, external_task_id: &str) -> WorkerPoolResult<()>;

    /// Current status and results of a task.
    async fn poll(&self, external_task_id: &str) -> WorkerPoolResult<ExternalTaskReport>;
}
