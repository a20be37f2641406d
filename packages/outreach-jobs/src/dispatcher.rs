//! Hands work items to the worker pool.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::config::DispatchConfig;
use crate::error::{JobError, Result, WorkerPoolError};
use crate::traits::store::JobStore;
use crate::traits::worker::{DispatchBatch, WorkerPool};
use crate::types::{Job, JobId, TaskHandle, WorkItem};

/// Submits a job's unresolved work items to the worker pool and keeps the
/// resulting [`TaskHandle`]s. Never waits for the work itself.
#[derive(Clone)]
pub struct TaskDispatcher {
    store: Arc<dyn JobStore>,
    pool: Arc<dyn WorkerPool>,
    config: DispatchConfig,
}

impl TaskDispatcher {
    pub fn new(store: Arc<dyn JobStore>, pool: Arc<dyn WorkerPool>, config: DispatchConfig) -> Self {
        Self {
            store,
            pool,
            config,
        }
    }

    /// Submit every non-terminal work item of `job` as one task.
    ///
    /// Returns `None` without calling the pool when every item has already
    /// resolved.
    ///
    /// Items move to InProgress only once the pool has accepted them, so a
    /// refused dispatch leaves the job's items as they were.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn dispatch(&self, job: &Job) -> Result<Option<TaskHandle>> {
        let pending: Vec<WorkItem> = self
            .store
            .work_items(job.id)
            .await?
            .into_iter()
            .filter(|item| !item.is_terminal())
            .collect();

        if pending.is_empty() {
            debug!("no unresolved work items to dispatch");
            return Ok(None);
        }

        let batch = DispatchBatch::new(job.id, &pending);
        let external_task_id = self.submit(&batch).await?;

        let handle = TaskHandle::new(job.id, external_task_id, batch.work_item_ids());

        if let Err(e) = self.track(&handle).await {
            // The pool has the work but we cannot track it.
            self.cancel(&handle).await;
            return Err(e);
        }

        info!(
            external_task_id = %handle.external_task_id,
            items = batch.len(),
            "dispatched work items"
        );
        Ok(Some(handle))
    }

    async fn track(&self, handle: &TaskHandle) -> Result<()> {
        self.store
            .mark_items_in_progress(handle.job_id, &handle.work_item_ids)
            .await?;
        self.store.save_task_handle(handle.clone()).await
    }

    async fn submit(&self, batch: &DispatchBatch) -> Result<String> {
        let timeout = self.config.request_timeout;
        let error = match tokio::time::timeout(timeout, self.pool.submit(batch)).await {
            Ok(Ok(external_task_id)) => return Ok(external_task_id),
            Ok(Err(e)) => e,
            Err(_) => WorkerPoolError::Timeout(timeout),
        };

        warn!(job_id = %batch.job_id, error = %error, "worker pool refused dispatch");
        Err(match error {
            WorkerPoolError::Rejected(reason) => JobError::DispatchRejected {
                job_id: batch.job_id,
                reason,
            },
            other => JobError::DispatchUnavailable {
                job_id: batch.job_id,
                reason: other.to_string(),
            },
        })
    }

    /// Ask the pool to stop a task. Failures are logged, never returned.
    ///
    /// The handle is marked cancelled before the pool is asked, so a failure
    /// the pool reports for it afterwards is not taken as the items' outcome.
    pub async fn cancel(&self, handle: &TaskHandle) {
        if let Err(e) = self
            .store
            .mark_task_cancelled(&handle.external_task_id, Utc::now())
            .await
        {
            debug!(
                external_task_id = %handle.external_task_id,
                error = %e,
                "could not mark task cancelled"
            );
        }

        let timeout = self.config.request_timeout;
        let result = tokio::time::timeout(timeout, self.pool.cancel(&handle.external_task_id))
            .await
            .unwrap_or(Err(WorkerPoolError::Timeout(timeout)));

        match result {
            Ok(()) => debug!(
                job_id = %handle.job_id,
                external_task_id = %handle.external_task_id,
                "cancelled task"
            ),
            Err(e) => warn!(
                job_id = %handle.job_id,
                external_task_id = %handle.external_task_id,
                error = %e,
                "failed to cancel task"
            ),
        }
    }

    /// Cancel every handle of the job the pool may still be working on.
    ///
    /// Returns how many cancellations were attempted.
    pub async fn cancel_outstanding(&self, job_id: JobId) -> Result<usize> {
        let handles = self.store.task_handles_for_job(job_id).await?;
        let outstanding: Vec<&TaskHandle> =
            handles.iter().filter(|handle| handle.is_outstanding()).collect();

        for handle in &outstanding {
            self.cancel(handle).await;
        }
        Ok(outstanding.len())
    }
}
