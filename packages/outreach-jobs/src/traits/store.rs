//! Persistence trait for jobs, work items and task handles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ExternalStatus, ItemOutcome, Job, JobId, JobState, NewJob, ProgressDelta, TaskHandle,
    WorkItem, WorkItemId,
};

/// Extra changes applied to a job inside a successful compare-and-swap.
pub type JobMutator = Box<dyn FnOnce(&mut Job) + Send>;

/// Result of recording a worker outcome against a work item.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeApplied {
    /// Item moved to a terminal state; job counters were incremented.
    Applied { job: Job, item: WorkItem },
    /// Item was already terminal; nothing changed.
    Duplicate { job: Job, item: WorkItem },
}

impl OutcomeApplied {
    pub fn job(&self) -> &Job {
        match self {
            OutcomeApplied::Applied { job, .. } | OutcomeApplied::Duplicate { job, .. } => job,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, OutcomeApplied::Duplicate { .. })
    }
}

/// Durable record of jobs and their work items.
///
/// All mutation of one job is serialized by the store: state changes go
/// through [`JobStore::compare_and_swap_state`], counter changes through
/// [`JobStore::increment_progress`] or [`JobStore::apply_item_outcome`].
/// Different jobs never contend with each other.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a pending job with one queued work item per URL.
    async fn create(&self, new_job: NewJob) -> Result<Job>;

    /// Fetch a job. Fails with `JobNotFound` if unknown.
    async fn get(&self, job_id: JobId) -> Result<Job>;

    /// Move a job from `expected` to `new`, running `mutator` on it in the
    /// same critical section.
    ///
    /// Fails with `Conflict` if the persisted state is no longer `expected`.
    async fn compare_and_swap_state(
        &self,
        job_id: JobId,
        expected: JobState,
        new: JobState,
        mutator: JobMutator,
    ) -> Result<Job>;

    /// Add to the job's completed/failed counters.
    ///
    /// Fails with `ProgressOverflow` rather than break
    /// `completed + failed <= total`.
    async fn increment_progress(&self, job_id: JobId, delta: ProgressDelta) -> Result<Job>;

    /// Resolve a work item and bump the job counters atomically.
    ///
    /// Items already in Done or Error are left untouched and reported as
    /// [`OutcomeApplied::Duplicate`].
    async fn apply_item_outcome(
        &self,
        job_id: JobId,
        item_id: WorkItemId,
        outcome: &ItemOutcome,
    ) -> Result<OutcomeApplied>;

    /// All work items of a job, in creation order.
    async fn work_items(&self, job_id: JobId) -> Result<Vec<WorkItem>>;

    async fn work_item(&self, job_id: JobId, item_id: WorkItemId) -> Result<WorkItem>;

    /// Move the given Queued items to InProgress. Other states are left alone.
    async fn mark_items_in_progress(&self, job_id: JobId, item_ids: &[WorkItemId]) -> Result<()>;

    async fn save_task_handle(&self, handle: TaskHandle) -> Result<()>;

    async fn find_task_handle(&self, external_task_id: &str) -> Result<Option<TaskHandle>>;

    /// Handles of a job, oldest dispatch first.
    async fn task_handles_for_job(&self, job_id: JobId) -> Result<Vec<TaskHandle>>;

    /// Remember what the worker pool last said about a task.
    async fn record_poll(
        &self,
        external_task_id: &str,
        status: ExternalStatus,
        polled_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Note that the task was cancelled from our side.
    async fn mark_task_cancelled(&self, external_task_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn jobs_in_state(&self, state: JobState) -> Result<Vec<Job>>;
}
