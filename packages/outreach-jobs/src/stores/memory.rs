//! In-memory job store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{JobError, Result};
use crate::traits::store::{JobMutator, JobStore, OutcomeApplied};
use crate::types::{
    ExternalStatus, ItemOutcome, ItemState, Job, JobId, JobState, NewJob, ProgressDelta,
    TaskHandle, WorkItem, WorkItemId,
};

/// A job together with its work items; guarded as one unit.
struct JobEntry {
    job: Job,
    items: Vec<WorkItem>,
}

impl JobEntry {
    fn item_mut(&mut self, item_id: WorkItemId) -> Result<&mut WorkItem> {
        let job_id = self.job.id;
        self.items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or(JobError::WorkItemNotFound { job_id, item_id })
    }
}

/// In-memory storage for jobs, work items and task handles.
///
/// Each job sits behind its own mutex. The outer map lock is held only long
/// enough to find or insert an entry, so work on different jobs never
/// serializes. Data is lost on restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobEntry>>>>,
    handles: RwLock<HashMap<String, TaskHandle>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn entry(&self, job_id: JobId) -> Result<Arc<Mutex<JobEntry>>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
            .ok_or(JobError::JobNotFound(job_id))
    }

    fn lock(entry: &Mutex<JobEntry>) -> MutexGuard<'_, JobEntry> {
        entry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job> {
        let job = Job::builder()
            .name(new_job.name)
            .total_items(new_job.urls.len() as i64)
            .build();
        let items = new_job
            .urls
            .into_iter()
            .map(|url| WorkItem::queued(job.id, url))
            .collect();

        self.jobs.write().unwrap_or_else(|e| e.into_inner()).insert(
            job.id,
            Arc::new(Mutex::new(JobEntry {
                job: job.clone(),
                items,
            })),
        );

        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Job> {
        let entry = self.entry(job_id)?;
        let guard = Self::lock(&entry);
        Ok(guard.job.clone())
    }

    async fn compare_and_swap_state(
        &self,
        job_id: JobId,
        expected: JobState,
        new: JobState,
        mutator: JobMutator,
    ) -> Result<Job> {
        let entry = self.entry(job_id)?;
        let mut guard = Self::lock(&entry);

        if guard.job.state != expected {
            return Err(JobError::Conflict {
                job_id,
                expected,
                actual: guard.job.state,
            });
        }

        // Mutate a copy so a panicking mutator cannot leave a half-applied job.
        let mut job = guard.job.clone();
        mutator(&mut job);
        job.id = job_id;
        job.state = new;
        job.updated_at = Utc::now();
        guard.job = job.clone();

        Ok(job)
    }

    async fn increment_progress(&self, job_id: JobId, delta: ProgressDelta) -> Result<Job> {
        let entry = self.entry(job_id)?;
        let mut guard = Self::lock(&entry);
        guard.job.record_progress(delta)?;
        Ok(guard.job.clone())
    }

    async fn apply_item_outcome(
        &self,
        job_id: JobId,
        item_id: WorkItemId,
        outcome: &ItemOutcome,
    ) -> Result<OutcomeApplied> {
        let entry = self.entry(job_id)?;
        let mut guard = Self::lock(&entry);

        let item = guard.item_mut(item_id)?;
        if item.is_terminal() {
            let item = item.clone();
            return Ok(OutcomeApplied::Duplicate {
                job: guard.job.clone(),
                item,
            });
        }

        // Check the counters before touching the item so a refusal leaves both untouched.
        let mut job = guard.job.clone();
        job.record_progress(outcome.progress())?;

        let item = guard.item_mut(item_id)?;
        item.resolve(outcome);
        let item = item.clone();
        guard.job = job.clone();

        Ok(OutcomeApplied::Applied { job, item })
    }

    async fn work_items(&self, job_id: JobId) -> Result<Vec<WorkItem>> {
        let entry = self.entry(job_id)?;
        let guard = Self::lock(&entry);
        Ok(guard.items.clone())
    }

    async fn work_item(&self, job_id: JobId, item_id: WorkItemId) -> Result<WorkItem> {
        let entry = self.entry(job_id)?;
        let mut guard = Self::lock(&entry);
        let item = guard.item_mut(item_id)?.clone();
        Ok(item)
    }

    async fn mark_items_in_progress(&self, job_id: JobId, item_ids: &[WorkItemId]) -> Result<()> {
        let entry = self.entry(job_id)?;
        let mut guard = Self::lock(&entry);
        let now = Utc::now();

        for item in guard
            .items
            .iter_mut()
            .filter(|item| item.item_state == ItemState::Queued && item_ids.contains(&item.id))
        {
            item.item_state = ItemState::InProgress;
            item.updated_at = now;
        }

        Ok(())
    }

    async fn save_task_handle(&self, handle: TaskHandle) -> Result<()> {
        // Handles only make sense for known jobs.
        self.entry(handle.job_id)?;
        self.handles
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle.external_task_id.clone(), handle);
        Ok(())
    }

    async fn find_task_handle(&self, external_task_id: &str) -> Result<Option<TaskHandle>> {
        Ok(self
            .handles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(external_task_id)
            .cloned())
    }

    async fn task_handles_for_job(&self, job_id: JobId) -> Result<Vec<TaskHandle>> {
        let mut handles: Vec<TaskHandle> = self
            .handles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|handle| handle.job_id == job_id)
            .cloned()
            .collect();
        handles.sort_by_key(|handle| handle.dispatched_at);
        Ok(handles)
    }

    async fn record_poll(
        &self,
        external_task_id: &str,
        status: ExternalStatus,
        polled_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut handles = self.handles.write().unwrap_or_else(|e| e.into_inner());
        let handle = handles
            .get_mut(external_task_id)
            .ok_or_else(|| JobError::TaskNotFound(external_task_id.to_string()))?;
        handle.last_polled_at = Some(polled_at);
        handle.last_known_external_status = Some(status);
        Ok(())
    }

    async fn mark_task_cancelled(&self, external_task_id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut handles = self.handles.write().unwrap_or_else(|e| e.into_inner());
        let handle = handles
            .get_mut(external_task_id)
            .ok_or_else(|| JobError::TaskNotFound(external_task_id.to_string()))?;
        handle.cancelled_at.get_or_insert(at);
        Ok(())
    }

    async fn jobs_in_state(&self, state: JobState) -> Result<Vec<Job>> {
        let entries: Vec<Arc<Mutex<JobEntry>>> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut jobs: Vec<Job> = entries
            .iter()
            .map(|entry| Self::lock(entry).job.clone())
            .filter(|job| job.state == state)
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}
