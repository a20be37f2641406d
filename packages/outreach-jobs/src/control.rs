//! Control surface for jobs: create, start, pause, resume, stop, inspect.
//!
//! Every state change is authorized by the [`JobStateMachine`]; dispatching
//! and cancelling happen only after the transition has been persisted.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::bridge::StatusBridge;
use crate::config::ControlConfig;
use crate::dispatcher::TaskDispatcher;
use crate::error::{JobError, Result};
use crate::machine::JobStateMachine;
use crate::progress::ProgressAggregator;
use crate::traits::store::JobStore;
use crate::traits::worker::WorkerPool;
use crate::types::{Job, JobEvent, JobId, JobSnapshot, JobState, NewJob, WorkItem};

#[derive(Clone)]
pub struct ControlApi {
    store: Arc<dyn JobStore>,
    machine: JobStateMachine,
    dispatcher: TaskDispatcher,
    aggregator: ProgressAggregator,
    bridge: StatusBridge,
    config: ControlConfig,
}

impl ControlApi {
    pub fn new(store: Arc<dyn JobStore>, pool: Arc<dyn WorkerPool>, config: ControlConfig) -> Self {
        let aggregator = ProgressAggregator::new(store.clone(), config.max_conflict_retries);
        Self {
            machine: JobStateMachine::new(store.clone()),
            dispatcher: TaskDispatcher::new(store.clone(), pool.clone(), config.dispatch.clone()),
            bridge: StatusBridge::new(
                store.clone(),
                pool,
                aggregator.clone(),
                config.dispatch.clone(),
            ),
            aggregator,
            store,
            config,
        }
    }

    /// Bridge for worker pool reports (webhook and polling).
    pub fn bridge(&self) -> &StatusBridge {
        &self.bridge
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Register an uploaded target list as a pending job.
    pub async fn create(&self, new_job: NewJob) -> Result<JobSnapshot> {
        let job = self.store.create(new_job).await?;
        info!(job_id = %job.id, total_items = job.total_items, "job created");
        Ok(job.snapshot())
    }

    #[instrument(skip(self))]
    pub async fn start(&self, job_id: JobId) -> Result<JobSnapshot> {
        let job = self
            .machine
            .request_transition(job_id, JobEvent::Start)
            .await?
            .into_job();
        Ok(self.launch(job, JobState::Pending).await?.snapshot())
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, job_id: JobId) -> Result<JobSnapshot> {
        let job = self
            .machine
            .request_transition(job_id, JobEvent::Pause)
            .await?
            .into_job();
        self.cancel_outstanding(job_id).await;
        Ok(job.snapshot())
    }

    #[instrument(skip(self))]
    pub async fn resume(&self, job_id: JobId) -> Result<JobSnapshot> {
        let job = self
            .machine
            .request_transition(job_id, JobEvent::Resume)
            .await?
            .into_job();
        Ok(self.launch(job, JobState::Paused).await?.snapshot())
    }

    /// Fail the job at once and signal the pool. Results that arrive later
    /// are recorded on their items but never revive the job.
    #[instrument(skip(self))]
    pub async fn stop(&self, job_id: JobId) -> Result<JobSnapshot> {
        let job = self
            .machine
            .request_transition(job_id, JobEvent::Stop)
            .await?
            .into_job();
        self.cancel_outstanding(job_id).await;
        Ok(job.snapshot())
    }

    pub async fn get_status(&self, job_id: JobId) -> Result<JobSnapshot> {
        Ok(self.store.get(job_id).await?.snapshot())
    }

    pub async fn work_items(&self, job_id: JobId) -> Result<Vec<WorkItem>> {
        self.store.work_items(job_id).await
    }

    /// Dispatch the unresolved items of a job that just became Running.
    ///
    /// `back_to` is the state the job returns to if the pool cannot take the
    /// work right now.
    pub(crate) async fn launch(&self, job: Job, back_to: JobState) -> Result<Job> {
        if job.is_fully_resolved() {
            return Ok(self.aggregator.settle(&job).await?.unwrap_or(job));
        }

        match self.dispatcher.dispatch(&job).await {
            Ok(Some(handle)) => {
                let current = self.store.get(job.id).await?;
                if current.state != JobState::Running {
                    // Paused or stopped while we were submitting.
                    self.dispatcher.cancel(&handle).await;
                }
                Ok(current)
            }
            Ok(None) => {
                // The last items resolved after the transition was read.
                let current = self.store.get(job.id).await?;
                Ok(self.aggregator.settle(&current).await?.unwrap_or(current))
            }
            Err(err @ JobError::DispatchUnavailable { .. }) => {
                let rollback = JobEvent::DispatchDeferred { back_to };
                if let Err(e) = self.machine.transition_from(&job, rollback).await {
                    warn!(job_id = %job.id, error = %e, "failed to roll back undispatched job");
                }
                Err(err)
            }
            Err(JobError::DispatchRejected { job_id, reason }) => {
                let event = JobEvent::WorkerError {
                    reason: format!("dispatch rejected: {reason}"),
                };
                if let Err(e) = self.machine.transition_from(&job, event).await {
                    warn!(job_id = %job.id, error = %e, "failed to fail rejected job");
                }
                Err(JobError::DispatchRejected { job_id, reason })
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn settle(&self, job: &Job) -> Result<Option<Job>> {
        self.aggregator.settle(job).await
    }

    async fn cancel_outstanding(&self, job_id: JobId) {
        if let Err(e) = self.dispatcher.cancel_outstanding(job_id).await {
            warn!(job_id = %job_id, error = %e, "failed to look up tasks to cancel");
        }
    }
}
