//! Folds worker-reported item outcomes into job progress.
//!
//! Exactly-once counting rests on the store: an outcome for an item that is
//! already Done or Error is reported back as a duplicate and changes nothing.
//! No separate dedup table is kept.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{JobError, Result};
use crate::machine::{JobStateMachine, Transition};
use crate::traits::store::{JobStore, OutcomeApplied};
use crate::types::{ItemEvent, Job, JobEvent, JobState, WorkItem};

/// What applying one item event did.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Counters moved; the job is still open (or already closed).
    Recorded { job: Job, item: WorkItem },
    /// Counters moved and the job was finalized by this event.
    Finalized { job: Job, item: WorkItem },
    /// Item was already resolved; nothing changed.
    Duplicate { job: Job, item: WorkItem },
}

impl ProgressUpdate {
    pub fn job(&self) -> &Job {
        match self {
            ProgressUpdate::Recorded { job, .. }
            | ProgressUpdate::Finalized { job, .. }
            | ProgressUpdate::Duplicate { job, .. } => job,
        }
    }

    pub fn item(&self) -> &WorkItem {
        match self {
            ProgressUpdate::Recorded { item, .. }
            | ProgressUpdate::Finalized { item, .. }
            | ProgressUpdate::Duplicate { item, .. } => item,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ProgressUpdate::Duplicate { .. })
    }
}

/// The event that closes a fully resolved job.
///
/// A job fails only if every item errored; partial failure still completes.
pub fn completion_event(job: &Job) -> JobEvent {
    if job.completed_items == 0 && job.failed_items > 0 {
        JobEvent::WorkerError {
            reason: format!("all {} work items failed", job.failed_items),
        }
    } else {
        JobEvent::WorkerComplete
    }
}

#[derive(Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn JobStore>,
    machine: JobStateMachine,
    max_conflict_retries: u32,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn JobStore>, max_conflict_retries: u32) -> Self {
        Self {
            machine: JobStateMachine::new(store.clone()),
            store,
            max_conflict_retries,
        }
    }

    /// Record one item outcome and close the job if it was the last one.
    #[instrument(skip(self, event), fields(job_id = %event.job_id, work_item_id = %event.work_item_id))]
    pub async fn apply(&self, event: ItemEvent) -> Result<ProgressUpdate> {
        let applied = self
            .store
            .apply_item_outcome(event.job_id, event.work_item_id, &event.outcome)
            .await?;

        let (job, item) = match applied {
            OutcomeApplied::Duplicate { job, item } => {
                debug!(item_state = %item.item_state, "ignoring outcome for resolved work item");
                return Ok(ProgressUpdate::Duplicate { job, item });
            }
            OutcomeApplied::Applied { job, item } => (job, item),
        };

        debug!(
            item_state = %item.item_state,
            completed = job.completed_items,
            failed = job.failed_items,
            total = job.total_items,
            "work item resolved"
        );

        if job.state.is_terminal() {
            debug!(state = %job.state, "job already finished; outcome recorded only");
            return Ok(ProgressUpdate::Recorded { job, item });
        }

        match self.settle(&job).await? {
            Some(finished) => Ok(ProgressUpdate::Finalized {
                job: finished,
                item,
            }),
            None => Ok(ProgressUpdate::Recorded { job, item }),
        }
    }

    /// Close a Running job whose items are all resolved.
    ///
    /// Returns the finished job, or `None` if there was nothing to do. Lost
    /// races are re-read and retried a bounded number of times.
    pub async fn settle(&self, job: &Job) -> Result<Option<Job>> {
        let mut current = job.clone();
        let mut attempts = 0;

        loop {
            if current.state != JobState::Running || !current.is_fully_resolved() {
                return Ok(None);
            }

            match self
                .machine
                .transition_from(&current, completion_event(&current))
                .await
            {
                Ok(Transition::Applied { job, .. }) => {
                    info!(
                        job_id = %job.id,
                        state = %job.state,
                        completed = job.completed_items,
                        failed = job.failed_items,
                        "job finished"
                    );
                    return Ok(Some(job));
                }
                Ok(Transition::Unchanged(_)) => return Ok(None),
                Err(JobError::Conflict { .. }) if attempts < self.max_conflict_retries => {
                    attempts += 1;
                    current = self.store.get(job.id).await?;
                }
                Err(JobError::InvalidTransition { state, .. }) => {
                    debug!(job_id = %job.id, state = %state, "job no longer closable");
                    return Ok(None);
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to finalize job");
                    return Err(e);
                }
            }
        }
    }
}
