//! Job lifecycle state machine.
//!
//! The transition table lives in [`next_state`]; [`JobStateMachine`] is the
//! only component that writes a job's state, always by compare-and-swap
//! against the state it read.
//!
//! ```text
//! Pending ──start──► Running ──pause──► Paused
//!    ▲                │  ▲                │
//!    └──deferred──────┤  └────resume──────┤
//!                     │                   │
//!       worker_complete│   stop / worker_error
//!                     ▼                   ▼
//!                 Completed             Failed
//! ```

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::error::{JobError, Result};
use crate::traits::store::{JobMutator, JobStore};
use crate::types::{Job, JobEvent, JobId, JobState};

/// Message recorded on a job that was stopped from the control surface.
pub const STOPPED_BY_REQUEST: &str = "stopped by request";

/// Target state for `event` from `state`, ignoring guards on job progress.
///
/// Returns `None` when the combination is never legal.
pub fn next_state(state: JobState, event: &JobEvent) -> Option<JobState> {
    use JobEvent as E;
    use JobState as S;

    match (state, event) {
        (S::Pending, E::Start) => Some(S::Running),
        (S::Running, E::Pause) => Some(S::Paused),
        (S::Paused, E::Resume) => Some(S::Running),
        (S::Running | S::Paused, E::Stop) => Some(S::Failed),
        (S::Running | S::Paused, E::WorkerError { .. }) => Some(S::Failed),
        (S::Running, E::WorkerComplete) => Some(S::Completed),
        (S::Running, E::DispatchDeferred { back_to: S::Pending }) => Some(S::Pending),
        (S::Running, E::DispatchDeferred { back_to: S::Paused }) => Some(S::Paused),
        _ => None,
    }
}

/// What an accepted event does to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Move(JobState),
    /// Legal but premature; leave the job as it is
    Stay,
}

/// Decide `event` against `job`, including the completion guard.
pub fn evaluate(job: &Job, event: &JobEvent) -> Result<Decision> {
    let target = next_state(job.state, event).ok_or_else(|| JobError::InvalidTransition {
        job_id: job.id,
        state: job.state,
        event: event.clone(),
    })?;

    if matches!(event, JobEvent::WorkerComplete) && !job.is_fully_resolved() {
        return Ok(Decision::Stay);
    }

    Ok(Decision::Move(target))
}

/// Outcome of a transition request.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied { from: JobState, job: Job },
    Unchanged(Job),
}

impl Transition {
    pub fn job(&self) -> &Job {
        match self {
            Transition::Applied { job, .. } | Transition::Unchanged(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            Transition::Applied { job, .. } | Transition::Unchanged(job) => job,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Authorizes and persists job state changes.
#[derive(Clone)]
pub struct JobStateMachine {
    store: Arc<dyn JobStore>,
}

impl JobStateMachine {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Read the job and apply `event` to what was read.
    pub async fn request_transition(&self, job_id: JobId, event: JobEvent) -> Result<Transition> {
        let job = self.store.get(job_id).await?;
        self.transition_from(&job, event).await
    }

    /// Apply `event` to a job snapshot the caller already holds.
    ///
    /// Fails with `Conflict` if the persisted state moved since `job` was read.
    #[instrument(skip(self, job), fields(job_id = %job.id, state = %job.state, event = %event))]
    pub async fn transition_from(&self, job: &Job, event: JobEvent) -> Result<Transition> {
        let target = match evaluate(job, &event)? {
            Decision::Move(target) => target,
            Decision::Stay => {
                debug!(
                    resolved = job.resolved_items(),
                    total = job.total_items,
                    "completion requested before all items resolved"
                );
                return Ok(Transition::Unchanged(job.clone()));
            }
        };

        let from = job.state;
        let updated = self
            .store
            .compare_and_swap_state(job.id, from, target, side_effects(&event, target))
            .await?;

        info!(from = %from, to = %target, "job transitioned");
        Ok(Transition::Applied { from, job: updated })
    }
}

fn side_effects(event: &JobEvent, target: JobState) -> JobMutator {
    let event = event.clone();
    Box::new(move |job: &mut Job| {
        let now = Utc::now();
        match &event {
            JobEvent::Start => job.started_at = Some(now),
            JobEvent::DispatchDeferred {
                back_to: JobState::Pending,
            } => job.started_at = None,
            JobEvent::Stop => job.error_message = Some(STOPPED_BY_REQUEST.to_string()),
            JobEvent::WorkerError { reason } => job.error_message = Some(reason.clone()),
            _ => {}
        }
        if target.is_terminal() {
            job.ended_at = Some(now);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryJobStore;
    use crate::types::{ItemOutcome, NewJob};

    const ALL_STATES: [JobState; 5] = [
        JobState::Pending,
        JobState::Running,
        JobState::Paused,
        JobState::Completed,
        JobState::Failed,
    ];

    fn control_events() -> [JobEvent; 4] {
        [JobEvent::Start, JobEvent::Pause, JobEvent::Resume, JobEvent::Stop]
    }

    #[test]
    fn control_table() {
        use JobState::*;

        let expected = [
            (Pending, [Some(Running), None, None, None]),
            (Running, [None, Some(Paused), None, Some(Failed)]),
            (Paused, [None, None, Some(Running), Some(Failed)]),
            (Completed, [None, None, None, None]),
            (Failed, [None, None, None, None]),
        ];

        for (state, row) in expected {
            for (event, target) in control_events().iter().zip(row) {
                assert_eq!(next_state(state, event), target, "{state} + {event}");
            }
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let events = [
            JobEvent::Start,
            JobEvent::Pause,
            JobEvent::Resume,
            JobEvent::Stop,
            JobEvent::WorkerComplete,
            JobEvent::WorkerError {
                reason: "x".into(),
            },
            JobEvent::DispatchDeferred {
                back_to: JobState::Pending,
            },
        ];
        for state in [JobState::Completed, JobState::Failed] {
            for event in &events {
                assert_eq!(next_state(state, event), None);
            }
        }
    }

    #[test]
    fn worker_events() {
        let error = JobEvent::WorkerError {
            reason: "boom".into(),
        };
        assert_eq!(
            next_state(JobState::Running, &error),
            Some(JobState::Failed)
        );
        assert_eq!(next_state(JobState::Paused, &error), Some(JobState::Failed));
        assert_eq!(next_state(JobState::Pending, &error), None);

        for state in ALL_STATES {
            let expected = (state == JobState::Running).then_some(JobState::Completed);
            assert_eq!(next_state(state, &JobEvent::WorkerComplete), expected);
        }
    }

    #[test]
    fn dispatch_deferred_only_rolls_back_running() {
        let to_pending = JobEvent::DispatchDeferred {
            back_to: JobState::Pending,
        };
        let to_failed = JobEvent::DispatchDeferred {
            back_to: JobState::Failed,
        };
        assert_eq!(
            next_state(JobState::Running, &to_pending),
            Some(JobState::Pending)
        );
        assert_eq!(next_state(JobState::Paused, &to_pending), None);
        assert_eq!(next_state(JobState::Running, &to_failed), None);
    }

    #[test]
    fn completion_waits_for_all_items() {
        let mut job = Job::builder()
            .total_items(2)
            .state(JobState::Running)
            .build();
        assert_eq!(
            evaluate(&job, &JobEvent::WorkerComplete).unwrap(),
            Decision::Stay
        );

        job.completed_items = 1;
        job.failed_items = 1;
        assert_eq!(
            evaluate(&job, &JobEvent::WorkerComplete).unwrap(),
            Decision::Move(JobState::Completed)
        );

        job.state = JobState::Paused;
        assert!(matches!(
            evaluate(&job, &JobEvent::WorkerComplete),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    async fn machine_with_job(urls: &[&str]) -> (Arc<MemoryJobStore>, JobStateMachine, Job) {
        let store = Arc::new(MemoryJobStore::new());
        let job = store
            .create(NewJob::new(urls.iter().copied()))
            .await
            .unwrap();
        let machine = JobStateMachine::new(store.clone());
        (store, machine, job)
    }

    #[tokio::test]
    async fn start_sets_started_at() {
        let (_, machine, job) = machine_with_job(&["https://a.org"]).await;

        let transition = machine
            .request_transition(job.id, JobEvent::Start)
            .await
            .unwrap();

        assert!(transition.was_applied());
        let job = transition.into_job();
        assert_eq!(job.state, JobState::Running);
        assert!(job.started_at.is_some());
        assert!(job.ended_at.is_none());
    }

    #[tokio::test]
    async fn stop_records_reason_and_end() {
        let (_, machine, job) = machine_with_job(&["https://a.org"]).await;
        machine
            .request_transition(job.id, JobEvent::Start)
            .await
            .unwrap();

        let job = machine
            .request_transition(job.id, JobEvent::Stop)
            .await
            .unwrap()
            .into_job();

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_message.as_deref(), Some(STOPPED_BY_REQUEST));
        assert!(job.ended_at.is_some());
    }

    #[tokio::test]
    async fn rollback_to_pending_clears_started_at() {
        let (_, machine, job) = machine_with_job(&["https://a.org"]).await;
        machine
            .request_transition(job.id, JobEvent::Start)
            .await
            .unwrap();

        let job = machine
            .request_transition(
                job.id,
                JobEvent::DispatchDeferred {
                    back_to: JobState::Pending,
                },
            )
            .await
            .unwrap()
            .into_job();

        assert_eq!(job.state, JobState::Pending);
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn premature_completion_is_unchanged() {
        let (store, machine, job) = machine_with_job(&["https://a.org", "https://b.org"]).await;
        machine
            .request_transition(job.id, JobEvent::Start)
            .await
            .unwrap();
        let item = store.work_items(job.id).await.unwrap()[0].id;
        store
            .apply_item_outcome(job.id, item, &ItemOutcome::success("ok"))
            .await
            .unwrap();

        let transition = machine
            .request_transition(job.id, JobEvent::WorkerComplete)
            .await
            .unwrap();

        assert!(!transition.was_applied());
        assert_eq!(transition.job().state, JobState::Running);
    }

    #[tokio::test]
    async fn stale_snapshot_conflicts() {
        let (_, machine, job) = machine_with_job(&["https://a.org"]).await;

        machine
            .transition_from(&job, JobEvent::Start)
            .await
            .unwrap();
        let err = machine
            .transition_from(&job, JobEvent::Start)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Conflict { .. }));
    }

    #[tokio::test]
    async fn illegal_event_is_rejected_without_write() {
        let (store, machine, job) = machine_with_job(&["https://a.org"]).await;

        let err = machine
            .request_transition(job.id, JobEvent::Pause)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            JobError::InvalidTransition {
                state: JobState::Pending,
                event: JobEvent::Pause,
                ..
            }
        ));
        assert_eq!(store.get(job.id).await.unwrap(), job);
    }
}
