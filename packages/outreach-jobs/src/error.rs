//! Typed errors for job control.
//!
//! Every variant that concerns a single job carries its id, so callers can
//! decide whether to retry, surface the error, or give up.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{JobEvent, JobId, JobState, WorkItemId};

/// Errors raised by the job control core.
#[derive(Debug, Error)]
pub enum JobError {
    /// The requested event is not legal from the job's current state
    #[error("job {job_id} cannot {event} while {state}")]
    InvalidTransition {
        job_id: JobId,
        state: JobState,
        event: JobEvent,
    },

    /// Lost a compare-and-swap race; reread and re-issue
    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: JobId,
        expected: JobState,
        actual: JobState,
    },

    /// Worker pool could not take the work right now
    #[error("worker pool unavailable for job {job_id}: {reason}")]
    DispatchUnavailable { job_id: JobId, reason: String },

    /// Worker pool refused the work outright
    #[error("worker pool rejected job {job_id}: {reason}")]
    DispatchRejected { job_id: JobId, reason: String },

    /// Worker pool could not be reached for status
    #[error("worker pool unreachable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("work item {item_id} not found in job {job_id}")]
    WorkItemNotFound { job_id: JobId, item_id: WorkItemId },

    #[error("no task handle for external task {0}")]
    TaskNotFound(String),

    /// An increment would have let `completed + failed` exceed `total`
    #[error("progress for job {job_id} would exceed {total} items (completed {completed}, failed {failed})")]
    ProgressOverflow {
        job_id: JobId,
        total: i64,
        completed: i64,
        failed: i64,
    },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Flat classification of [`JobError`], suitable for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTransition,
    Conflict,
    DispatchUnavailable,
    DispatchRejected,
    UpstreamUnavailable,
    NotFound,
    InvariantViolation,
    Storage,
}

impl ErrorKind {
    /// Whether the caller may retry the same request (with backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Conflict | ErrorKind::DispatchUnavailable | ErrorKind::UpstreamUnavailable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DispatchUnavailable => "dispatch_unavailable",
            ErrorKind::DispatchRejected => "dispatch_rejected",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Storage => "storage",
        }
    }
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            JobError::Conflict { .. } => ErrorKind::Conflict,
            JobError::DispatchUnavailable { .. } => ErrorKind::DispatchUnavailable,
            JobError::DispatchRejected { .. } => ErrorKind::DispatchRejected,
            JobError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            JobError::JobNotFound(_)
            | JobError::WorkItemNotFound { .. }
            | JobError::TaskNotFound(_) => ErrorKind::NotFound,
            JobError::ProgressOverflow { .. } => ErrorKind::InvariantViolation,
            JobError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        JobError::Storage(err.into())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Storage(Box::new(err))
    }
}

/// Errors reported by a worker pool client.
#[derive(Debug, Error)]
pub enum WorkerPoolError {
    /// Queue is full; try again later
    #[error("worker pool saturated")]
    Saturated,

    /// Network or service failure
    #[error("worker pool unreachable: {0}")]
    Unreachable(String),

    #[error("worker pool timed out after {0:?}")]
    Timeout(Duration),

    /// The pool will never accept this request
    #[error("worker pool rejected request: {0}")]
    Rejected(String),

    #[error("unknown external task: {0}")]
    UnknownTask(String),
}

/// Result type alias for job control operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Result type alias for worker pool calls.
pub type WorkerPoolResult<T> = std::result::Result<T, WorkerPoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        let job_id = JobId::new();
        assert!(JobError::DispatchUnavailable {
            job_id,
            reason: "queue full".into()
        }
        .is_retryable());
        assert!(JobError::UpstreamUnavailable {
            reason: "connection refused".into()
        }
        .is_retryable());
        assert!(JobError::Conflict {
            job_id,
            expected: JobState::Pending,
            actual: JobState::Running
        }
        .is_retryable());
    }

    #[test]
    fn invalid_transition_is_not_retryable_and_names_state_and_event() {
        let err = JobError::InvalidTransition {
            job_id: JobId::new(),
            state: JobState::Completed,
            event: JobEvent::Start,
        };
        assert!(!err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("start"));
        assert!(message.contains("completed"));
    }

    #[test]
    fn not_found_variants_share_kind() {
        assert_eq!(
            JobError::JobNotFound(JobId::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            JobError::TaskNotFound("task-1".into()).kind(),
            ErrorKind::NotFound
        );
    }
}
