//! Events that request a job state change.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::JobState;

/// A requested job lifecycle event.
///
/// `Start`, `Pause`, `Resume` and `Stop` come from the control surface;
/// `WorkerComplete` and `WorkerError` are raised on behalf of the worker pool;
/// `DispatchDeferred` rolls a job back to its pre-dispatch state when the
/// worker pool could not take the work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Start,
    Pause,
    Resume,
    Stop,
    WorkerComplete,
    WorkerError { reason: String },
    DispatchDeferred { back_to: JobState },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Start => "start",
            JobEvent::Pause => "pause",
            JobEvent::Resume => "resume",
            JobEvent::Stop => "stop",
            JobEvent::WorkerComplete => "worker_complete",
            JobEvent::WorkerError { .. } => "worker_error",
            JobEvent::DispatchDeferred { .. } => "dispatch_deferred",
        }
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
