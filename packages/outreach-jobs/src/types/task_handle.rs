//! Task handles link a job to the worker pool's tracking tokens.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::JobId;
use super::work_item::WorkItemId;

/// Task status vocabulary of the external worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalStatus {
    Pending,
    Received,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
}

impl ExternalStatus {
    /// The external task will not report anything further.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ExternalStatus::Success | ExternalStatus::Failure | ExternalStatus::Revoked
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalStatus::Pending => "pending",
            ExternalStatus::Received => "received",
            ExternalStatus::Started => "started",
            ExternalStatus::Retry => "retry",
            ExternalStatus::Success => "success",
            ExternalStatus::Failure => "failure",
            ExternalStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ExternalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExternalStatus {
    type Err = String;

    /// Case-insensitive; the pool reports either `SUCCESS` or `success`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ExternalStatus::Pending),
            "received" => Ok(ExternalStatus::Received),
            "started" => Ok(ExternalStatus::Started),
            "retry" => Ok(ExternalStatus::Retry),
            "success" => Ok(ExternalStatus::Success),
            "failure" => Ok(ExternalStatus::Failure),
            "revoked" => Ok(ExternalStatus::Revoked),
            other => Err(format!("unknown external status: {other}")),
        }
    }
}

/// Local record of one dispatch to the worker pool.
///
/// Holds only the job id; it is a lookup aid for the status bridge and does
/// not keep the job alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub job_id: JobId,
    pub external_task_id: String,
    /// Work items covered by this dispatch.
    pub work_item_ids: Vec<WorkItemId>,
    pub dispatched_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_known_external_status: Option<ExternalStatus>,
    /// Set when we asked the pool to drop this task.
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TaskHandle {
    pub fn new(
        job_id: JobId,
        external_task_id: impl Into<String>,
        work_item_ids: Vec<WorkItemId>,
    ) -> Self {
        Self {
            job_id,
            external_task_id: external_task_id.into(),
            work_item_ids,
            dispatched_at: Utc::now(),
            last_polled_at: None,
            last_known_external_status: None,
            cancelled_at: None,
        }
    }

    /// Whether the worker pool may still report results for this handle.
    pub fn is_outstanding(&self) -> bool {
        !self
            .last_known_external_status
            .is_some_and(|status| status.is_finished())
    }

    /// Whether we asked the pool to drop this task.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }

    pub fn covers(&self, item_id: WorkItemId) -> bool {
        self.work_item_ids.contains(&item_id)
    }
}
