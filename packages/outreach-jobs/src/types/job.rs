//! Job model and lifecycle state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{JobError, Result};

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a job. Assigned at creation, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type), sqlx(transparent))]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(
    feature = "postgres",
    derive(sqlx::Type),
    sqlx(type_name = "job_state", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobState {
    /// Completed and Failed have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "running" => Ok(JobState::Running),
            "paused" => Ok(JobState::Paused),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

// ============================================================================
// Progress
// ============================================================================

/// Change to a job's resolved item counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressDelta {
    pub completed: i64,
    pub failed: i64,
}

impl ProgressDelta {
    pub fn success() -> Self {
        Self {
            completed: 1,
            failed: 0,
        }
    }

    pub fn failure() -> Self {
        Self {
            completed: 0,
            failed: 1,
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// One submitted scraping/messaging run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default)]
    pub id: JobId,

    #[builder(default)]
    pub name: Option<String>,

    #[builder(default)]
    pub state: JobState,

    // Progress counters
    pub total_items: i64,
    #[builder(default = 0)]
    pub completed_items: i64,
    #[builder(default = 0)]
    pub failed_items: i64,

    // Set only when the job fails
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub ended_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn resolved_items(&self) -> i64 {
        self.completed_items + self.failed_items
    }

    /// Every work item has reached Done or Error.
    pub fn is_fully_resolved(&self) -> bool {
        self.resolved_items() == self.total_items
    }

    /// Share of resolved items, 0.0 to 100.0. Empty jobs report 100.
    pub fn progress_percent(&self) -> f64 {
        if self.total_items == 0 {
            return 100.0;
        }
        (self.resolved_items() as f64 / self.total_items as f64) * 100.0
    }

    /// Apply a counter increment, refusing anything that would let
    /// `completed + failed` exceed `total`.
    pub fn record_progress(&mut self, delta: ProgressDelta) -> Result<()> {
        let completed = self.completed_items + delta.completed;
        let failed = self.failed_items + delta.failed;

        if delta.completed < 0 || delta.failed < 0 || completed + failed > self.total_items {
            return Err(JobError::ProgressOverflow {
                job_id: self.id,
                total: self.total_items,
                completed,
                failed,
            });
        }

        self.completed_items = completed;
        self.failed_items = failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::from(self)
    }
}

/// Read model returned to callers of the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: Option<String>,
    pub state: JobState,
    pub total_items: i64,
    pub completed_items: i64,
    pub failed_items: i64,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            name: job.name.clone(),
            state: job.state,
            total_items: job.total_items,
            completed_items: job.completed_items,
            failed_items: job.failed_items,
            progress_percent: job.progress_percent(),
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            ended_at: job.ended_at,
        }
    }
}

/// A job as handed over by the upload subsystem: a label and the target URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub name: Option<String>,
    pub urls: Vec<String>,
}

impl NewJob {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
