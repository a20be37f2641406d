//! Work items: one target website within a job.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobId, ProgressDelta};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type), sqlx(transparent))]
#[serde(transparent)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WorkItemId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(
    feature = "postgres",
    derive(sqlx::Type),
    sqlx(type_name = "item_state", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    #[default]
    Queued,
    InProgress,
    Done,
    Error,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Queued => "queued",
            ItemState::InProgress => "in_progress",
            ItemState::Done => "done",
            ItemState::Error => "error",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ItemState::Queued),
            "in_progress" => Ok(ItemState::InProgress),
            "done" => Ok(ItemState::Done),
            "error" => Ok(ItemState::Error),
            other => Err(format!("unknown item state: {other}")),
        }
    }
}

/// Worker-reported result for a single work item.
///
/// Serialized with an `outcome` tag so it can be flattened into the worker
/// pool's event payloads:
///
/// ```json
/// { "work_item_id": "...", "outcome": "success", "payload": "Message sent" }
/// { "work_item_id": "...", "outcome": "error", "reason": "no contact form" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success {
        #[serde(default)]
        payload: String,
    },
    Error {
        reason: String,
    },
}

impl ItemOutcome {
    pub fn success(payload: impl Into<String>) -> Self {
        ItemOutcome::Success {
            payload: payload.into(),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        ItemOutcome::Error {
            reason: reason.into(),
        }
    }

    /// The terminal item state this outcome leads to.
    pub fn item_state(&self) -> ItemState {
        match self {
            ItemOutcome::Success { .. } => ItemState::Done,
            ItemOutcome::Error { .. } => ItemState::Error,
        }
    }

    /// Payload text for Done, reason for Error.
    pub fn result_text(&self) -> &str {
        match self {
            ItemOutcome::Success { payload } => payload,
            ItemOutcome::Error { reason } => reason,
        }
    }

    pub fn progress(&self) -> ProgressDelta {
        match self {
            ItemOutcome::Success { .. } => ProgressDelta::success(),
            ItemOutcome::Error { .. } => ProgressDelta::failure(),
        }
    }
}

/// Completion signal for one work item, as consumed by the progress aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub job_id: JobId,
    pub work_item_id: WorkItemId,
    pub outcome: ItemOutcome,
}

impl ItemEvent {
    pub fn new(job_id: JobId, work_item_id: WorkItemId, outcome: ItemOutcome) -> Self {
        Self {
            job_id,
            work_item_id,
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct WorkItem {
    pub id: WorkItemId,
    pub job_id: JobId,
    pub url: String,
    pub item_state: ItemState,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn queued(job_id: JobId, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: WorkItemId::new(),
            job_id,
            url: url.into(),
            item_state: ItemState::Queued,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.item_state.is_terminal()
    }

    /// Move the item to the terminal state for `outcome`.
    ///
    /// Returns false without touching the item if it is already terminal.
    pub fn resolve(&mut self, outcome: &ItemOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.item_state = outcome.item_state();
        self.result = Some(outcome.result_text().to_string());
        self.updated_at = Utc::now();
        true
    }
}
