//! Testing utilities including a scriptable worker pool.
//!
//! Useful for exercising job control end to end without a real worker pool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{WorkerPoolError, WorkerPoolResult};
use crate::traits::worker::{DispatchBatch, ExternalTaskReport, WorkerPool};
use crate::types::{ExternalStatus, ItemOutcome};

/// How the mock pool should refuse a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Saturated,
    Unreachable,
    Rejected,
}

impl MockFailure {
    fn into_error(self) -> WorkerPoolError {
        match self {
            MockFailure::Saturated => WorkerPoolError::Saturated,
            MockFailure::Unreachable => WorkerPoolError::Unreachable("connection refused".into()),
            MockFailure::Rejected => WorkerPoolError::Rejected("batch refused".into()),
        }
    }
}

/// Record of a call made to the mock pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockPoolCall {
    Submit { task_id: String, item_count: usize },
    Cancel { task_id: String },
    Poll { task_id: String },
}

#[derive(Default)]
struct MockPoolState {
    next_task: u64,
    submissions: Vec<(String, DispatchBatch)>,
    reports: HashMap<String, ExternalTaskReport>,
    calls: Vec<MockPoolCall>,
    submit_failure: Option<MockFailure>,
    poll_unreachable: bool,
    cancel_fails: bool,
    submit_delay: Option<Duration>,
}

/// In-process stand-in for the worker pool.
///
/// Accepts every batch unless told otherwise, hands out sequential task ids
/// (`mock-task-1`, `mock-task-2`, ...) and answers polls with whatever report
/// was scripted for the task, or `started` with no results.
#[derive(Default)]
pub struct MockWorkerPool {
    state: Mutex<MockPoolState>,
}

impl MockWorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every submission, e.g. to trip the dispatch timeout.
    pub fn with_submit_delay(self, delay: Duration) -> Self {
        self.state().submit_delay = Some(delay);
        self
    }

    /// Refuse submissions until [`MockWorkerPool::accept_submissions`] is called.
    pub fn fail_submissions(&self, failure: MockFailure) {
        self.state().submit_failure = Some(failure);
    }

    pub fn accept_submissions(&self) {
        self.state().submit_failure = None;
    }

    pub fn set_poll_unreachable(&self, unreachable: bool) {
        self.state().poll_unreachable = unreachable;
    }

    pub fn set_cancel_fails(&self, fails: bool) {
        self.state().cancel_fails = fails;
    }

    /// Script the report returned for polls of `report.external_task_id`.
    pub fn set_report(&self, report: ExternalTaskReport) {
        self.state()
            .reports
            .insert(report.external_task_id.clone(), report);
    }

    /// Accepted batches, in submission order, with their task ids.
    pub fn submissions(&self) -> Vec<(String, DispatchBatch)> {
        self.state().submissions.clone()
    }

    pub fn last_submission(&self) -> Option<(String, DispatchBatch)> {
        self.state().submissions.last().cloned()
    }

    pub fn calls(&self) -> Vec<MockPoolCall> {
        self.state().calls.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockPoolCall::Cancel { task_id } => Some(task_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// A `success` report resolving every item of the batch submitted as `task_id`.
    pub fn success_report(&self, task_id: &str) -> Option<ExternalTaskReport> {
        let batch = self.batch(task_id)?;
        Some(
            batch
                .work_item_ids()
                .into_iter()
                .fold(
                    ExternalTaskReport::new(task_id, ExternalStatus::Success),
                    |report, id| report.with_result(id, ItemOutcome::success("message sent")),
                ),
        )
    }

    pub fn batch(&self, task_id: &str) -> Option<DispatchBatch> {
        self.state()
            .submissions
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, batch)| batch.clone())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockPoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkerPool for MockWorkerPool {
    async fn submit(&self, batch: &DispatchBatch) -> WorkerPoolResult<String> {
        let delay = self.state().submit_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(failure) = state.submit_failure {
            return Err(failure.into_error());
        }

        state.next_task += 1;
        let task_id = format!("mock-task-{}", state.next_task);
        state.calls.push(MockPoolCall::Submit {
            task_id: task_id.clone(),
            item_count: batch.len(),
        });
        state.submissions.push((task_id.clone(), batch.clone()));
        Ok(task_id)
    }

    async fn cancel(&self, external_task_id: &str) -> WorkerPoolResult<()> {
        let mut state = self.state();
        state.calls.push(MockPoolCall::Cancel {
            task_id: external_task_id.to_string(),
        });
        if state.cancel_fails {
            return Err(WorkerPoolError::Unreachable("connection reset".into()));
        }
        Ok(())
    }

    async fn poll(&self, external_task_id: &str) -> WorkerPoolResult<ExternalTaskReport> {
        let mut state = self.state();
        state.calls.push(MockPoolCall::Poll {
            task_id: external_task_id.to_string(),
        });
        if state.poll_unreachable {
            return Err(WorkerPoolError::Unreachable("connection refused".into()));
        }
        if let Some(report) = state.reports.get(external_task_id) {
            return Ok(report.clone());
        }
        if state.submissions.iter().any(|(id, _)| id == external_task_id) {
            return Ok(ExternalTaskReport::new(
                external_task_id,
                ExternalStatus::Started,
            ));
        }
        Err(WorkerPoolError::UnknownTask(external_task_id.to_string()))
    }
}
