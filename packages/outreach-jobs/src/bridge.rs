//! Translates worker pool task reports into item events.
//!
//! Reports arrive two ways: pushed to the webhook ([`StatusBridge::handle_push`])
//! or fetched by polling ([`StatusBridge::poll_job`]). Both end up in
//! the same absorb step, so a report seen twice is harmless.

use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::DispatchConfig;
use crate::error::{JobError, Result, WorkerPoolError};
use crate::progress::{ProgressAggregator, ProgressUpdate};
use crate::traits::store::JobStore;
use crate::traits::worker::{ExternalTaskReport, WorkerPool};
use crate::types::{ExternalStatus, ItemEvent, ItemOutcome, JobId, JobState, TaskHandle};

const TASK_FAILED: &str = "worker task failed";

/// Tally of what one or more absorbed reports changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeOutcome {
    pub applied: usize,
    pub duplicates: usize,
    /// Terminal state the job reached while absorbing, if any
    pub finalized: Option<JobState>,
}

impl BridgeOutcome {
    fn record(&mut self, update: &ProgressUpdate) {
        match update {
            ProgressUpdate::Duplicate { .. } => self.duplicates += 1,
            ProgressUpdate::Recorded { .. } => self.applied += 1,
            ProgressUpdate::Finalized { job, .. } => {
                self.applied += 1;
                self.finalized = Some(job.state);
            }
        }
    }

    fn merge(&mut self, other: BridgeOutcome) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.finalized = other.finalized.or(self.finalized);
    }
}

#[derive(Clone)]
pub struct StatusBridge {
    store: Arc<dyn JobStore>,
    pool: Arc<dyn WorkerPool>,
    aggregator: ProgressAggregator,
    config: DispatchConfig,
}

impl StatusBridge {
    pub fn new(
        store: Arc<dyn JobStore>,
        pool: Arc<dyn WorkerPool>,
        aggregator: ProgressAggregator,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            pool,
            aggregator,
            config,
        }
    }

    /// Absorb a report pushed by the worker pool.
    #[instrument(skip(self, report), fields(external_task_id = %report.external_task_id, status = %report.status))]
    pub async fn handle_push(&self, report: ExternalTaskReport) -> Result<BridgeOutcome> {
        let handle = self
            .store
            .find_task_handle(&report.external_task_id)
            .await?
            .ok_or_else(|| JobError::TaskNotFound(report.external_task_id.clone()))?;

        self.absorb(&handle, &report).await
    }

    /// Poll every outstanding task of a job and absorb the answers.
    ///
    /// All polls happen before anything is written, so an unreachable pool
    /// leaves the job exactly as it was.
    #[instrument(skip(self))]
    pub async fn poll_job(&self, job_id: JobId) -> Result<BridgeOutcome> {
        self.store.get(job_id).await?;

        let handles = self.store.task_handles_for_job(job_id).await?;
        let outstanding: Vec<&TaskHandle> =
            handles.iter().filter(|handle| handle.is_outstanding()).collect();

        let reports = try_join_all(
            outstanding
                .iter()
                .map(|handle| self.fetch(&handle.external_task_id)),
        )
        .await?;

        let mut outcome = BridgeOutcome::default();
        for (handle, report) in outstanding.into_iter().zip(reports) {
            if let Some(report) = report {
                outcome.merge(self.absorb(handle, &report).await?);
            }
        }
        Ok(outcome)
    }

    /// Poll every Running or Paused job. Failures are logged per job and
    /// never abort the sweep.
    ///
    /// Returns how many jobs were polled successfully.
    pub async fn poll_active(&self) -> Result<usize> {
        let mut polled = 0;
        for state in [JobState::Running, JobState::Paused] {
            for job in self.store.jobs_in_state(state).await? {
                match self.poll_job(job.id).await {
                    Ok(outcome) => {
                        polled += 1;
                        if outcome.applied > 0 {
                            debug!(job_id = %job.id, applied = outcome.applied, "poll applied results");
                        }
                    }
                    Err(e) => warn!(job_id = %job.id, error = %e, "status poll failed"),
                }
            }
        }
        Ok(polled)
    }

    async fn fetch(&self, external_task_id: &str) -> Result<Option<ExternalTaskReport>> {
        let timeout = self.config.request_timeout;
        let result = tokio::time::timeout(timeout, self.pool.poll(external_task_id))
            .await
            .unwrap_or(Err(WorkerPoolError::Timeout(timeout)));

        match result {
            Ok(report) => Ok(Some(report)),
            Err(WorkerPoolError::UnknownTask(_)) => {
                warn!(external_task_id, "worker pool no longer knows task");
                Ok(None)
            }
            Err(e) => Err(JobError::UpstreamUnavailable {
                reason: e.to_string(),
            }),
        }
    }

    /// Apply a report for one task handle.
    async fn absorb(&self, handle: &TaskHandle, report: &ExternalTaskReport) -> Result<BridgeOutcome> {
        self.store
            .record_poll(&handle.external_task_id, report.status, Utc::now())
            .await?;

        let mut outcome = BridgeOutcome::default();
        for result in &report.results {
            if !handle.covers(result.work_item_id) {
                warn!(
                    external_task_id = %handle.external_task_id,
                    work_item_id = %result.work_item_id,
                    "ignoring result for work item outside task"
                );
                continue;
            }
            let update = self
                .aggregator
                .apply(ItemEvent::new(
                    handle.job_id,
                    result.work_item_id,
                    result.outcome.clone(),
                ))
                .await?;
            outcome.record(&update);
        }

        match report.status {
            ExternalStatus::Failure if handle.was_cancelled() => {
                debug!(
                    external_task_id = %handle.external_task_id,
                    "cancelled task reported failure; items left for redispatch"
                );
            }
            ExternalStatus::Failure => {
                let reason = report.error.as_deref().unwrap_or(TASK_FAILED);
                outcome.merge(self.fail_remaining(handle, reason).await?);
            }
            ExternalStatus::Revoked => {
                debug!(external_task_id = %handle.external_task_id, "task revoked");
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Mark every unresolved item of a failed task as errored, except items
    /// that a later task has taken over.
    async fn fail_remaining(&self, handle: &TaskHandle, reason: &str) -> Result<BridgeOutcome> {
        let later: Vec<TaskHandle> = self
            .store
            .task_handles_for_job(handle.job_id)
            .await?
            .into_iter()
            .filter(|other| {
                other.external_task_id != handle.external_task_id
                    && other.dispatched_at > handle.dispatched_at
            })
            .collect();

        let unresolved: Vec<_> = self
            .store
            .work_items(handle.job_id)
            .await?
            .into_iter()
            .filter(|item| {
                !item.is_terminal()
                    && handle.covers(item.id)
                    && !later.iter().any(|other| other.covers(item.id))
            })
            .collect();

        if !unresolved.is_empty() {
            info!(
                job_id = %handle.job_id,
                external_task_id = %handle.external_task_id,
                items = unresolved.len(),
                reason,
                "task failed with unresolved items"
            );
        }

        let mut outcome = BridgeOutcome::default();
        for item in unresolved {
            let update = self
                .aggregator
                .apply(ItemEvent::new(
                    handle.job_id,
                    item.id,
                    ItemOutcome::error(reason),
                ))
                .await?;
            outcome.record(&update);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::TaskDispatcher;
    use crate::machine::JobStateMachine;
    use crate::stores::MemoryJobStore;
    use crate::testing::MockWorkerPool;
    use crate::types::{ItemState, JobEvent, NewJob};

    struct Fixture {
        store: Arc<MemoryJobStore>,
        pool: Arc<MockWorkerPool>,
        bridge: StatusBridge,
        job_id: JobId,
        handle: TaskHandle,
    }

    async fn dispatched_job(urls: &[&str]) -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let pool = Arc::new(MockWorkerPool::new());
        let config = DispatchConfig::default();

        let job = store.create(NewJob::new(urls.iter().copied())).await.unwrap();
        let job = JobStateMachine::new(store.clone())
            .request_transition(job.id, JobEvent::Start)
            .await
            .unwrap()
            .into_job();
        let handle = TaskDispatcher::new(store.clone(), pool.clone(), config.clone())
            .dispatch(&job)
            .await
            .unwrap()
            .unwrap();

        let aggregator = ProgressAggregator::new(store.clone(), 3);
        let bridge = StatusBridge::new(store.clone(), pool.clone(), aggregator, config);
        Fixture {
            store,
            pool,
            bridge,
            job_id: job.id,
            handle,
        }
    }

    #[tokio::test]
    async fn push_applies_results_and_completes_job() {
        let fx = dispatched_job(&["https://a.org", "https://b.org"]).await;
        let report = fx.pool.success_report(&fx.handle.external_task_id).unwrap();

        let outcome = fx.bridge.handle_push(report.clone()).await.unwrap();
        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.finalized, Some(JobState::Completed));

        let again = fx.bridge.handle_push(report).await.unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(again.duplicates, 2);

        let job = fx.store.get(fx.job_id).await.unwrap();
        assert_eq!(job.completed_items, 2);
    }

    #[tokio::test]
    async fn push_for_unknown_task_is_not_found() {
        let fx = dispatched_job(&["https://a.org"]).await;
        let report = ExternalTaskReport::new("nobody", ExternalStatus::Success);

        let err = fx.bridge.handle_push(report).await.unwrap_err();

        assert!(matches!(err, JobError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn task_failure_errors_unresolved_items() {
        let fx = dispatched_job(&["https://a.org", "https://b.org"]).await;
        let first = fx.handle.work_item_ids[0];
        let report = ExternalTaskReport::new(&fx.handle.external_task_id, ExternalStatus::Failure)
            .with_result(first, ItemOutcome::success("sent"))
            .with_error("worker crashed");

        let outcome = fx.bridge.handle_push(report).await.unwrap();

        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.finalized, Some(JobState::Completed));
        let items = fx.store.work_items(fx.job_id).await.unwrap();
        assert_eq!(items[0].item_state, ItemState::Done);
        assert_eq!(items[1].item_state, ItemState::Error);
        assert_eq!(items[1].result.as_deref(), Some("worker crashed"));
    }

    #[tokio::test]
    async fn failure_of_cancelled_task_leaves_items_unresolved() {
        let fx = dispatched_job(&["https://a.org", "https://b.org"]).await;
        fx.store
            .mark_task_cancelled(&fx.handle.external_task_id, Utc::now())
            .await
            .unwrap();
        let report = ExternalTaskReport::new(&fx.handle.external_task_id, ExternalStatus::Failure)
            .with_error("cancelled");

        let outcome = fx.bridge.handle_push(report).await.unwrap();

        assert_eq!(outcome, BridgeOutcome::default());
        let items = fx.store.work_items(fx.job_id).await.unwrap();
        assert!(items
            .iter()
            .all(|item| item.item_state == ItemState::InProgress));
        assert_eq!(fx.store.get(fx.job_id).await.unwrap().failed_items, 0);
    }

    #[tokio::test]
    async fn revoked_task_changes_nothing() {
        let fx = dispatched_job(&["https://a.org"]).await;
        let report = ExternalTaskReport::new(&fx.handle.external_task_id, ExternalStatus::Revoked);

        let outcome = fx.bridge.handle_push(report).await.unwrap();

        assert_eq!(outcome, BridgeOutcome::default());
        let job = fx.store.get(fx.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Running);
        let handle = fx
            .store
            .find_task_handle(&fx.handle.external_task_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!handle.is_outstanding());
    }

    #[tokio::test]
    async fn results_outside_the_task_are_ignored() {
        let fx = dispatched_job(&["https://a.org"]).await;
        let report = ExternalTaskReport::new(&fx.handle.external_task_id, ExternalStatus::Started)
            .with_result(crate::types::WorkItemId::new(), ItemOutcome::success("sent"));

        let outcome = fx.bridge.handle_push(report).await.unwrap();

        assert_eq!(outcome.applied, 0);
    }

    #[tokio::test]
    async fn poll_records_status_and_applies_results() {
        let fx = dispatched_job(&["https://a.org"]).await;
        fx.pool
            .set_report(fx.pool.success_report(&fx.handle.external_task_id).unwrap());

        let outcome = fx.bridge.poll_job(fx.job_id).await.unwrap();

        assert_eq!(outcome.finalized, Some(JobState::Completed));
        let handle = fx
            .store
            .find_task_handle(&fx.handle.external_task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            handle.last_known_external_status,
            Some(ExternalStatus::Success)
        );
        assert!(handle.last_polled_at.is_some());
    }

    #[tokio::test]
    async fn poll_skips_task_unknown_to_pool_and_absorbs_the_rest() {
        let fx = dispatched_job(&["https://a.org"]).await;
        fx.store
            .save_task_handle(TaskHandle::new(fx.job_id, "forgotten-task", vec![]))
            .await
            .unwrap();
        fx.pool
            .set_report(fx.pool.success_report(&fx.handle.external_task_id).unwrap());

        let outcome = fx.bridge.poll_job(fx.job_id).await.unwrap();

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.finalized, Some(JobState::Completed));
        let forgotten = fx
            .store
            .find_task_handle("forgotten-task")
            .await
            .unwrap()
            .unwrap();
        assert!(forgotten.last_polled_at.is_none());
        assert!(forgotten.is_outstanding());
    }

    #[tokio::test]
    async fn unreachable_pool_leaves_job_untouched() {
        let fx = dispatched_job(&["https://a.org"]).await;
        let before = fx.store.get(fx.job_id).await.unwrap();
        fx.pool.set_poll_unreachable(true);

        let err = fx.bridge.poll_job(fx.job_id).await.unwrap_err();

        assert!(matches!(err, JobError::UpstreamUnavailable { .. }));
        assert_eq!(fx.store.get(fx.job_id).await.unwrap(), before);
        let handle = fx
            .store
            .find_task_handle(&fx.handle.external_task_id)
            .await
            .unwrap()
            .unwrap();
        assert!(handle.last_polled_at.is_none());
    }

    #[tokio::test]
    async fn poll_active_suppresses_failures() {
        let fx = dispatched_job(&["https://a.org"]).await;
        fx.pool.set_poll_unreachable(true);

        let polled = fx.bridge.poll_active().await.unwrap();

        assert_eq!(polled, 0);
    }
}
