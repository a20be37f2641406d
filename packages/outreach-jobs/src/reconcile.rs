//! Startup reconciliation of jobs left Running by a previous process.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::control::ControlApi;
use crate::error::{JobError, Result};
use crate::types::{Job, JobState};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Jobs whose outstanding tasks were re-polled
    pub polled: usize,
    /// Jobs with no recorded task that were dispatched again
    pub redispatched: usize,
    /// Jobs rolled back to Pending because the pool was unavailable
    pub deferred: usize,
    /// Jobs that ended up Completed or Failed during reconciliation
    pub finalized: usize,
    /// Jobs that could not be reconciled and were left as they were
    pub errors: usize,
}

/// Brings Running jobs back in line with the worker pool after a restart.
///
/// A Running job with recorded tasks is polled; one without any task never
/// reached the pool and is dispatched again.
pub struct Reconciler {
    control: ControlApi,
}

impl Reconciler {
    pub fn new(control: ControlApi) -> Self {
        Self { control }
    }

    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for job in self.control.store().jobs_in_state(JobState::Running).await? {
            let handles = self.control.store().task_handles_for_job(job.id).await?;
            if handles.is_empty() {
                self.redispatch(job, &mut report).await;
            } else {
                self.repoll(job, &mut report).await;
            }
        }

        info!(
            polled = report.polled,
            redispatched = report.redispatched,
            deferred = report.deferred,
            finalized = report.finalized,
            errors = report.errors,
            "reconciled running jobs"
        );
        Ok(report)
    }

    async fn redispatch(&self, job: Job, report: &mut ReconcileReport) {
        let job_id = job.id;
        match self.control.launch(job, JobState::Pending).await {
            Ok(job) if job.state.is_terminal() => report.finalized += 1,
            Ok(_) => report.redispatched += 1,
            Err(JobError::DispatchUnavailable { .. }) => report.deferred += 1,
            Err(JobError::DispatchRejected { .. }) => report.finalized += 1,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to redispatch job");
                report.errors += 1;
            }
        }
    }

    async fn repoll(&self, job: Job, report: &mut ReconcileReport) {
        if let Err(e) = self.control.bridge().poll_job(job.id).await {
            warn!(job_id = %job.id, error = %e, "failed to poll job");
            report.errors += 1;
            return;
        }
        report.polled += 1;

        // Covers a crash between the last outcome and closing the job.
        match self.control.store().get(job.id).await {
            Ok(current) if current.state.is_terminal() => report.finalized += 1,
            Ok(current) => match self.control.settle(&current).await {
                Ok(Some(_)) => report.finalized += 1,
                Ok(None) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "failed to settle job");
                    report.errors += 1;
                }
            },
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to reload job");
                report.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ControlConfig;
    use crate::machine::JobStateMachine;
    use crate::stores::MemoryJobStore;
    use crate::testing::{MockFailure, MockWorkerPool};
    use crate::traits::store::JobStore;
    use crate::types::{JobEvent, NewJob};

    fn setup() -> (Arc<MemoryJobStore>, Arc<MockWorkerPool>, ControlApi) {
        let store = Arc::new(MemoryJobStore::new());
        let pool = Arc::new(MockWorkerPool::new());
        let api = ControlApi::new(store.clone(), pool.clone(), ControlConfig::default());
        (store, pool, api)
    }

    /// A job marked Running whose dispatch never happened.
    async fn orphaned(store: &Arc<MemoryJobStore>) -> Job {
        let job = store.create(NewJob::new(["https://a.org"])).await.unwrap();
        JobStateMachine::new(store.clone())
            .request_transition(job.id, JobEvent::Start)
            .await
            .unwrap()
            .into_job()
    }

    #[tokio::test]
    async fn redispatches_running_job_without_tasks() {
        let (store, pool, api) = setup();
        let job = orphaned(&store).await;

        let report = Reconciler::new(api).reconcile().await.unwrap();

        assert_eq!(report.redispatched, 1);
        assert_eq!(pool.submissions().len(), 1);
        assert_eq!(store.task_handles_for_job(job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn defers_when_pool_unavailable() {
        let (store, pool, api) = setup();
        let job = orphaned(&store).await;
        pool.fail_submissions(MockFailure::Saturated);

        let report = Reconciler::new(api).reconcile().await.unwrap();

        assert_eq!(report.deferred, 1);
        assert_eq!(store.get(job.id).await.unwrap().state, JobState::Pending);
    }

    #[tokio::test]
    async fn repolls_jobs_with_tasks() {
        let (store, pool, api) = setup();
        let job = api.create(NewJob::new(["https://a.org"])).await.unwrap();
        api.start(job.id).await.unwrap();
        let (task_id, _) = pool.last_submission().unwrap();
        pool.set_report(pool.success_report(&task_id).unwrap());

        let report = Reconciler::new(api).reconcile().await.unwrap();

        assert_eq!(report.polled, 1);
        assert_eq!(report.finalized, 1);
        assert_eq!(store.get(job.id).await.unwrap().state, JobState::Completed);
    }
}
