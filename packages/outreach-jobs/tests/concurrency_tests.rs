//! Racing control requests and worker reports against one job.

use std::sync::Arc;

use futures::future::join_all;
use outreach_jobs::testing::MockWorkerPool;
use outreach_jobs::{
    ControlApi, ControlConfig, ErrorKind, ItemEvent, ItemOutcome, JobState, JobStore,
    MemoryJobStore, NewJob, ProgressAggregator,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_starts_have_one_winner() {
    let pool = Arc::new(MockWorkerPool::new());
    let api = ControlApi::new(
        Arc::new(MemoryJobStore::new()),
        pool.clone(),
        ControlConfig::default(),
    );
    let job_id = api
        .create(NewJob::new(["https://a.example", "https://b.example"]))
        .await
        .unwrap()
        .id;

    let attempts = (0..8).map(|_| {
        let api = api.clone();
        tokio::spawn(async move { api.start(job_id).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.into_iter().filter_map(|r| r.err()) {
        assert!(matches!(
            err.kind(),
            ErrorKind::Conflict | ErrorKind::InvalidTransition
        ));
    }
    assert_eq!(pool.submissions().len(), 1);
    assert_eq!(
        api.get_status(job_id).await.unwrap().state,
        JobState::Running
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_outcomes_count_exactly_once() {
    let store = Arc::new(MemoryJobStore::new());
    let pool = Arc::new(MockWorkerPool::new());
    let api = ControlApi::new(store.clone(), pool, ControlConfig::default());
    let urls: Vec<String> = (0..20).map(|i| format!("https://org{i}.example")).collect();
    let job = api.create(NewJob::new(urls)).await.unwrap();
    api.start(job.id).await.unwrap();

    let aggregator = ProgressAggregator::new(store.clone(), 5);
    let items = store.work_items(job.id).await.unwrap();

    // Every item reported three times, interleaved across tasks.
    let mut tasks = Vec::new();
    for _ in 0..3 {
        for (i, item) in items.iter().enumerate() {
            let aggregator = aggregator.clone();
            let outcome = if i % 5 == 0 {
                ItemOutcome::error("bounced")
            } else {
                ItemOutcome::success("sent")
            };
            let event = ItemEvent::new(job.id, item.id, outcome);
            tasks.push(tokio::spawn(async move { aggregator.apply(event).await }));
        }
    }
    for task in join_all(tasks).await {
        task.unwrap().unwrap();
    }

    let job = store.get(job.id).await.unwrap();
    assert_eq!((job.completed_items, job.failed_items), (16, 4));
    assert_eq!(job.state, JobState::Completed);
}
