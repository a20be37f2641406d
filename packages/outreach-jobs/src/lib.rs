//! Job lifecycle and progress tracking for the outreach pipeline.
//!
//! A job is an uploaded list of target websites. Each URL becomes a work
//! item that the external worker pool scrapes, writes a message for and
//! submits. This crate owns the job's lifecycle and keeps its progress
//! consistent while control requests and worker reports race each other.
//!
//! # Usage
//!
//! ```rust,ignore
//! use outreach_jobs::{ControlApi, ControlConfig, MemoryJobStore, NewJob};
//! use outreach_jobs::testing::MockWorkerPool;
//!
//! let api = ControlApi::new(
//!     Arc::new(MemoryJobStore::new()),
//!     Arc::new(MockWorkerPool::new()),
//!     ControlConfig::default(),
//! );
//!
//! let job = api.create(NewJob::new(["https://example.org"])).await?;
//! api.start(job.id).await?;
//! ```
//!
//! # Modules
//!
//! - [`machine`] - Transition table and the only writer of job state
//! - [`traits`] - Store and worker pool seams
//! - [`stores`] - Storage implementations (MemoryJobStore, PostgresJobStore)
//! - [`dispatcher`] - Submits work items to the worker pool
//! - [`progress`] - Applies item outcomes exactly once and closes jobs
//! - [`bridge`] - Push and poll intake of worker pool reports
//! - [`control`] - Create/start/pause/resume/stop/status
//! - [`poller`], [`reconcile`] - Background polling and startup recovery
//! - [`testing`] - Mock worker pool for tests

pub mod bridge;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod machine;
pub mod poller;
pub mod progress;
pub mod reconcile;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use bridge::{BridgeOutcome, StatusBridge};
pub use config::{ControlConfig, DispatchConfig, PollerConfig};
pub use control::ControlApi;
pub use dispatcher::TaskDispatcher;
pub use error::{ErrorKind, JobError, Result, WorkerPoolError, WorkerPoolResult};
pub use machine::{next_state, JobStateMachine, Transition};
pub use poller::StatusPoller;
pub use progress::{ProgressAggregator, ProgressUpdate};
pub use reconcile::{ReconcileReport, Reconciler};
pub use stores::MemoryJobStore;
pub use traits::{
    store::{JobMutator, JobStore, OutcomeApplied},
    worker::{DispatchBatch, DispatchItem, ExternalItemResult, ExternalTaskReport, WorkerPool},
};
pub use types::{
    ExternalStatus, ItemEvent, ItemOutcome, ItemState, Job, JobEvent, JobId, JobSnapshot,
    JobState, NewJob, ProgressDelta, TaskHandle, WorkItem, WorkItemId,
};

#[cfg(feature = "postgres")]
pub use stores::PostgresJobStore;
