//! Trait seams: persistence and the external worker pool.

pub mod store;
pub mod worker;

pub use store::{JobMutator, JobStore, OutcomeApplied};
pub use worker::{DispatchBatch, DispatchItem, ExternalItemResult, ExternalTaskReport, WorkerPool};
