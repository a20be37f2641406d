// Adapters to external services
pub mod worker_pool;

pub use worker_pool::HttpWorkerPool;
