// HTTP routes
pub mod health;
pub mod jobs;
pub mod worker_events;

pub use health::*;
pub use jobs::*;
pub use worker_events::*;
