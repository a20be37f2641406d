//! Data types shared by stores, the state machine and the control surface.

pub mod event;
pub mod job;
pub mod task_handle;
pub mod work_item;

pub use event::JobEvent;
pub use job::{Job, JobId, JobSnapshot, JobState, NewJob, ProgressDelta};
pub use task_handle::{ExternalStatus, TaskHandle};
pub use work_item::{ItemEvent, ItemOutcome, ItemState, WorkItem, WorkItemId};
