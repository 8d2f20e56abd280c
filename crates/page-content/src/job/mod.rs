//! Job scheduling for page loads
//!
//! [`JobEngine`] is the scheduler seam and [`PriorityJobEngine`] the bundled
//! tokio implementation. [`PageJob`] sits on top and guarantees at most one
//! outstanding request per (page, command).

mod engine;
mod page_job;
mod request;

pub use engine::{JobCommand, JobEngine, PriorityJobEngine};
pub use page_job::{JobRequestOptions, PageJob, PageJobCommand};
pub use request::{JobPriority, JobRequestHandle, JobStatus};
