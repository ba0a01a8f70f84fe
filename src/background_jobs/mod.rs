//! Background job scheduling and execution.
//!
//! Periodic maintenance of the catalog core: index reconciliation and
//! download grant expiry.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::JobScheduler;
