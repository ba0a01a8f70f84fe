//! Download grant expiry background job.

use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError, JobSchedule, ShutdownBehavior},
};
use std::time::Duration;
use tracing::debug;

/// Deactivates download grants whose expiry has passed.
pub struct GrantExpiryJob {
    interval: Duration,
}

impl GrantExpiryJob {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackgroundJob for GrantExpiryJob {
    fn id(&self) -> &'static str {
        "grant_expiry"
    }

    fn name(&self) -> &'static str {
        "Download Grant Expiry"
    }

    fn description(&self) -> &'static str {
        "Deactivate download grants past their expiry"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(self.interval)
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Single UPDATE
        ShutdownBehavior::WaitForCompletion
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let expired = ctx
            .downloads
            .expire_sweep()
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;
        if expired == 0 {
            debug!("No download grants to expire");
        }
        Ok(())
    }
}
