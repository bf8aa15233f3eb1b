//! Scheduler seam for periodic jobs.
//!
//! The hub only supplies job actions; the scheduler implementation (and its
//! clock) belongs to the host process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// A named periodic action. Errors are handled inside `run`; the scheduler
/// observes nothing.
#[async_trait]
pub trait CronJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self);
}

pub trait Scheduler: Send + Sync {
    fn register(&self, every: Duration, job: Arc<dyn CronJob>);
}
