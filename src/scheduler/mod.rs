//! Job scheduler module
//!
//! Dispatches ticks to registered jobs with per-job policy:
//! - predicate filtering
//! - dedupe-key mutual exclusion (skip if busy, never queue)
//! - cooldown between runs of the same key
//! - timeout that abandons the result, not the work
//! - fixed-backoff bounded retry
//! - one-shot jobs

mod engine;
mod job;

pub use engine::Scheduler;
pub use job::{Job, JobFuture, JobOutcome, RetryPolicy, SchedulerError};
