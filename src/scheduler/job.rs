//! Job descriptors and outcomes

use crate::clock::Tick;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed job body future
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

type Action = Arc<dyn Fn(Tick) -> JobFuture + Send + Sync>;
type Predicate = Arc<dyn Fn(&Tick) -> bool + Send + Sync>;
type DedupeKey = Arc<dyn Fn(&Tick) -> String + Send + Sync>;

/// Retry behaviour after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Single attempt
    #[default]
    None,
    /// Up to `max` extra attempts, sleeping `backoff` between them
    Fixed { max: u32, backoff: Duration },
}

impl RetryPolicy {
    pub fn fixed(max: u32, backoff: Duration) -> Self {
        RetryPolicy::Fixed { max, backoff }
    }

    /// Total attempts allowed, including the first
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryPolicy::None => 1,
            RetryPolicy::Fixed { max, .. } => max.saturating_add(1),
        }
    }

    pub fn backoff(&self) -> Duration {
        match self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { backoff, .. } => *backoff,
        }
    }
}

/// A unit of work driven by ticks
///
/// Built with [`Job::new`] and the chained setters, validated when registered.
#[derive(Clone)]
pub struct Job {
    pub(crate) name: String,
    pub(crate) action: Action,
    pub(crate) predicate: Option<Predicate>,
    pub(crate) dedupe_key: Option<DedupeKey>,
    pub(crate) cooldown: Option<Duration>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: RetryPolicy,
    pub(crate) once: bool,
}

impl Job {
    /// Create a job that runs `action` on every tick
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(Tick) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move |tick| Box::pin(action(tick))),
            predicate: None,
            dedupe_key: None,
            cooldown: None,
            timeout: None,
            retry: RetryPolicy::None,
            once: false,
        }
    }

    /// Only run when `predicate` holds for the tick
    pub fn when<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Tick) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Partition in-flight tracking and cooldown by a key derived from the tick
    pub fn dedupe_by<K>(mut self, key: K) -> Self
    where
        K: Fn(&Tick) -> String + Send + Sync + 'static,
    {
        self.dedupe_key = Some(Arc::new(key));
        self
    }

    /// Minimum time between runs of the same key
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Discard the result of an attempt that takes longer than `timeout`
    ///
    /// The attempt keeps running in the background; only its result is lost.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Unregister after the first successful run
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// In-flight / cooldown key for a tick
    pub fn key_for(&self, tick: &Tick) -> String {
        match &self.dedupe_key {
            Some(key) => format!("{}:{}", self.name, key(tick)),
            None => self.name.clone(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), SchedulerError> {
        if self.name.trim().is_empty() {
            return Err(SchedulerError::EmptyName);
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(SchedulerError::InvalidJob {
                job: self.name.clone(),
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        if let RetryPolicy::Fixed { max: 0, .. } = self.retry {
            return Err(SchedulerError::InvalidJob {
                job: self.name.clone(),
                reason: "fixed retry needs at least one extra attempt".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("has_predicate", &self.predicate.is_some())
            .field("has_dedupe_key", &self.dedupe_key.is_some())
            .field("cooldown", &self.cooldown)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("once", &self.once)
            .finish()
    }
}

/// Result of offering a tick to one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Body succeeded after `attempts` tries
    Completed {
        job: String,
        key: String,
        attempts: u32,
    },
    /// Every attempt failed; `error` is the last one
    Failed {
        job: String,
        key: String,
        error: String,
    },
    /// The last attempt exceeded the job timeout
    TimedOut { job: String, key: String },
    /// A previous run for the same key is still executing
    SkippedInFlight { job: String, key: String },
    /// The key ran too recently
    SkippedCooldown { job: String, key: String },
}

impl JobOutcome {
    pub fn job(&self) -> &str {
        match self {
            JobOutcome::Completed { job, .. }
            | JobOutcome::Failed { job, .. }
            | JobOutcome::TimedOut { job, .. }
            | JobOutcome::SkippedInFlight { job, .. }
            | JobOutcome::SkippedCooldown { job, .. } => job,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            JobOutcome::SkippedInFlight { .. } | JobOutcome::SkippedCooldown { .. }
        )
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed { .. } => "completed",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::TimedOut { .. } => "timed_out",
            JobOutcome::SkippedInFlight { .. } => "skipped_in_flight",
            JobOutcome::SkippedCooldown { .. } => "skipped_cooldown",
        }
    }
}

/// Scheduler errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Job name must not be empty")]
    EmptyName,

    #[error("Invalid job {job}: {reason}")]
    InvalidJob { job: String, reason: String },

    #[error("Job not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Scale;

    fn noop(name: &str) -> Job {
        Job::new(name, |_| async { Ok(()) })
    }

    #[test]
    fn test_key_without_dedupe_is_name() {
        let job = noop("flush");
        let tick = Tick::new(Scale::Cycle, 60_000, 60_000);
        assert_eq!(job.key_for(&tick), "flush");
    }

    #[test]
    fn test_key_with_dedupe() {
        let job = noop("matrix").dedupe_by(|t| t.scale.to_string());
        let tick = Tick::new(Scale::Cycle, 60_000, 60_000);
        assert_eq!(job.key_for(&tick), "matrix:cycle");
    }

    #[test]
    fn test_retry_policy_attempts() {
        assert_eq!(RetryPolicy::None.max_attempts(), 1);
        assert_eq!(
            RetryPolicy::fixed(2, Duration::from_millis(10)).max_attempts(),
            3
        );
        assert_eq!(
            RetryPolicy::fixed(2, Duration::from_millis(10)).backoff(),
            Duration::from_millis(10)
        );
    }

    #[test]
    fn test_validate_rejects_bad_descriptors() {
        assert_eq!(noop("  ").validate(), Err(SchedulerError::EmptyName));
        assert!(noop("a").timeout(Duration::ZERO).validate().is_err());
        assert!(noop("a")
            .retry(RetryPolicy::fixed(0, Duration::ZERO))
            .validate()
            .is_err());
        assert!(noop("a")
            .timeout(Duration::from_secs(1))
            .retry(RetryPolicy::fixed(1, Duration::ZERO))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_outcome_helpers() {
        let outcome = JobOutcome::SkippedCooldown {
            job: "a".to_string(),
            key: "a".to_string(),
        };
        assert!(outcome.is_skipped());
        assert!(!outcome.is_success());
        assert_eq!(outcome.job(), "a");
        assert_eq!(outcome.label(), "skipped_cooldown");
    }
}
