//! Tick-driven job dispatcher

use super::job::{Job, JobOutcome, SchedulerError};
use crate::clock::{Tick, TickStream};
use crate::telemetry::{self, LatencyMetric};
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Default)]
struct SchedulerState {
    /// Registration order is execution order
    jobs: Vec<Job>,
    in_flight: HashSet<String>,
    last_completed: HashMap<String, Instant>,
}

/// Fans ticks out to registered jobs
///
/// Jobs run one after another in registration order for a given tick. A job
/// whose key is still running from an earlier tick is skipped for this one,
/// never queued.
#[derive(Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
}

enum Admission {
    Run(InFlightGuard),
    Skip(JobOutcome),
}

/// Clears the in-flight mark when dropped, including on cancellation
struct InFlightGuard {
    key: String,
    state: Arc<Mutex<SchedulerState>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.state).in_flight.remove(&self.key);
    }
}

enum AttemptError {
    Failed(anyhow::Error),
    TimedOut(Duration),
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job, replacing any job with the same name in place
    pub fn register(&self, job: Job) -> Result<(), SchedulerError> {
        job.validate()?;
        let mut state = lock(&self.state);
        match state.jobs.iter_mut().find(|j| j.name == job.name) {
            Some(existing) => {
                tracing::debug!(job = %job.name, "Replacing job");
                *existing = job;
            }
            None => {
                tracing::debug!(job = %job.name, "Registering job");
                state.jobs.push(job);
            }
        }
        Ok(())
    }

    /// Remove a job by name
    pub fn unregister(&self, name: &str) -> Result<(), SchedulerError> {
        let mut state = lock(&self.state);
        let before = state.jobs.len();
        state.jobs.retain(|j| j.name != name);
        if state.jobs.len() == before {
            return Err(SchedulerError::NotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.state).jobs.iter().any(|j| j.name == name)
    }

    /// Registered job names in execution order
    pub fn job_names(&self) -> Vec<String> {
        lock(&self.state).jobs.iter().map(|j| j.name.clone()).collect()
    }

    /// Keys currently executing
    pub fn in_flight(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.state).in_flight.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Offer a tick to every job
    ///
    /// Jobs whose predicate rejects the tick produce no outcome.
    pub async fn on_tick(&self, tick: &Tick) -> Vec<JobOutcome> {
        let jobs: Vec<Job> = lock(&self.state).jobs.clone();
        let mut outcomes = Vec::new();

        for job in jobs {
            if !predicate_holds(&job, tick) {
                continue;
            }

            let key = job.key_for(tick);
            let guard = match self.admit(&job, &key) {
                Admission::Run(guard) => guard,
                Admission::Skip(outcome) => {
                    tracing::debug!(job = %job.name, key = %key, outcome = outcome.label(), "Job skipped");
                    telemetry::record_job_outcome(&outcome);
                    outcomes.push(outcome);
                    continue;
                }
            };

            let started = Instant::now();
            let result = execute(&job, tick).await;
            lock(&self.state)
                .last_completed
                .insert(key.clone(), Instant::now());
            drop(guard);
            telemetry::record_latency(LatencyMetric::Job, started.elapsed());

            let outcome = match result {
                Ok(attempts) => JobOutcome::Completed {
                    job: job.name.clone(),
                    key,
                    attempts,
                },
                Err(AttemptError::TimedOut(limit)) => {
                    tracing::warn!(
                        job = %job.name,
                        key = %key,
                        timeout_ms = limit.as_millis() as u64,
                        "Job timed out, result discarded"
                    );
                    JobOutcome::TimedOut {
                        job: job.name.clone(),
                        key,
                    }
                }
                Err(AttemptError::Failed(e)) => {
                    tracing::warn!(job = %job.name, key = %key, error = %e, "Job failed");
                    JobOutcome::Failed {
                        job: job.name.clone(),
                        key,
                        error: e.to_string(),
                    }
                }
            };

            if job.once && outcome.is_success() {
                let _ = self.unregister(&job.name);
                tracing::debug!(job = %job.name, "One-shot job finished, unregistered");
            }

            telemetry::record_job_outcome(&outcome);
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Consume a tick stream in the background
    ///
    /// Each tick is dispatched on its own task so a slow job makes later
    /// ticks skip its key instead of piling up behind it.
    pub fn drive(&self, mut ticks: TickStream) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    scheduler.on_tick(&tick).await;
                });
            }
            tracing::debug!("Tick stream ended, scheduler driver exiting");
        })
    }

    fn admit(&self, job: &Job, key: &str) -> Admission {
        let mut state = lock(&self.state);

        if state.in_flight.contains(key) {
            return Admission::Skip(JobOutcome::SkippedInFlight {
                job: job.name.clone(),
                key: key.to_string(),
            });
        }

        if let (Some(cooldown), Some(last)) = (job.cooldown, state.last_completed.get(key)) {
            if last.elapsed() < cooldown {
                return Admission::Skip(JobOutcome::SkippedCooldown {
                    job: job.name.clone(),
                    key: key.to_string(),
                });
            }
        }

        state.in_flight.insert(key.to_string());
        Admission::Run(InFlightGuard {
            key: key.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

fn predicate_holds(job: &Job, tick: &Tick) -> bool {
    let Some(predicate) = &job.predicate else {
        return true;
    };
    match std::panic::catch_unwind(AssertUnwindSafe(|| predicate(tick))) {
        Ok(holds) => holds,
        Err(_) => {
            tracing::warn!(job = %job.name, "Job predicate panicked, skipping job");
            false
        }
    }
}

/// Run a job with its retry policy; returns the number of attempts on success
async fn execute(job: &Job, tick: &Tick) -> Result<u32, AttemptError> {
    let max_attempts = job.retry.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match attempt_once(job, tick.clone()).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt < max_attempts => {
                let reason = match &e {
                    AttemptError::Failed(e) => e.to_string(),
                    AttemptError::TimedOut(_) => "timed out".to_string(),
                };
                tracing::debug!(job = %job.name, attempt, error = %reason, "Attempt failed, retrying");
                tokio::time::sleep(job.retry.backoff()).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn attempt_once(job: &Job, tick: Tick) -> Result<(), AttemptError> {
    let body = (job.action)(tick);

    match job.timeout {
        Some(limit) => {
            // Spawned so that losing the race abandons the result, not the work
            let handle = tokio::spawn(body);
            match tokio::time::timeout(limit, handle).await {
                Ok(Ok(result)) => result.map_err(AttemptError::Failed),
                Ok(Err(join_err)) => Err(AttemptError::Failed(anyhow::anyhow!(
                    "job task aborted: {}",
                    join_err
                ))),
                Err(_) => Err(AttemptError::TimedOut(limit)),
            }
        }
        None => match AssertUnwindSafe(body).catch_unwind().await {
            Ok(result) => result.map_err(AttemptError::Failed),
            Err(_) => Err(AttemptError::Failed(anyhow::anyhow!("job panicked"))),
        },
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
