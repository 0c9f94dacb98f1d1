//! Cycle orchestrator
//!
//! Consumes cycle ticks: fetches a price snapshot, runs the matrix pipeline
//! and appends a ledger entry. Runs as a scheduler job so overlapping cycles
//! skip instead of queueing.

use crate::clock::{Scale, Subscription, Tick};
use crate::config::JobsConfig;
use crate::ledger::{Ledger, LedgerEntry};
use crate::matrix::{CycleReport, MatrixPipeline, MatrixStore};
use crate::poll::PollHub;
use crate::prices::PriceSource;
use crate::scheduler::{Job, RetryPolicy, Scheduler, SchedulerError};
use anyhow::Context;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Name of the job that runs one pipeline cycle
pub const CYCLE_JOB: &str = "matrix-cycle";
/// Name of the job that prunes old staged rows
pub const RETENTION_JOB: &str = "staging-retention";

/// Ledger plus the result of its startup probe
struct LedgerSink {
    ledger: Arc<dyn Ledger>,
    topic: String,
    available: bool,
}

/// Glue between cycle ticks and the matrix pipeline
pub struct Orchestrator<S> {
    pipeline: Arc<MatrixPipeline<S>>,
    prices: Arc<dyn PriceSource>,
    universe: Arc<Vec<String>>,
    quote_asset: String,
    session_id: String,
    ledger: Option<LedgerSink>,
    last_report: Mutex<Option<CycleReport>>,
}

impl<S: MatrixStore + 'static> Orchestrator<S> {
    pub fn new(
        pipeline: Arc<MatrixPipeline<S>>,
        prices: Arc<dyn PriceSource>,
        universe: Vec<String>,
        quote_asset: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            prices,
            universe: Arc::new(universe),
            quote_asset: quote_asset.into(),
            session_id: session_id.into(),
            ledger: None,
            last_report: Mutex::new(None),
        }
    }

    /// Attach a ledger, probing it once
    ///
    /// A ledger that fails the probe stays attached but disabled, with a single
    /// warning instead of one per cycle.
    pub async fn with_ledger(mut self, ledger: Arc<dyn Ledger>, topic: impl Into<String>) -> Self {
        let available = match ledger.probe().await {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!("Ledger table not found, ledger appends disabled");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ledger probe failed, ledger appends disabled");
                false
            }
        };
        self.ledger = Some(LedgerSink {
            ledger,
            topic: topic.into(),
            available,
        });
        self
    }

    pub fn pipeline(&self) -> &Arc<MatrixPipeline<S>> {
        &self.pipeline
    }

    pub fn ledger_available(&self) -> bool {
        self.ledger.as_ref().is_some_and(|l| l.available)
    }

    /// Report of the most recent successful cycle
    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Run one cycle for `tick`
    pub async fn run_cycle(&self, tick: &Tick) -> anyhow::Result<CycleReport> {
        let session_id = tick
            .session_id
            .clone()
            .unwrap_or_else(|| self.session_id.clone());

        let snapshot = self
            .prices
            .fetch_snapshot(&self.universe, &self.quote_asset)
            .await
            .context("price snapshot fetch failed")?;
        if snapshot.is_empty() {
            tracing::warn!(cycle_ts = tick.cycle_ts, "Empty price snapshot, cells will be missing");
        }

        let pipeline = Arc::clone(&self.pipeline);
        let universe = Arc::clone(&self.universe);
        let ts = tick.cycle_ts;
        let session = session_id.clone();
        let report = tokio::task::spawn_blocking(move || {
            pipeline.run_cycle(&session, ts, &universe, &snapshot)
        })
        .await
        .context("pipeline task panicked")??;

        self.append_ledger(&report).await;
        *self.last_report.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());

        Ok(report)
    }

    /// Delete staged rows older than `retention` before `tick`
    pub async fn prune_staging(&self, tick: &Tick, retention: Duration) -> anyhow::Result<usize> {
        let before = tick.cycle_ts - retention.as_millis() as i64;
        let pipeline = Arc::clone(&self.pipeline);
        let deleted =
            tokio::task::spawn_blocking(move || pipeline.store().prune_staging(before)).await??;
        if deleted > 0 {
            tracing::info!(deleted, before_ts = before, "Pruned staged rows");
        }
        Ok(deleted)
    }

    async fn append_ledger(&self, report: &CycleReport) {
        let Some(sink) = self.ledger.as_ref().filter(|l| l.available) else {
            return;
        };
        let entry = match LedgerEntry::cycle_committed(&sink.topic, report) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build ledger entry");
                return;
            }
        };
        match sink.ledger.append(&entry).await {
            Ok(true) => tracing::debug!(key = %entry.idempotency_key, "Ledger entry appended"),
            Ok(false) => tracing::debug!(key = %entry.idempotency_key, "Ledger entry already present"),
            Err(e) => tracing::warn!(error = %e, key = %entry.idempotency_key, "Ledger append failed"),
        }
    }

    /// Job running [`Orchestrator::run_cycle`] on cycle ticks
    ///
    /// All cycles share one dedupe key, so a cycle still running when the next
    /// cycle tick arrives makes that tick skip.
    pub fn cycle_job(self: &Arc<Self>, jobs: &JobsConfig) -> Job {
        let orchestrator = Arc::clone(self);
        let mut job = Job::new(CYCLE_JOB, move |tick: Tick| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run_cycle(&tick).await.map(|_| ()) }
        })
        .when(|tick| tick.scale == Scale::Cycle)
        .dedupe_by(|_| "pipeline".to_string())
        .timeout(jobs.cycle_timeout());

        if jobs.retry_max > 0 {
            job = job.retry(RetryPolicy::fixed(jobs.retry_max, jobs.retry_backoff()));
        }
        if let Some(cooldown) = jobs.cooldown() {
            job = job.cooldown(cooldown);
        }
        job
    }

    /// Job pruning staged rows on `scale` ticks
    pub fn retention_job(self: &Arc<Self>, scale: Scale, retention: Duration) -> Job {
        let orchestrator = Arc::clone(self);
        Job::new(RETENTION_JOB, move |tick: Tick| {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator
                    .prune_staging(&tick, retention)
                    .await
                    .map(|_| ())
            }
        })
        .when(move |tick| tick.scale == scale)
    }

    /// Register the cycle and retention jobs on `scheduler`
    pub fn register(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        jobs: &JobsConfig,
        retention_scale: Scale,
        retention: Duration,
    ) -> Result<(), SchedulerError> {
        scheduler.register(self.cycle_job(jobs))?;
        scheduler.register(self.retention_job(retention_scale, retention))?;
        tracing::info!(
            universe = self.universe.len(),
            retention_scale = %retention_scale,
            "Orchestrator jobs registered"
        );
        Ok(())
    }
}

/// Feed `scales` ticks from `hub` back into its scheduler
///
/// Each tick is dispatched on its own task, like the base driver.
pub fn listen(hub: &PollHub, scales: &[Scale]) -> Vec<Subscription> {
    let mut scales = scales.to_vec();
    scales.sort();
    scales.dedup();

    scales
        .into_iter()
        .map(|scale| {
            let scheduler = hub.scheduler().clone();
            hub.on(scale, move |tick| {
                let scheduler = scheduler.clone();
                let tick = tick.clone();
                tokio::spawn(async move {
                    scheduler.on_tick(&tick).await;
                });
            })
        })
        .collect()
}

/// Scale the retention job runs on: window when configured, else cycle
pub fn retention_scale(hub: &PollHub) -> Scale {
    if hub.plan().entry(Scale::Window).is_some() {
        Scale::Window
    } else {
        Scale::Cycle
    }
}
