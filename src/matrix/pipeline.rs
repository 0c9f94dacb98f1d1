//! Stage then commit pipeline

use super::compute::{id_pct_grid, snapshot_grid};
use super::store::{MatrixStore, StoreError};
use super::types::{
    CompletenessReport, CycleReport, MatrixCell, MatrixGrid, MetricReport, MetricType,
};
use crate::prices::PriceSnapshot;
use crate::telemetry::{self, GaugeMetric, LatencyMetric};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Computes, stages and commits metric grids
///
/// Commits for the same (ts, metric) must not overlap a stage for that key;
/// callers serialize them (the orchestrator runs one cycle at a time).
pub struct MatrixPipeline<S> {
    store: S,
    metrics: Vec<MetricType>,
}

impl<S: MatrixStore> MatrixPipeline<S> {
    pub fn new(store: S, metrics: Vec<MetricType>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metrics(&self) -> &[MetricType] {
        &self.metrics
    }

    /// Stage every finite off-diagonal cell of `grid` for `universe`
    ///
    /// Returns the number of cells staged. Re-staging the same key replaces the
    /// earlier batch, including dropping cells the new grid no longer has.
    pub fn stage(
        &self,
        session_id: &str,
        metric: MetricType,
        ts: i64,
        universe: &[String],
        grid: &MatrixGrid,
    ) -> Result<usize, StoreError> {
        let cells: Vec<(&str, &str, f64)> = grid.finite_pairs(universe).collect();
        let staged = self.store.upsert_staged(session_id, metric, ts, &cells)?;

        telemetry::record_cells("staged", metric.as_str(), staged);
        tracing::debug!(
            session_id = %session_id,
            metric = %metric,
            cycle_ts = ts,
            staged,
            "Staged matrix"
        );
        Ok(staged)
    }

    /// Promote staged rows for (ts, metric) and check completeness
    ///
    /// Runs in one transaction. Without an explicit universe the coins of the
    /// staged rows are used.
    pub fn commit(
        &self,
        session_id: &str,
        metric: MetricType,
        ts: i64,
        universe: Option<&[String]>,
    ) -> Result<CompletenessReport, StoreError> {
        let started = Instant::now();

        let (report, committed) = self.store.with_transaction(|tx| {
            let rows = tx.staged_rows(metric, ts)?;

            let eligible: Vec<String> = match universe {
                Some(coins) => unique(coins.iter().cloned()),
                None => {
                    let mut coins = unique(
                        rows.iter()
                            .flat_map(|r| [r.base.clone(), r.quote.clone()]),
                    );
                    coins.sort();
                    coins
                }
            };
            let eligible_set: HashSet<&str> = eligible.iter().map(String::as_str).collect();
            let staged_pairs: HashSet<(&str, &str)> = rows
                .iter()
                .map(|r| (r.base.as_str(), r.quote.as_str()))
                .collect();

            let n = eligible.len();
            let expected = n * n.saturating_sub(1);
            let staged = rows
                .iter()
                .filter(|r| {
                    r.base != r.quote
                        && eligible_set.contains(r.base.as_str())
                        && eligible_set.contains(r.quote.as_str())
                })
                .count();
            let missing = eligible
                .iter()
                .flat_map(|b| eligible.iter().map(move |q| (b.as_str(), q.as_str())))
                .filter(|(b, q)| b != q && !staged_pairs.contains(&(*b, *q)))
                .count();

            let committed = tx.upsert_committed(metric, ts, &rows)?;
            Ok((CompletenessReport::new(expected, staged, missing), committed))
        })?;

        telemetry::record_latency(LatencyMetric::Commit, started.elapsed());
        telemetry::record_cells("committed", metric.as_str(), committed);

        if report.complete {
            tracing::debug!(
                session_id = %session_id,
                metric = %metric,
                cycle_ts = ts,
                cells = report.staged_cells,
                "Committed matrix"
            );
        } else {
            tracing::warn!(
                session_id = %session_id,
                metric = %metric,
                cycle_ts = ts,
                expected = report.expected_cells,
                staged = report.staged_cells,
                missing = report.missing_count,
                "Committed incomplete matrix"
            );
        }

        Ok(report)
    }

    /// Grid for `metric` at `ts`
    ///
    /// `benchmark` is this cycle's benchmark grid; `id_pct` is derived from it
    /// and the latest committed benchmark strictly before `ts`.
    pub fn compute(
        &self,
        metric: MetricType,
        ts: i64,
        universe: &[String],
        snapshot: &PriceSnapshot,
        benchmark: &MatrixGrid,
    ) -> Result<MatrixGrid, StoreError> {
        match metric {
            MetricType::Benchmark => Ok(benchmark.clone()),
            MetricType::IdPct => {
                let mut previous = HashMap::new();
                for base in universe {
                    for quote in universe.iter().filter(|q| *q != base) {
                        if let Some(prev) =
                            self.store
                                .latest_before(MetricType::Benchmark, base, quote, ts)?
                        {
                            previous.insert((base.clone(), quote.clone()), prev);
                        }
                    }
                }
                Ok(id_pct_grid(universe, benchmark, &previous))
            }
            other => Ok(snapshot_grid(other, universe, snapshot)),
        }
    }

    /// Compute, stage and commit every configured metric for one cycle
    pub fn run_cycle(
        &self,
        session_id: &str,
        ts: i64,
        universe: &[String],
        snapshot: &PriceSnapshot,
    ) -> Result<CycleReport, StoreError> {
        let started = Instant::now();
        let benchmark = snapshot_grid(MetricType::Benchmark, universe, snapshot);

        let mut metrics = Vec::with_capacity(self.metrics.len());
        for &metric in &self.metrics {
            let grid = self.compute(metric, ts, universe, snapshot, &benchmark)?;
            let staged = self.stage(session_id, metric, ts, universe, &grid)?;
            let completeness = self.commit(session_id, metric, ts, Some(universe))?;
            metrics.push(MetricReport {
                metric,
                staged,
                completeness,
            });
        }

        let report = CycleReport {
            cycle_ts: ts,
            session_id: session_id.to_string(),
            metrics,
        };

        telemetry::record_latency(LatencyMetric::Cycle, started.elapsed());
        telemetry::set_gauge(GaugeMetric::LastMissingCells, report.missing_cells() as f64);
        telemetry::set_gauge(
            GaugeMetric::LastSnapshotComplete,
            if report.is_complete() { 1.0 } else { 0.0 },
        );
        tracing::info!(
            session_id = %session_id,
            cycle_ts = ts,
            metrics = report.metrics.len(),
            missing = report.missing_cells(),
            complete = report.is_complete(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Matrix cycle committed"
        );

        Ok(report)
    }

    /// Committed cells of the latest snapshot at or before `ts`
    pub fn latest_snapshot(
        &self,
        metric: MetricType,
        ts: i64,
    ) -> Result<Option<(i64, Vec<MatrixCell>)>, StoreError> {
        match self.store.latest_committed_ts(metric, ts)? {
            Some(latest) => Ok(Some((latest, self.store.committed_rows(metric, latest)?))),
            None => Ok(None),
        }
    }
}

/// Deduplicate preserving first occurrence
fn unique(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
