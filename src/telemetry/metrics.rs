//! Prometheus metrics

use crate::clock::Scale;
use crate::scheduler::JobOutcome;
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// One job execution including retries
    Job,
    /// Price snapshot fetch
    PriceFetch,
    /// Full matrix cycle (compute, stage, commit)
    Cycle,
    /// Commit transaction
    Commit,
}

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Resolved base period of the poll hub
    BasePeriodMs,
    /// Missing cells in the last committed snapshot
    LastMissingCells,
    /// 1 when the last committed snapshot was complete
    LastSnapshotComplete,
    /// Coins in the configured universe
    UniverseSize,
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::Job => "pulse_job_duration_ms",
        LatencyMetric::PriceFetch => "pulse_price_fetch_duration_ms",
        LatencyMetric::Cycle => "pulse_cycle_duration_ms",
        LatencyMetric::Commit => "pulse_commit_duration_ms",
    };

    metrics::histogram!(metric_name).record(duration.as_secs_f64() * 1_000.0);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    let metric_name = match metric {
        GaugeMetric::BasePeriodMs => "pulse_base_period_ms",
        GaugeMetric::LastMissingCells => "pulse_last_missing_cells",
        GaugeMetric::LastSnapshotComplete => "pulse_last_snapshot_complete",
        GaugeMetric::UniverseSize => "pulse_universe_size",
    };

    metrics::gauge!(metric_name).set(value);
}

/// Count a job outcome by job name and outcome label
pub fn record_job_outcome(outcome: &JobOutcome) {
    metrics::counter!(
        "pulse_job_outcomes_total",
        "job" => outcome.job().to_string(),
        "outcome" => outcome.label()
    )
    .increment(1);
}

/// Count a tick emitted on a scale
pub fn record_tick(scale: Scale) {
    metrics::counter!("pulse_ticks_total", "scale" => scale.as_str()).increment(1);
}

/// Count matrix cells written to staging or committed storage
pub fn record_cells(stage: &'static str, metric_type: &'static str, cells: usize) {
    metrics::counter!(
        "pulse_matrix_cells_total",
        "stage" => stage,
        "metric" => metric_type
    )
    .increment(cells as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_latency(LatencyMetric::Cycle, Duration::from_millis(12));
        set_gauge(GaugeMetric::BasePeriodMs, 1_000.0);
        record_tick(Scale::Cycle);
        record_cells("staged", "benchmark", 6);
        record_job_outcome(&JobOutcome::Completed {
            job: "a".to_string(),
            key: "a".to_string(),
            attempts: 1,
        });
    }
}
