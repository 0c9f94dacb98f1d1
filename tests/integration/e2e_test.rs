//! End-to-end integration tests

use pulse_matrix::clock::{Scale, Tick, TickReason, TokioClock};
use pulse_matrix::config::{Config, JobsConfig, ScaleConfig};
use pulse_matrix::matrix::{MatrixPipeline, MetricType, SqliteMatrixStore};
use pulse_matrix::orchestrator::{Orchestrator, CYCLE_JOB};
use pulse_matrix::poll::PollHub;
use pulse_matrix::prices::{PriceSnapshot, StaticPriceSource};
use pulse_matrix::scheduler::{JobOutcome, Scheduler};
use std::sync::Arc;
use std::time::Duration;

fn snapshot() -> PriceSnapshot {
    PriceSnapshot::new("USDT")
        .with_symbol("BTC", "USDT", 60_000.0, Some(58_000.0))
        .with_symbol("ETH", "USDT", 3_000.0, Some(3_100.0))
        .with_symbol("SOL", "USDT", 150.0, Some(140.0))
        .with_symbol("ETH", "BTC", 0.05, Some(0.052))
}

fn universe() -> Vec<String> {
    ["BTC", "ETH", "SOL"].iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_config_example_loads() {
    let config: Config = toml::from_str(include_str!("../../config.toml.example")).unwrap();
    config.validate().unwrap();
    assert_eq!(config.scales.cycle_ms, 60_000);
    assert_eq!(config.matrix.metrics, MetricType::ALL.to_vec());
}

#[tokio::test]
async fn test_ten_base_ticks_commit_two_cycles() {
    let scheduler = Scheduler::new();
    let hub = PollHub::new(
        &ScaleConfig {
            continuous_ms: Some(1_000),
            sampling_ms: None,
            cycle_ms: 4_000,
            window_ms: None,
        },
        0,
        scheduler.clone(),
        Arc::new(TokioClock::new(0)),
        "e2e",
    )
    .unwrap();
    assert_eq!(hub.plan().base_period_ms, 1_000);

    let store = SqliteMatrixStore::open_in_memory().unwrap();
    let pipeline = Arc::new(MatrixPipeline::new(store, MetricType::ALL.to_vec()));
    let orchestrator = Arc::new(Orchestrator::new(
        pipeline.clone(),
        Arc::new(StaticPriceSource::new(snapshot())),
        universe(),
        "USDT",
        "e2e",
    ));
    orchestrator
        .register(
            &scheduler,
            &JobsConfig::default(),
            Scale::Cycle,
            Duration::from_secs(3_600),
        )
        .unwrap();

    let mut cycles = hub.subscribe(Scale::Cycle);
    for i in 1..=10 {
        let tick = Tick::new(Scale::Base, i * 1_000, 1_000).with_session(Some("e2e".to_string()));
        hub.on_base_tick(&tick).await;
    }

    let mut fired = Vec::new();
    while let Some(cycle) = cycles.try_recv() {
        assert_eq!(cycle.cycle_ts % 4_000, 0);
        assert_eq!(cycle.reason, TickReason::Interval);
        let outcomes = scheduler.on_tick(&cycle).await;
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, JobOutcome::Completed { job, .. } if job == CYCLE_JOB)));
        fired.push(cycle.cycle_ts);
    }
    assert_eq!(fired, vec![4_000, 8_000]);

    let report = orchestrator.last_report().unwrap();
    assert_eq!(report.cycle_ts, 8_000);
    assert!(report.is_complete(), "{:?}", report);

    let (ts, cells) = pipeline
        .latest_snapshot(MetricType::IdPct, i64::MAX)
        .unwrap()
        .unwrap();
    assert_eq!(ts, 8_000);
    assert_eq!(cells.len(), 6);
    // Prices did not move between the two cycles
    assert!(cells.iter().all(|c| c.value == Some(0.0)));
}

#[tokio::test]
async fn test_reference_trigger_runs_one_cycle() {
    let scheduler = Scheduler::new();
    let hub = PollHub::new(
        &ScaleConfig {
            continuous_ms: None,
            sampling_ms: None,
            cycle_ms: 60_000,
            window_ms: None,
        },
        0,
        scheduler.clone(),
        Arc::new(TokioClock::new(0)),
        "reference",
    )
    .unwrap();

    let store = SqliteMatrixStore::open_in_memory().unwrap();
    let pipeline = Arc::new(MatrixPipeline::new(store, vec![MetricType::Benchmark]));
    let orchestrator = Arc::new(Orchestrator::new(
        pipeline.clone(),
        Arc::new(StaticPriceSource::new(snapshot())),
        universe(),
        "USDT",
        "reference",
    ));
    scheduler
        .register(orchestrator.cycle_job(&JobsConfig::default()))
        .unwrap();

    let tick = hub.trigger_reference(1_700_000_030_000).unwrap();
    assert_eq!(tick.cycle_ts, 1_699_999_980_000);
    assert_eq!(tick.reason, TickReason::Reference);

    scheduler.on_tick(&tick).await;
    let report = orchestrator.last_report().unwrap();
    assert_eq!(report.cycle_ts, tick.cycle_ts);
    assert_eq!(report.session_id, "reference");
}
