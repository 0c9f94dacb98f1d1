//! Live poll hub tests on tokio's paused clock

use pulse_matrix::clock::{Scale, Tick, TokioClock};
use pulse_matrix::config::ScaleConfig;
use pulse_matrix::orchestrator;
use pulse_matrix::poll::PollHub;
use pulse_matrix::scheduler::{Job, Scheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn hub(scheduler: &Scheduler, config: ScaleConfig) -> PollHub {
    PollHub::new(
        &config,
        0,
        scheduler.clone(),
        Arc::new(TokioClock::new(0)),
        "live",
    )
    .unwrap()
}

fn scales(continuous: i64, cycle: i64, window: Option<i64>) -> ScaleConfig {
    ScaleConfig {
        continuous_ms: Some(continuous),
        sampling_ms: None,
        cycle_ms: cycle,
        window_ms: window,
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_scale_tick_is_a_multiple_of_its_period() {
    let scheduler = Scheduler::new();
    let hub = hub(&scheduler, scales(15_000, 60_000, Some(120_000)));
    assert_eq!(hub.plan().base_period_ms, 15_000);

    let seen: Arc<Mutex<Vec<Tick>>> = Arc::new(Mutex::new(Vec::new()));
    for scale in [Scale::Continuous, Scale::Cycle, Scale::Window] {
        let seen = seen.clone();
        hub.on(scale, move |tick| seen.lock().unwrap().push(tick.clone()));
    }

    hub.start();
    tokio::time::sleep(Duration::from_millis(240_500)).await;
    hub.stop();

    let seen = seen.lock().unwrap();
    let count = |scale| seen.iter().filter(|t| t.scale == scale).count();
    assert_eq!(count(Scale::Continuous), 16);
    assert_eq!(count(Scale::Cycle), 4);
    assert_eq!(count(Scale::Window), 2);
    assert!(seen.iter().all(|t| t.cycle_ts % t.period_ms == 0));
}

#[tokio::test(start_paused = true)]
async fn test_busy_cycle_job_skips_instead_of_queueing() {
    let scheduler = Scheduler::new();
    let hub = hub(&scheduler, scales(1_000, 4_000, None));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    scheduler
        .register(
            Job::new("slow-cycle", move |_tick| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(6_000)).await;
                    Ok(())
                }
            })
            .when(|tick| tick.scale == Scale::Cycle),
        )
        .unwrap();
    let _listeners = orchestrator::listen(&hub, &[Scale::Cycle]);

    hub.start();
    // Cycles at 4s (runs until 10s), 8s (skipped) and 12s
    tokio::time::sleep(Duration::from_millis(12_500)).await;
    hub.stop();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_restarts_base_clock() {
    let scheduler = Scheduler::new();
    let hub = hub(&scheduler, scales(1_000, 4_000, None));
    let mut base = hub.subscribe(Scale::Base);

    hub.start();
    assert_eq!(base.recv().await.unwrap().cycle_ts, 1_000);

    hub.reconfigure(&scales(2_000, 4_000, None)).unwrap();
    let next = base.recv().await.unwrap();
    assert_eq!(next.period_ms, 2_000);
    assert_eq!(next.cycle_ts, 2_000);

    hub.stop();
}
