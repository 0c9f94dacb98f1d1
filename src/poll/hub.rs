//! Multi-scale tick hub driven by one base metronome

use super::plan::{HubError, ScalePlan};
use crate::clock::{
    floor_to_period, Clock, Metronome, MetronomeConfig, Scale, Subscription, Tick, TickEmitter,
    TickReason, TickStream,
};
use crate::config::ScaleConfig;
use crate::scheduler::{Job, JobOutcome, Scheduler};
use crate::telemetry::{self, GaugeMetric};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Running base clock and the driver feeding it into the scheduler
struct BaseTimer {
    metronome: Metronome,
    driver: JoinHandle<()>,
}

/// Derives continuous/sampling/cycle/window cadences from one base clock
///
/// Each derived scale is a scheduler job (`poll:<scale>`) that fires on every
/// k-th base tick and re-stamps the tick onto the scale's own period.
pub struct PollHub {
    plan: Arc<RwLock<ScalePlan>>,
    emitters: Arc<HashMap<Scale, TickEmitter>>,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    session_id: String,
    immediate: bool,
    base: Mutex<Option<BaseTimer>>,
}

impl PollHub {
    /// Resolve the scale plan and register the scale jobs on `scheduler`
    pub fn new(
        config: &ScaleConfig,
        origin_ms: i64,
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
        session_id: impl Into<String>,
    ) -> Result<Self, HubError> {
        let plan = ScalePlan::resolve(config, origin_ms)?;
        let emitters: HashMap<Scale, TickEmitter> = [Scale::Base]
            .into_iter()
            .chain(Scale::DERIVED)
            .map(|scale| (scale, TickEmitter::new()))
            .collect();

        let hub = Self {
            plan: Arc::new(RwLock::new(plan)),
            emitters: Arc::new(emitters),
            scheduler,
            clock,
            session_id: session_id.into(),
            immediate: false,
            base: Mutex::new(None),
        };
        hub.register_scale_jobs()?;
        hub.log_plan();
        Ok(hub)
    }

    /// Emit one base tick synchronously on start
    pub fn with_immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current period table
    pub fn plan(&self) -> ScalePlan {
        read(&self.plan).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.base).is_some()
    }

    /// Start the base metronome; a second call while running is a no-op
    pub fn start(&self) {
        let mut base = lock(&self.base);
        if base.is_some() {
            return;
        }
        *base = Some(self.spawn_base_timer());
        tracing::info!(
            base_period_ms = read(&self.plan).base_period_ms,
            session_id = %self.session_id,
            "Poll hub started"
        );
    }

    /// Stop emitting; in-flight jobs run to completion
    ///
    /// Scale streams end once their buffered ticks are drained.
    pub fn stop(&self) {
        let Some(timer) = lock(&self.base).take() else {
            return;
        };
        timer.metronome.stop();
        drop(timer.driver);
        for emitter in self.emitters.values() {
            emitter.close_streams();
        }
        tracing::info!(session_id = %self.session_id, "Poll hub stopped");
    }

    /// Swap the period table; restarts the base clock if its period changed
    ///
    /// On error the previous plan stays in effect.
    pub fn reconfigure(&self, config: &ScaleConfig) -> Result<ScalePlan, HubError> {
        let origin = read(&self.plan).origin_ms;
        let next = ScalePlan::resolve(config, origin)?;

        let base_changed = {
            let mut plan = write(&self.plan);
            let changed = plan.base_period_ms != next.base_period_ms;
            *plan = next.clone();
            changed
        };
        self.log_plan();

        if base_changed {
            // Stopped outside the lock: stop() waits for a base tick in flight
            let old = lock(&self.base).take();
            if let Some(old) = old {
                old.metronome.stop();
                drop(old.driver);
                let mut base = lock(&self.base);
                if base.is_none() {
                    *base = Some(self.spawn_base_timer());
                }
                tracing::info!(
                    base_period_ms = next.base_period_ms,
                    "Base period changed, metronome restarted"
                );
            }
        }

        Ok(next)
    }

    /// Offer a base tick to the scheduler directly
    pub async fn on_base_tick(&self, tick: &Tick) -> Vec<JobOutcome> {
        self.scheduler.on_tick(tick).await
    }

    /// Emit an out-of-band tick on `scale`, bypassing the cadence
    ///
    /// The timestamp is floored onto the scale's period.
    pub fn trigger(&self, scale: Scale, ts: i64, reason: TickReason) -> Result<Tick, HubError> {
        let (period, origin) = {
            let plan = read(&self.plan);
            let period = plan
                .period_of(scale)
                .ok_or(HubError::ScaleNotConfigured(scale))?;
            (period, plan.origin_ms)
        };

        let tick = Tick::new(scale, floor_to_period(ts, period, origin), period)
            .with_reason(reason)
            .with_session(Some(self.session_id.clone()));
        tracing::info!(scale = %scale, cycle_ts = tick.cycle_ts, reason = reason.as_str(), "Triggered tick");
        self.emitter(scale).emit(&tick);
        Ok(tick)
    }

    /// Force a cycle for the edge containing `now`
    pub fn trigger_loop(&self, now: i64) -> Result<Tick, HubError> {
        self.trigger(Scale::Cycle, now, TickReason::Manual)
    }

    /// Emit a reference cycle tick for the edge containing `ts`
    pub fn trigger_reference(&self, ts: i64) -> Result<Tick, HubError> {
        self.trigger(Scale::Cycle, ts, TickReason::Reference)
    }

    /// Open a dedicated tick stream for one consumer of `scale`
    pub fn subscribe(&self, scale: Scale) -> TickStream {
        self.emitter(scale).subscribe()
    }

    /// Register a callback for `scale`
    pub fn on<F>(&self, scale: Scale, listener: F) -> Subscription
    where
        F: Fn(&Tick) + Send + Sync + 'static,
    {
        self.emitter(scale).on(listener)
    }

    fn emitter(&self, scale: Scale) -> &TickEmitter {
        // Every scale gets an emitter in `new`
        &self.emitters[&scale]
    }

    fn spawn_base_timer(&self) -> BaseTimer {
        let plan = read(&self.plan).clone();
        let metronome = Metronome::new(
            MetronomeConfig::new(plan.base_period_ms)
                .origin(plan.origin_ms)
                .immediate(self.immediate)
                .session(Some(self.session_id.clone())),
            Arc::clone(&self.clock),
        );

        let base_emitter = self.emitters[&Scale::Base].clone();
        metronome.on(move |tick| {
            telemetry::record_tick(Scale::Base);
            base_emitter.emit(tick);
        });
        let driver = self.scheduler.drive(metronome.subscribe());
        metronome.start();
        telemetry::set_gauge(GaugeMetric::BasePeriodMs, plan.base_period_ms as f64);

        BaseTimer { metronome, driver }
    }

    fn register_scale_jobs(&self) -> Result<(), HubError> {
        for scale in Scale::DERIVED {
            let plan = Arc::clone(&self.plan);
            let predicate_plan = Arc::clone(&self.plan);
            let emitters = Arc::clone(&self.emitters);

            let job = Job::new(format!("poll:{}", scale), move |tick: Tick| {
                let plan = Arc::clone(&plan);
                let emitters = Arc::clone(&emitters);
                async move {
                    let scaled = {
                        let plan = read(&plan);
                        plan.fires(scale, tick.cycle_ts).zip(plan.period_of(scale))
                    };
                    if let Some((cycle_ts, period_ms)) = scaled {
                        let scaled_tick = Tick::new(scale, cycle_ts, period_ms)
                            .with_reason(tick.reason)
                            .with_session(tick.session_id.clone());
                        telemetry::record_tick(scale);
                        emitters[&scale].emit(&scaled_tick);
                    }
                    Ok(())
                }
            })
            .when(move |tick| {
                tick.scale == Scale::Base && read(&predicate_plan).fires(scale, tick.cycle_ts).is_some()
            });

            self.scheduler.register(job)?;
        }
        Ok(())
    }

    fn log_plan(&self) {
        let plan = read(&self.plan);
        for (scale, entry) in &plan.scales {
            tracing::info!(
                scale = %scale,
                requested_ms = entry.requested_ms,
                period_ms = entry.period_ms,
                every = entry.every,
                base_period_ms = plan.base_period_ms,
                "Scale resolved"
            );
        }
    }
}

impl Drop for PollHub {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read(plan: &RwLock<ScalePlan>) -> std::sync::RwLockReadGuard<'_, ScalePlan> {
    plan.read().unwrap_or_else(|e| e.into_inner())
}

fn write(plan: &RwLock<ScalePlan>) -> std::sync::RwLockWriteGuard<'_, ScalePlan> {
    plan.write().unwrap_or_else(|e| e.into_inner())
}

fn lock(base: &Mutex<Option<BaseTimer>>) -> std::sync::MutexGuard<'_, Option<BaseTimer>> {
    base.lock().unwrap_or_else(|e| e.into_inner())
}
