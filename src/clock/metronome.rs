//! Epoch-aligned periodic clock

use super::{floor_to_period, next_edge, Clock, Scale, Subscription, Tick, TickEmitter, TickStream};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Metronome configuration
#[derive(Debug, Clone)]
pub struct MetronomeConfig {
    /// Tick period in milliseconds
    pub period_ms: i64,
    /// Epoch origin the edges are aligned to
    pub origin_ms: i64,
    /// Emit one tick synchronously from `start()`
    pub immediate: bool,
    /// Scale stamped on emitted ticks
    pub scale: Scale,
    pub session_id: Option<String>,
}

impl MetronomeConfig {
    pub fn new(period_ms: i64) -> Self {
        Self {
            period_ms,
            origin_ms: 0,
            immediate: false,
            scale: Scale::Base,
            session_id: None,
        }
    }

    pub fn origin(mut self, origin_ms: i64) -> Self {
        self.origin_ms = origin_ms;
        self
    }

    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = immediate;
        self
    }

    pub fn session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

#[derive(Default)]
struct TimerState {
    running: bool,
    /// Bumped on every start/stop so a timer from an older chain never emits
    generation: u64,
    last_emitted: Option<i64>,
    /// Thread currently delivering a tick, if any
    emitting_on: Option<ThreadId>,
    task: Option<JoinHandle<()>>,
}

/// Outcome of one guarded emission attempt
#[derive(Debug, PartialEq, Eq)]
enum Emission {
    Sent,
    /// Edge already emitted, nothing sent
    Covered,
    /// The chain was stopped or replaced
    Stale,
}

/// Emit `tick` if `generation` is still the live chain
///
/// Holds `gate` for the whole delivery so `stop()` can wait for an in-flight
/// tick instead of letting it escape after returning.
fn emit_guarded(
    gate: &Mutex<()>,
    state: &Mutex<TimerState>,
    emitter: &TickEmitter,
    generation: u64,
    tick: &Tick,
) -> Emission {
    let _gate = gate.lock().unwrap_or_else(|e| e.into_inner());
    {
        let mut state = lock(state);
        if !state.running || state.generation != generation {
            return Emission::Stale;
        }
        // Early wake-up or an edge already covered by `immediate`
        if state.last_emitted.is_some_and(|last| tick.cycle_ts <= last) {
            return Emission::Covered;
        }
        if let Some(last) = state.last_emitted {
            let skipped = (tick.cycle_ts - last) / tick.period_ms - 1;
            if skipped > 0 {
                tracing::warn!(skipped, cycle_ts = tick.cycle_ts, "Metronome fired late, skipped edges");
            }
        }
        state.last_emitted = Some(tick.cycle_ts);
        state.emitting_on = Some(thread::current().id());
    }
    emitter.emit(tick);
    lock(state).emitting_on = None;
    Emission::Sent
}

/// Emits ticks on exact period boundaries, independent of process start time
///
/// Every firing recomputes its edge from the wall clock, so a late wake-up
/// emits the edge that actually elapsed and the next delay shrinks to match.
pub struct Metronome {
    config: MetronomeConfig,
    clock: Arc<dyn Clock>,
    emitter: TickEmitter,
    state: Arc<Mutex<TimerState>>,
    gate: Arc<Mutex<()>>,
}

impl Metronome {
    /// Create a stopped metronome
    ///
    /// Non-positive periods are clamped to 1 ms.
    pub fn new(mut config: MetronomeConfig, clock: Arc<dyn Clock>) -> Self {
        config.period_ms = config.period_ms.max(1);
        Self {
            config,
            clock,
            emitter: TickEmitter::new(),
            state: Arc::new(Mutex::new(TimerState::default())),
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn period_ms(&self) -> i64 {
        self.config.period_ms
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Start the timer chain; a second call while running is a no-op
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let generation = {
            let mut state = lock(&self.state);
            if state.running {
                return;
            }
            state.running = true;
            state.generation += 1;
            state.last_emitted = None;
            state.generation
        };

        tracing::debug!(
            period_ms = self.config.period_ms,
            origin_ms = self.config.origin_ms,
            "Metronome started"
        );

        if self.config.immediate {
            let cycle_ts =
                floor_to_period(self.clock.now_ms(), self.config.period_ms, self.config.origin_ms);
            let tick = self.make_tick(cycle_ts);
            if emit_guarded(&self.gate, &self.state, &self.emitter, generation, &tick) == Emission::Stale {
                // A listener stopped the metronome during the immediate tick
                return;
            }
        }

        let task = tokio::spawn(run_timer_chain(
            self.config.clone(),
            Arc::clone(&self.clock),
            self.emitter.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.gate),
            generation,
        ));
        let mut state = lock(&self.state);
        if state.generation == generation {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Stop emitting; idempotent
    ///
    /// Cancels the pending timer and suppresses one that already woke up. A
    /// tick being delivered on another thread finishes before this returns;
    /// nothing is emitted afterwards. Channel subscribers see their stream end
    /// after draining buffered ticks.
    pub fn stop(&self) {
        let (task, in_flight_elsewhere) = {
            let mut state = lock(&self.state);
            if !state.running {
                return;
            }
            state.running = false;
            state.generation += 1;
            let elsewhere = state
                .emitting_on
                .is_some_and(|id| id != thread::current().id());
            (state.task.take(), elsewhere)
        };
        if let Some(task) = task {
            task.abort();
        }
        if in_flight_elsewhere {
            drop(self.gate.lock().unwrap_or_else(|e| e.into_inner()));
        }
        self.emitter.close_streams();
        tracing::debug!(period_ms = self.config.period_ms, "Metronome stopped");
    }

    /// Register a tick callback
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Tick) + Send + Sync + 'static,
    {
        self.emitter.on(listener)
    }

    /// Open a tick stream that ends when the metronome stops
    pub fn subscribe(&self) -> TickStream {
        self.emitter.subscribe()
    }

    fn make_tick(&self, cycle_ts: i64) -> Tick {
        Tick::new(self.config.scale, cycle_ts, self.config.period_ms)
            .with_session(self.config.session_id.clone())
    }
}

impl Drop for Metronome {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.state).task.take() {
            task.abort();
        }
    }
}

async fn run_timer_chain(
    config: MetronomeConfig,
    clock: Arc<dyn Clock>,
    emitter: TickEmitter,
    state: Arc<Mutex<TimerState>>,
    gate: Arc<Mutex<()>>,
    generation: u64,
) {
    let period = config.period_ms;
    let origin = config.origin_ms;

    loop {
        let now = clock.now_ms();
        let delay = (next_edge(now, period, origin) - now).max(0) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let cycle_ts = floor_to_period(clock.now_ms(), period, origin);
        let tick = Tick::new(config.scale, cycle_ts, period).with_session(config.session_id.clone());
        if emit_guarded(&gate, &state, &emitter, generation, &tick) == Emission::Stale {
            return;
        }
    }
}

fn lock(state: &Mutex<TimerState>) -> MutexGuard<'_, TimerState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
