//! Clock module
//!
//! Epoch-aligned metronome, tick types and the fan-out used by every tick
//! source in the engine.

mod emitter;
mod metronome;
mod types;

pub use emitter::{Listener, Subscription, TickEmitter, TickStream};
pub use metronome::{Metronome, MetronomeConfig};
pub use types::{floor_to_period, next_edge, Scale, Tick, TickReason};

use chrono::Utc;

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Real wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Wall clock that follows tokio's time source from a fixed anchor
///
/// Under a paused runtime the reported time advances exactly as tokio's
/// virtual clock does, which makes edge alignment deterministic.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_ms: i64,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.start.elapsed().as_millis() as i64
    }
}
