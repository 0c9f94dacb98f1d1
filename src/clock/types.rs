//! Tick types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named cadence a tick belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    /// Raw metronome tick at the base period
    Base,
    /// Fires on every base tick
    Continuous,
    /// Optional intermediate cadence
    Sampling,
    /// Matrix computation cadence
    Cycle,
    /// Optional long cadence (maintenance, rollups)
    Window,
}

impl Scale {
    /// Scales derived by the poll hub, in firing order
    pub const DERIVED: [Scale; 4] = [
        Scale::Continuous,
        Scale::Sampling,
        Scale::Cycle,
        Scale::Window,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Base => "base",
            Scale::Continuous => "continuous",
            Scale::Sampling => "sampling",
            Scale::Cycle => "cycle",
            Scale::Window => "window",
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tick was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickReason {
    /// Natural cadence
    Interval,
    /// Forced refresh
    Manual,
    /// Replay of a past edge
    Backfill,
    /// On-demand reference snapshot
    Reference,
}

impl TickReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickReason::Interval => "interval",
            TickReason::Manual => "manual",
            TickReason::Backfill => "backfill",
            TickReason::Reference => "reference",
        }
    }
}

/// A single firing of a scale
///
/// `cycle_ts` is always an exact multiple of `period_ms` measured from the
/// clock origin. Ticks are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Edge timestamp in epoch milliseconds
    pub cycle_ts: i64,
    /// Period of the emitting scale in milliseconds
    pub period_ms: i64,
    /// Session the tick belongs to, if any
    pub session_id: Option<String>,
    pub reason: TickReason,
    pub scale: Scale,
}

impl Tick {
    /// Create an interval tick
    pub fn new(scale: Scale, cycle_ts: i64, period_ms: i64) -> Self {
        Self {
            cycle_ts,
            period_ms,
            session_id: None,
            reason: TickReason::Interval,
            scale,
        }
    }

    /// Set the tick reason
    pub fn with_reason(mut self, reason: TickReason) -> Self {
        self.reason = reason;
        self
    }

    /// Attach a session id
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Floor `ts` onto the grid of `period` anchored at `origin`
pub fn floor_to_period(ts: i64, period: i64, origin: i64) -> i64 {
    (ts - origin).div_euclid(period) * period + origin
}

/// First edge strictly after `now`
///
/// When `now` sits exactly on an edge the result is `now + period`, never `now`.
pub fn next_edge(now: i64, period: i64, origin: i64) -> i64 {
    floor_to_period(now, period, origin) + period
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_period() {
        assert_eq!(floor_to_period(4_999, 1_000, 0), 4_000);
        assert_eq!(floor_to_period(5_000, 1_000, 0), 5_000);
        assert_eq!(floor_to_period(5_250, 1_000, 250), 5_250);
        assert_eq!(floor_to_period(5_249, 1_000, 250), 4_250);
    }

    #[test]
    fn test_floor_before_origin() {
        assert_eq!(floor_to_period(-1, 1_000, 0), -1_000);
    }

    #[test]
    fn test_next_edge_on_boundary_advances_full_period() {
        assert_eq!(next_edge(60_000, 60_000, 0), 120_000);
        assert_eq!(next_edge(60_001, 60_000, 0), 120_000);
        assert_eq!(next_edge(59_999, 60_000, 0), 60_000);
    }

    #[test]
    fn test_tick_builder() {
        let tick = Tick::new(Scale::Cycle, 4_000, 4_000)
            .with_reason(TickReason::Reference)
            .with_session(Some("s1".to_string()));
        assert_eq!(tick.reason, TickReason::Reference);
        assert_eq!(tick.session_id.as_deref(), Some("s1"));
        assert_eq!(tick.scale.to_string(), "cycle");
    }

    #[test]
    fn test_scale_serde() {
        let json = serde_json::to_string(&Scale::Window).unwrap();
        assert_eq!(json, "\"window\"");
        let reason: TickReason = serde_json::from_str("\"backfill\"").unwrap();
        assert_eq!(reason, TickReason::Backfill);
    }
}
