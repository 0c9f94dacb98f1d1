//! Scale period alignment and base period resolution

use crate::clock::{floor_to_period, Scale};
use crate::config::ScaleConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Base period used when no scale resolves to a positive period
pub const DEFAULT_BASE_PERIOD_MS: i64 = 1_000;

/// Poll hub errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("Cycle period must be positive, got {0} ms")]
    InvalidCycle(i64),

    #[error("Scale {0} is not configured")]
    ScaleNotConfigured(Scale),

    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),
}

/// One resolved scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleEntry {
    /// Period as configured
    pub requested_ms: i64,
    /// Period after cycle alignment (the base period for `continuous`)
    pub period_ms: i64,
    /// Fires on every `every`-th base tick
    pub every: i64,
}

/// Resolved period table for every configured scale
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalePlan {
    pub base_period_ms: i64,
    pub origin_ms: i64,
    pub scales: BTreeMap<Scale, ScaleEntry>,
}

impl ScalePlan {
    /// Align every configured period to the cycle and derive the base period
    pub fn resolve(config: &ScaleConfig, origin_ms: i64) -> Result<Self, HubError> {
        let cycle = config.cycle_ms;
        if cycle <= 0 {
            return Err(HubError::InvalidCycle(cycle));
        }

        let requested: Vec<(Scale, i64)> = [
            (Scale::Continuous, config.continuous_ms),
            (Scale::Sampling, config.sampling_ms),
            (Scale::Cycle, Some(cycle)),
            (Scale::Window, config.window_ms),
        ]
        .into_iter()
        .filter_map(|(scale, period)| period.filter(|p| *p > 0).map(|p| (scale, p)))
        .collect();

        let aligned: Vec<(Scale, i64, i64)> = requested
            .iter()
            .map(|&(scale, p)| (scale, p, align_to_cycle(p, cycle)))
            .collect();

        let periods: Vec<i64> = aligned.iter().map(|&(_, _, p)| p).collect();
        let base = base_period(&periods);

        let scales = aligned
            .into_iter()
            .map(|(scale, requested_ms, period_ms)| {
                let entry = if scale == Scale::Continuous {
                    ScaleEntry {
                        requested_ms,
                        period_ms: base,
                        every: 1,
                    }
                } else {
                    ScaleEntry {
                        requested_ms,
                        period_ms,
                        every: period_ms / base,
                    }
                };
                (scale, entry)
            })
            .collect();

        Ok(Self {
            base_period_ms: base,
            origin_ms,
            scales,
        })
    }

    pub fn entry(&self, scale: Scale) -> Option<&ScaleEntry> {
        self.scales.get(&scale)
    }

    pub fn period_of(&self, scale: Scale) -> Option<i64> {
        match scale {
            Scale::Base => Some(self.base_period_ms),
            other => self.entry(other).map(|e| e.period_ms),
        }
    }

    /// Timestamp `scale` emits for the base tick at `base_ts`, if it fires
    ///
    /// The result is floored onto the scale's own period.
    pub fn fires(&self, scale: Scale, base_ts: i64) -> Option<i64> {
        let entry = self.entry(scale)?;
        let index = (base_ts - self.origin_ms).div_euclid(self.base_period_ms);
        if index.rem_euclid(entry.every) != 0 {
            return None;
        }
        Some(floor_to_period(base_ts, entry.period_ms, self.origin_ms))
    }
}

/// Make `period` commensurate with `cycle`
///
/// Larger periods round to the nearest whole multiple of the cycle, smaller
/// ones to the nearest whole-millisecond divisor (ties go to the larger one).
pub fn align_to_cycle(period: i64, cycle: i64) -> i64 {
    if period <= 0 || cycle <= 0 {
        return period;
    }
    if period >= cycle {
        let remainder = period % cycle;
        let mut multiple = period / cycle;
        if remainder >= cycle - remainder {
            multiple += 1;
        }
        // Largest representable multiple when rounding up would overflow
        multiple
            .checked_mul(cycle)
            .unwrap_or((i64::MAX / cycle) * cycle)
    } else {
        nearest_divisor(cycle, period)
    }
}

fn nearest_divisor(n: i64, target: i64) -> i64 {
    let mut best = n;
    let mut i = 1;
    while i <= n / i {
        if n % i == 0 {
            for d in [i, n / i] {
                let closer = (d - target).abs() < (best - target).abs();
                let tie_larger = (d - target).abs() == (best - target).abs() && d > best;
                if closer || tie_larger {
                    best = d;
                }
            }
        }
        i += 1;
    }
    best
}

pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// GCD of the positive periods, or [`DEFAULT_BASE_PERIOD_MS`] if there are none
pub fn base_period(periods: &[i64]) -> i64 {
    match periods.iter().filter(|p| **p > 0).fold(0, |acc, p| gcd(acc, *p)) {
        0 => DEFAULT_BASE_PERIOD_MS,
        g => g,
    }
}
