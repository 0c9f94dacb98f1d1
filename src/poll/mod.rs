//! Poll hub
//!
//! Derives the continuous, sampling, cycle and window cadences from a single
//! base metronome whose period is the GCD of the cycle-aligned scale periods.

mod hub;
mod plan;

pub use hub::PollHub;
pub use plan::{
    align_to_cycle, base_period, gcd, HubError, ScaleEntry, ScalePlan, DEFAULT_BASE_PERIOD_MS,
};
