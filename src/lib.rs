//! pulse-matrix: drift-free multi-cadence scheduling and snapshot pipeline
//!
//! This library provides the core components for:
//! - Epoch-aligned metronome and tick fan-out
//! - Tick-driven job scheduler with dedupe, cooldown, timeout and retry
//! - Poll hub deriving several cadences from one base clock
//! - Stage/commit pipeline for N×N metric matrices with completeness reports
//! - Price snapshots from Binance and a best-effort SQLite ledger
//! - Full observability stack

pub mod cli;
pub mod clock;
pub mod config;
pub mod ledger;
pub mod matrix;
pub mod orchestrator;
pub mod poll;
pub mod prices;
pub mod scheduler;
pub mod telemetry;
