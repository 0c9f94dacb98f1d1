//! CLI interface for pulse-matrix
//!
//! Provides subcommands for:
//! - `run`: Start the engine until Ctrl-C
//! - `reference`: Run one cycle on demand for a given timestamp
//! - `plan`: Show the resolved scale periods
//! - `config`: Show the effective configuration

mod engine;
mod plan;
mod reference;
mod run;

pub use engine::Engine;
pub use plan::PlanArgs;
pub use reference::ReferenceArgs;
pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pulse-matrix")]
#[command(about = "Multi-cadence scheduler and stage/commit pipeline for market metric matrices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine
    Run(RunArgs),
    /// Run one reference cycle
    Reference(ReferenceArgs),
    /// Show resolved scale periods
    Plan(PlanArgs),
    /// Show configuration
    Config,
}
