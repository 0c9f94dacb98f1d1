//! Run command implementation

use super::engine::Engine;
use crate::config::Config;
use clap::Args;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Emit one base tick immediately instead of waiting for the next edge
    #[arg(long)]
    pub immediate: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config, session_id: &str) -> anyhow::Result<()> {
        let mut config = config.clone();
        config.clock.immediate |= self.immediate;

        let engine = Engine::build(&config, session_id, true).await?;
        let plan = engine.hub.plan();
        tracing::info!(
            session_id = %session_id,
            base_period_ms = plan.base_period_ms,
            cycle_ms = config.scales.cycle_ms,
            coins = config.matrix.coins.len(),
            "Engine starting"
        );

        engine.hub.start();
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown requested");

        if let Some(report) = engine.orchestrator.last_report() {
            tracing::info!(
                cycle_ts = report.cycle_ts,
                complete = report.is_complete(),
                missing = report.missing_cells(),
                "Last committed cycle"
            );
        }
        engine.shutdown();

        Ok(())
    }
}
