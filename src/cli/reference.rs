//! Reference command implementation
//!
//! Runs one cycle on demand for the cycle edge containing a timestamp.

use super::engine::Engine;
use crate::config::Config;
use crate::scheduler::JobOutcome;
use clap::Args;

#[derive(Args, Debug)]
pub struct ReferenceArgs {
    /// Timestamp (epoch ms) inside the cycle to compute; defaults to now
    #[arg(long)]
    pub ts: Option<i64>,
}

impl ReferenceArgs {
    pub async fn execute(&self, config: &Config, session_id: &str) -> anyhow::Result<()> {
        let engine = Engine::build(config, session_id, false).await?;
        let ts = self
            .ts
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        let tick = engine.hub.trigger_reference(ts)?;
        let outcomes = engine.hub.scheduler().on_tick(&tick).await;

        for outcome in &outcomes {
            if let JobOutcome::Failed { job, error, .. } = outcome {
                anyhow::bail!("{} failed: {}", job, error);
            }
            if let JobOutcome::TimedOut { job, .. } = outcome {
                anyhow::bail!("{} timed out", job);
            }
        }

        match engine.orchestrator.last_report() {
            Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            None => println!("No cycle ran for {}", tick.cycle_ts),
        }
        engine.shutdown();

        Ok(())
    }
}
