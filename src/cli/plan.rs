//! Plan command implementation

use crate::config::Config;
use crate::poll::ScalePlan;
use clap::Args;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let plan = ScalePlan::resolve(&config.scales, config.clock.origin_ms)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }

        println!("Base period: {} ms (origin {})", plan.base_period_ms, plan.origin_ms);
        println!("{:<12} {:>12} {:>12} {:>6}", "scale", "requested", "period", "every");
        for (scale, entry) in &plan.scales {
            println!(
                "{:<12} {:>12} {:>12} {:>6}",
                scale.as_str(),
                entry.requested_ms,
                entry.period_ms,
                entry.every
            );
        }
        Ok(())
    }
}
