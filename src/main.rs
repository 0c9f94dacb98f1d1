use clap::Parser;
use pulse_matrix::cli::{Cli, Commands};
use pulse_matrix::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("Could not load config from {}: {}", cli.config, e))?;

    let _telemetry = pulse_matrix::telemetry::init_telemetry(&config.telemetry)?;
    let session_id = uuid::Uuid::new_v4().to_string();

    match cli.command {
        Commands::Run(args) => {
            tracing::info!(session_id = %session_id, "Starting engine");
            args.execute(&config, &session_id).await?;
        }
        Commands::Reference(args) => {
            tracing::info!(session_id = %session_id, "Running reference cycle");
            args.execute(&config, &session_id).await?;
        }
        Commands::Plan(args) => {
            args.execute(&config)?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Scales: continuous={:?} sampling={:?} cycle={} window={:?} (ms)",
                config.scales.continuous_ms,
                config.scales.sampling_ms,
                config.scales.cycle_ms,
                config.scales.window_ms
            );
            println!(
                "  Clock: origin={} immediate={}",
                config.clock.origin_ms, config.clock.immediate
            );
            println!(
                "  Jobs: timeout={}ms retry={}x{}ms cooldown={}ms",
                config.jobs.cycle_timeout_ms,
                config.jobs.retry_max,
                config.jobs.retry_backoff_ms,
                config.jobs.cooldown_ms
            );
            println!(
                "  Matrix: {} coins in {}, metrics={:?}",
                config.matrix.coins.len(),
                config.matrix.quote_asset,
                config.matrix.metrics
            );
            println!("  Store: {}", config.store.path.display());
            println!("  Prices: {}", config.prices.base_url);
            println!(
                "  Ledger: enabled={} topic={}",
                config.ledger.enabled, config.ledger.topic
            );
        }
    }

    Ok(())
}
