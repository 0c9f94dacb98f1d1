//! Engine composition shared by the commands

use crate::clock::{Scale, Subscription, SystemClock};
use crate::config::Config;
use crate::ledger::SqliteLedger;
use crate::matrix::{MatrixPipeline, SqliteMatrixStore};
use crate::orchestrator::{self, Orchestrator};
use crate::poll::PollHub;
use crate::prices::BinanceRestSource;
use crate::scheduler::Scheduler;
use crate::telemetry::{self, GaugeMetric};
use std::sync::Arc;
use std::time::Duration;

/// Wired scheduler, poll hub and orchestrator
pub struct Engine {
    pub hub: PollHub,
    pub orchestrator: Arc<Orchestrator<SqliteMatrixStore>>,
    listeners: Vec<Subscription>,
}

impl Engine {
    /// Build every component from `config`
    ///
    /// With `listen` set, cycle and retention ticks emitted by the hub are
    /// dispatched to the orchestrator jobs automatically.
    pub async fn build(config: &Config, session_id: &str, listen: bool) -> anyhow::Result<Self> {
        let universe = config.matrix.universe();
        telemetry::set_gauge(GaugeMetric::UniverseSize, universe.len() as f64);

        let store = SqliteMatrixStore::open(&config.store.path)?;
        let connection = store.connection();
        let pipeline = Arc::new(MatrixPipeline::new(store, config.matrix.metrics.clone()));
        let prices = Arc::new(BinanceRestSource::new(&config.prices)?);

        let mut orchestrator = Orchestrator::new(
            pipeline,
            prices,
            universe,
            config.matrix.quote_asset.to_uppercase(),
            session_id,
        );
        if config.ledger.enabled {
            let ledger = Arc::new(SqliteLedger::new(connection, config.ledger.create_table)?);
            orchestrator = orchestrator
                .with_ledger(ledger, config.ledger.topic.clone())
                .await;
        }
        let orchestrator = Arc::new(orchestrator);

        let scheduler = Scheduler::new();
        let hub = PollHub::new(
            &config.scales,
            config.clock.origin_ms,
            scheduler.clone(),
            Arc::new(SystemClock),
            session_id,
        )?
        .with_immediate(config.clock.immediate);

        let retention_scale = orchestrator::retention_scale(&hub);
        let retention = Duration::from_secs(config.matrix.staging_retention_hours * 3_600);
        orchestrator.register(&scheduler, &config.jobs, retention_scale, retention)?;

        let listeners = if listen {
            orchestrator::listen(&hub, &[Scale::Cycle, retention_scale])
        } else {
            Vec::new()
        };

        Ok(Self {
            hub,
            orchestrator,
            listeners,
        })
    }

    /// Stop the hub and detach the orchestrator listeners
    pub fn shutdown(self) {
        self.hub.stop();
        for listener in self.listeners {
            listener.unsubscribe();
        }
    }
}
