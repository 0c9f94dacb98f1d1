//! Price snapshot source
//!
//! The matrix pipeline treats a snapshot as opaque and partial: any pair can
//! be missing and resolves to an empty cell.

mod binance;

pub use binance::BinanceRestSource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Binance REST API base URL
pub const BINANCE_API_URL: &str = "https://api.binance.com";

/// Prices observed for one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Asset bridge prices are quoted in
    pub quote_asset: String,
    /// Last price per exchange symbol (e.g. `ETHBTC`)
    pub direct: HashMap<String, f64>,
    /// 24h open price per exchange symbol
    pub open_24h: HashMap<String, f64>,
    /// Last price of each coin in the quote asset
    pub bridge: HashMap<String, f64>,
}

impl PriceSnapshot {
    pub fn new(quote_asset: impl Into<String>) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            ..Self::default()
        }
    }

    /// Record a traded symbol; bridge symbols also fill the bridge table
    pub fn with_symbol(mut self, base: &str, quote: &str, last: f64, open: Option<f64>) -> Self {
        let symbol = format!("{}{}", base, quote);
        self.direct.insert(symbol.clone(), last);
        if let Some(open) = open {
            self.open_24h.insert(symbol, open);
        }
        if quote == self.quote_asset {
            self.bridge.insert(base.to_string(), last);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.bridge.is_empty()
    }
}

/// Source of price snapshots
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch prices for every pair of `universe` plus bridge prices in `quote_asset`
    async fn fetch_snapshot(
        &self,
        universe: &[String],
        quote_asset: &str,
    ) -> anyhow::Result<PriceSnapshot>;
}

/// Serves a fixed snapshot
///
/// Used for replays and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    snapshot: PriceSnapshot,
}

impl StaticPriceSource {
    pub fn new(snapshot: PriceSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_snapshot(
        &self,
        _universe: &[String],
        _quote_asset: &str,
    ) -> anyhow::Result<PriceSnapshot> {
        Ok(self.snapshot.clone())
    }
}
