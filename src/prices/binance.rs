//! Binance REST price source
//!
//! One `/api/v3/ticker/24hr` call per cycle gives both the last price and the
//! 24h open of every listed symbol.

use super::{PriceSnapshot, PriceSource};
use crate::config::PricesConfig;
use crate::telemetry::{self, LatencyMetric};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// 24h rolling ticker as returned by Binance
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24h {
    symbol: String,
    last_price: String,
    open_price: String,
}

/// Fetches price snapshots from the Binance REST API
pub struct BinanceRestSource {
    base_url: String,
    client: Client,
}

impl BinanceRestSource {
    pub fn new(config: &PricesConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl PriceSource for BinanceRestSource {
    async fn fetch_snapshot(
        &self,
        universe: &[String],
        quote_asset: &str,
    ) -> anyhow::Result<PriceSnapshot> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let started = Instant::now();

        tracing::debug!(url = %url, coins = universe.len(), "Fetching 24h tickers");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error: {} - {}", status, body);
        }

        let tickers: Vec<Ticker24h> = response.json().await?;
        telemetry::record_latency(LatencyMetric::PriceFetch, started.elapsed());

        let snapshot = snapshot_from_tickers(tickers, universe, quote_asset);
        tracing::debug!(
            direct = snapshot.direct.len(),
            bridge = snapshot.bridge.len(),
            "Price snapshot fetched"
        );

        Ok(snapshot)
    }
}

/// Keep the symbols the matrix can use: universe pairs and bridge pairs
fn snapshot_from_tickers(
    tickers: Vec<Ticker24h>,
    universe: &[String],
    quote_asset: &str,
) -> PriceSnapshot {
    let mut wanted: HashSet<(String, String)> = HashSet::new();
    for base in universe {
        if base != quote_asset {
            wanted.insert((base.clone(), quote_asset.to_string()));
        }
        for quote in universe {
            if base != quote {
                wanted.insert((base.clone(), quote.clone()));
            }
        }
    }
    let by_symbol: std::collections::HashMap<String, (String, String)> = wanted
        .into_iter()
        .map(|(b, q)| (format!("{}{}", b, q), (b, q)))
        .collect();

    let mut snapshot = PriceSnapshot::new(quote_asset);
    for ticker in tickers {
        let Some((base, quote)) = by_symbol.get(&ticker.symbol) else {
            continue;
        };
        let Ok(last) = ticker.last_price.parse::<f64>() else {
            tracing::debug!(symbol = %ticker.symbol, "Unparseable last price, skipped");
            continue;
        };
        let open = ticker.open_price.parse::<f64>().ok();
        snapshot = snapshot.with_symbol(base, quote, last, open);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, last: &str, open: &str) -> Ticker24h {
        Ticker24h {
            symbol: symbol.to_string(),
            last_price: last.to_string(),
            open_price: open.to_string(),
        }
    }

    #[test]
    fn test_ticker_deserialize() {
        let json = r#"[{"symbol":"ETHBTC","priceChange":"0.001","lastPrice":"0.05","openPrice":"0.049","volume":"1"}]"#;
        let tickers: Vec<Ticker24h> = serde_json::from_str(json).unwrap();
        assert_eq!(tickers[0].symbol, "ETHBTC");
        assert_eq!(tickers[0].last_price, "0.05");
    }

    #[test]
    fn test_snapshot_keeps_universe_and_bridge_symbols() {
        let universe = vec!["BTC".to_string(), "ETH".to_string()];
        let tickers = vec![
            ticker("ETHBTC", "0.05", "0.049"),
            ticker("BTCUSDT", "60000", "59000"),
            ticker("ETHUSDT", "3000", "2900"),
            ticker("DOGEUSDT", "0.1", "0.1"),
            ticker("BTCETH", "garbage", "1"),
        ];

        let snapshot = snapshot_from_tickers(tickers, &universe, "USDT");
        assert_eq!(snapshot.direct.len(), 3);
        assert_eq!(snapshot.direct.get("ETHBTC"), Some(&0.05));
        assert_eq!(snapshot.open_24h.get("ETHUSDT"), Some(&2_900.0));
        assert_eq!(snapshot.bridge.get("BTC"), Some(&60_000.0));
        assert!(!snapshot.direct.contains_key("DOGEUSDT"));
        assert!(!snapshot.direct.contains_key("BTCETH"));
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let source = BinanceRestSource::new(&PricesConfig {
            base_url: "http://localhost:9000/".to_string(),
            timeout_secs: 1,
        })
        .unwrap();
        assert_eq!(source.base_url, "http://localhost:9000");
    }
}
