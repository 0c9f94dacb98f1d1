//! Grid computation from a price snapshot
//!
//! A pair resolves by direct symbol, then the inverse symbol, then
//! triangulation through the quote asset. Anything else is an empty cell.

use super::types::{MatrixGrid, MetricType};
use crate::prices::PriceSnapshot;
use std::collections::HashMap;

/// Smallest previous value `id_pct` divides by
pub const ID_PCT_MIN_DENOMINATOR: f64 = 1e-300;

/// A usable price is finite and strictly positive
fn usable(price: f64) -> Option<f64> {
    (price.is_finite() && price > 0.0).then_some(price)
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Resolve a pair against a symbol table and a per-coin bridge lookup
fn resolve<F>(symbols: &HashMap<String, f64>, bridge: F, base: &str, quote: &str) -> Option<f64>
where
    F: Fn(&str) -> Option<f64>,
{
    if base == quote {
        return None;
    }
    if let Some(price) = symbols.get(&format!("{}{}", base, quote)).copied().and_then(usable) {
        return Some(price);
    }
    if let Some(inverse) = symbols.get(&format!("{}{}", quote, base)).copied().and_then(usable) {
        return usable(1.0 / inverse);
    }
    let base_bridge = bridge(base)?;
    let quote_bridge = bridge(quote)?;
    usable(base_bridge / quote_bridge)
}

/// Last price of `base` in `quote`
pub fn pair_price(snapshot: &PriceSnapshot, base: &str, quote: &str) -> Option<f64> {
    resolve(
        &snapshot.direct,
        |coin| {
            if coin == snapshot.quote_asset {
                return Some(1.0);
            }
            snapshot.bridge.get(coin).copied().and_then(usable)
        },
        base,
        quote,
    )
}

/// 24h open of `base` in `quote`
pub fn pair_open(snapshot: &PriceSnapshot, base: &str, quote: &str) -> Option<f64> {
    resolve(
        &snapshot.open_24h,
        |coin| {
            if coin == snapshot.quote_asset {
                return Some(1.0);
            }
            snapshot
                .open_24h
                .get(&format!("{}{}", coin, snapshot.quote_asset))
                .copied()
                .and_then(usable)
        },
        base,
        quote,
    )
}

/// Relative change from `prev` to `now`
///
/// `None` when either side is missing or `prev` is too close to zero, so the
/// result is never NaN or infinite.
pub fn id_pct(now: Option<f64>, prev: Option<f64>) -> Option<f64> {
    let now = now?;
    let prev = prev?;
    if prev.abs() < ID_PCT_MIN_DENOMINATOR {
        return None;
    }
    finite((now - prev) / prev)
}

/// Grid of one snapshot-derived metric
///
/// `id_pct` needs history and is built by [`id_pct_grid`] instead; asking for
/// it here yields an empty grid.
pub fn snapshot_grid(metric: MetricType, universe: &[String], snapshot: &PriceSnapshot) -> MatrixGrid {
    let mut grid = MatrixGrid::new();
    for base in universe {
        for quote in universe {
            if base == quote {
                continue;
            }
            let value = match metric {
                MetricType::Benchmark => pair_price(snapshot, base, quote),
                MetricType::Pct24h => pair_price(snapshot, base, quote)
                    .zip(pair_open(snapshot, base, quote))
                    .and_then(|(last, open)| finite((last - open) / open)),
                MetricType::Delta => pair_price(snapshot, base, quote)
                    .zip(pair_open(snapshot, base, quote))
                    .and_then(|(last, open)| finite(last - open)),
                MetricType::IdPct => None,
            };
            grid.set(base, quote, value);
        }
    }
    grid
}

/// `id_pct` for every pair of `universe`
///
/// `previous` holds the latest committed benchmark strictly before the cycle.
pub fn id_pct_grid(
    universe: &[String],
    benchmark: &MatrixGrid,
    previous: &HashMap<(String, String), f64>,
) -> MatrixGrid {
    let mut grid = MatrixGrid::new();
    for base in universe {
        for quote in universe {
            if base == quote {
                continue;
            }
            let prev = previous.get(&(base.clone(), quote.clone())).copied();
            grid.set(base, quote, id_pct(benchmark.get(base, quote), prev));
        }
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coins(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot() -> PriceSnapshot {
        PriceSnapshot::new("USDT")
            .with_symbol("BTC", "USDT", 60_000.0, Some(50_000.0))
            .with_symbol("ETH", "USDT", 3_000.0, Some(2_500.0))
            .with_symbol("ETH", "BTC", 0.051, Some(0.05))
    }

    #[test]
    fn test_id_pct() {
        let value = id_pct(Some(105.0), Some(100.0)).unwrap();
        assert!((value - 0.05).abs() < 1e-12);
        assert_eq!(id_pct(Some(105.0), Some(0.0)), None);
        assert_eq!(id_pct(Some(105.0), None), None);
        assert_eq!(id_pct(None, Some(100.0)), None);
        assert_eq!(id_pct(Some(1.0), Some(1e-301)), None);
        assert_eq!(id_pct(Some(f64::MAX), Some(-1e-300)), None);
    }

    #[test]
    fn test_direct_then_inverse() {
        let snap = snapshot();
        assert_eq!(pair_price(&snap, "ETH", "BTC"), Some(0.051));
        let inverse = pair_price(&snap, "BTC", "ETH").unwrap();
        assert!((inverse - 1.0 / 0.051).abs() < 1e-9);
    }

    #[test]
    fn test_bridge_triangulation() {
        let snap = PriceSnapshot::new("USDT")
            .with_symbol("SOL", "USDT", 150.0, Some(100.0))
            .with_symbol("BTC", "USDT", 60_000.0, Some(50_000.0));
        let price = pair_price(&snap, "SOL", "BTC").unwrap();
        assert!((price - 0.0025).abs() < 1e-12);
        let open = pair_open(&snap, "SOL", "BTC").unwrap();
        assert!((open - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_quote_asset_is_a_coin() {
        let snap = snapshot();
        assert_eq!(pair_price(&snap, "BTC", "USDT"), Some(60_000.0));
        let inverse = pair_price(&snap, "USDT", "BTC").unwrap();
        assert!((inverse - 1.0 / 60_000.0).abs() < 1e-15);
    }

    #[test]
    fn test_bad_prices_are_missing() {
        let snap = PriceSnapshot::new("USDT")
            .with_symbol("BTC", "USDT", 0.0, None)
            .with_symbol("ETH", "USDT", f64::NAN, None);
        assert_eq!(pair_price(&snap, "BTC", "ETH"), None);
        assert_eq!(pair_price(&snap, "ETH", "BTC"), None);
        assert_eq!(pair_price(&snap, "BTC", "BTC"), None);
    }

    #[test]
    fn test_benchmark_grid_leaves_unknown_pairs_empty() {
        let universe = coins(&["BTC", "ETH", "DOGE"]);
        let grid = snapshot_grid(MetricType::Benchmark, &universe, &snapshot());
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.get("DOGE", "BTC"), None);
    }

    #[test]
    fn test_pct24h_and_delta() {
        let universe = coins(&["BTC", "ETH"]);
        let pct = snapshot_grid(MetricType::Pct24h, &universe, &snapshot());
        let delta = snapshot_grid(MetricType::Delta, &universe, &snapshot());

        assert!((pct.get("ETH", "BTC").unwrap() - 0.02).abs() < 1e-9);
        assert!((delta.get("ETH", "BTC").unwrap() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_id_pct_grid() {
        let universe = coins(&["BTC", "ETH"]);
        let mut benchmark = MatrixGrid::new();
        benchmark.set("BTC", "ETH", Some(21.0));
        benchmark.set("ETH", "BTC", Some(0.05));

        let previous = HashMap::from([(("BTC".to_string(), "ETH".to_string()), 20.0)]);
        let grid = id_pct_grid(&universe, &benchmark, &previous);

        assert!((grid.get("BTC", "ETH").unwrap() - 0.05).abs() < 1e-12);
        assert_eq!(grid.get("ETH", "BTC"), None);
    }
}
