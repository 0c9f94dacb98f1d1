//! Matrix data types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Metric carried by one N×N grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricType {
    /// Pair price
    #[serde(rename = "benchmark")]
    Benchmark,
    /// Relative change against the 24h open
    #[serde(rename = "pct24h")]
    Pct24h,
    /// Absolute change against the 24h open
    #[serde(rename = "delta")]
    Delta,
    /// Relative change against the previous committed benchmark
    #[serde(rename = "id_pct")]
    IdPct,
}

impl MetricType {
    pub const ALL: [MetricType; 4] = [
        MetricType::Benchmark,
        MetricType::Pct24h,
        MetricType::Delta,
        MetricType::IdPct,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Benchmark => "benchmark",
            MetricType::Pct24h => "pct24h",
            MetricType::Delta => "delta",
            MetricType::IdPct => "id_pct",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown metric type: {}", s))
    }
}

/// One committed cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixCell {
    pub base: String,
    pub quote: String,
    pub value: Option<f64>,
    pub metric: MetricType,
    pub cycle_ts: i64,
}

/// A staged or committed row as the store sees it
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub base: String,
    pub quote: String,
    pub value: f64,
    pub session_id: String,
}

/// Values of one metric keyed by ordered (base, quote) pair
///
/// Diagonal pairs are never held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixGrid {
    values: HashMap<(String, String), f64>,
}

impl MatrixGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cell; `None` and diagonal pairs leave the grid untouched
    pub fn set(&mut self, base: &str, quote: &str, value: Option<f64>) {
        if base == quote {
            return;
        }
        match value {
            Some(v) => {
                self.values.insert((base.to_string(), quote.to_string()), v);
            }
            None => {
                self.values.remove(&(base.to_string(), quote.to_string()));
            }
        }
    }

    pub fn get(&self, base: &str, quote: &str) -> Option<f64> {
        self.values
            .get(&(base.to_string(), quote.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Finite off-diagonal values for every ordered pair of `universe`
    pub fn finite_pairs<'a>(
        &'a self,
        universe: &'a [String],
    ) -> impl Iterator<Item = (&'a str, &'a str, f64)> + 'a {
        universe.iter().flat_map(move |base| {
            universe.iter().filter_map(move |quote| {
                if base == quote {
                    return None;
                }
                self.get(base, quote)
                    .filter(|v| v.is_finite())
                    .map(|v| (base.as_str(), quote.as_str(), v))
            })
        })
    }
}

/// Expected vs staged vs missing cell counts of one snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CompletenessReport {
    pub expected_cells: usize,
    pub staged_cells: usize,
    pub missing_count: usize,
    pub complete: bool,
}

impl CompletenessReport {
    pub fn new(expected_cells: usize, staged_cells: usize, missing_count: usize) -> Self {
        Self {
            expected_cells,
            staged_cells,
            missing_count,
            complete: missing_count == 0 && staged_cells == expected_cells,
        }
    }
}

/// Result of staging and committing one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub metric: MetricType,
    pub staged: usize,
    pub completeness: CompletenessReport,
}

/// Result of one pipeline cycle across all configured metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle_ts: i64,
    pub session_id: String,
    pub metrics: Vec<MetricReport>,
}

impl CycleReport {
    pub fn is_complete(&self) -> bool {
        self.metrics.iter().all(|m| m.completeness.complete)
    }

    pub fn missing_cells(&self) -> usize {
        self.metrics.iter().map(|m| m.completeness.missing_count).sum()
    }
}
