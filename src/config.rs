//! Configuration types for pulse-matrix

use crate::matrix::MetricType;
use crate::telemetry::LogFormat;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clock: ClockConfig,
    pub scales: ScaleConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub prices: PricesConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cycle_ms must be positive")]
    NonPositiveCycle,
    #[error("matrix.coins needs at least two coins")]
    UniverseTooSmall,
    #[error("duplicate coin in matrix.coins: {0}")]
    DuplicateCoin(String),
    #[error("matrix.metrics must not be empty")]
    NoMetrics,
    #[error("id_pct is computed from committed benchmark values; add benchmark to matrix.metrics")]
    IdPctWithoutBenchmark,
    #[error("scales.{0} exceeds the maximum period of one year")]
    PeriodTooLarge(&'static str),
}

/// Longest accepted scale period (one year)
pub const MAX_SCALE_PERIOD_MS: i64 = 365 * 24 * 60 * 60 * 1_000;

/// Base clock configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClockConfig {
    /// Epoch origin every edge is aligned to (ms)
    #[serde(default)]
    pub origin_ms: i64,
    /// Emit one base tick immediately on start
    #[serde(default)]
    pub immediate: bool,
}

/// Requested scale periods (ms)
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ScaleConfig {
    #[serde(default = "default_continuous_ms")]
    pub continuous_ms: Option<i64>,
    #[serde(default)]
    pub sampling_ms: Option<i64>,
    pub cycle_ms: i64,
    #[serde(default)]
    pub window_ms: Option<i64>,
}

fn default_continuous_ms() -> Option<i64> {
    Some(1_000)
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            continuous_ms: default_continuous_ms(),
            sampling_ms: None,
            cycle_ms: 60_000,
            window_ms: None,
        }
    }
}

/// Policy for the matrix cycle job
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Result of a cycle slower than this is discarded
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,
    /// Extra attempts after a failed cycle
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Minimum gap between two cycles (0 = none)
    #[serde(default)]
    pub cooldown_ms: u64,
}

fn default_cycle_timeout_ms() -> u64 {
    45_000
}
fn default_retry_max() -> u32 {
    1
}
fn default_retry_backoff_ms() -> u64 {
    2_000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cycle_timeout_ms: default_cycle_timeout_ms(),
            retry_max: default_retry_max(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cooldown_ms: 0,
        }
    }
}

impl JobsConfig {
    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn cooldown(&self) -> Option<Duration> {
        (self.cooldown_ms > 0).then(|| Duration::from_millis(self.cooldown_ms))
    }
}

/// Matrix universe and metrics
#[derive(Debug, Clone, Deserialize)]
pub struct MatrixConfig {
    /// Coin universe, in display order
    pub coins: Vec<String>,
    /// Asset the bridge prices are quoted in
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricType>,
    /// Staged rows older than this are pruned by the retention job
    #[serde(default = "default_staging_retention_hours")]
    pub staging_retention_hours: u64,
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}
fn default_metrics() -> Vec<MetricType> {
    MetricType::ALL.to_vec()
}
fn default_staging_retention_hours() -> u64 {
    48
}

impl MatrixConfig {
    /// Coins upper-cased, in configured order
    pub fn universe(&self) -> Vec<String> {
        self.coins.iter().map(|c| c.trim().to_uppercase()).collect()
    }
}

/// SQLite store location
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/matrix.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Price source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PricesConfig {
    #[serde(default = "default_prices_url")]
    pub base_url: String,
    #[serde(default = "default_prices_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_prices_url() -> String {
    crate::prices::BINANCE_API_URL.to_string()
}
fn default_prices_timeout_secs() -> u64 {
    10
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            base_url: default_prices_url(),
            timeout_secs: default_prices_timeout_secs(),
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Create the ledger table on startup instead of only probing for it
    #[serde(default = "default_true")]
    pub create_table: bool,
    #[serde(default = "default_ledger_topic")]
    pub topic: String,
}

fn default_true() -> bool {
    true
}
fn default_ledger_topic() -> String {
    "matrix".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            create_table: true,
            topic: default_ledger_topic(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Prometheus exporter port; disabled when absent
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Pretty,
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scales.cycle_ms <= 0 {
            return Err(ConfigError::NonPositiveCycle);
        }
        let periods = [
            ("continuous_ms", self.scales.continuous_ms),
            ("sampling_ms", self.scales.sampling_ms),
            ("cycle_ms", Some(self.scales.cycle_ms)),
            ("window_ms", self.scales.window_ms),
        ];
        for (name, period) in periods {
            if period.is_some_and(|p| p > MAX_SCALE_PERIOD_MS) {
                return Err(ConfigError::PeriodTooLarge(name));
            }
        }
        let universe = self.matrix.universe();
        if universe.len() < 2 {
            return Err(ConfigError::UniverseTooSmall);
        }
        let mut seen = HashSet::new();
        for coin in &universe {
            if !seen.insert(coin) {
                return Err(ConfigError::DuplicateCoin(coin.clone()));
            }
        }
        if self.matrix.metrics.is_empty() {
            return Err(ConfigError::NoMetrics);
        }
        if self.matrix.metrics.contains(&MetricType::IdPct)
            && !self.matrix.metrics.contains(&MetricType::Benchmark)
        {
            return Err(ConfigError::IdPctWithoutBenchmark);
        }
        Ok(())
    }
}
