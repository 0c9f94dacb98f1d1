//! Best-effort event ledger
//!
//! The orchestrator appends one entry per committed cycle. Ledger failures are
//! logged and never fail a cycle.

mod sqlite;

pub use sqlite::SqliteLedger;

use crate::matrix::CycleReport;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Event name for a committed matrix cycle
pub const CYCLE_COMMITTED: &str = "matrix.cycle_committed";

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One ledger record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    /// Epoch milliseconds of the event
    pub timestamp: i64,
    /// A second append with the same key is ignored
    pub idempotency_key: String,
}

impl LedgerEntry {
    /// Entry recording a committed cycle
    pub fn cycle_committed(topic: &str, report: &CycleReport) -> Result<Self, LedgerError> {
        Ok(Self {
            topic: topic.to_string(),
            event: CYCLE_COMMITTED.to_string(),
            payload: serde_json::to_value(report)?,
            timestamp: report.cycle_ts,
            idempotency_key: format!("{}:{}:{}", topic, CYCLE_COMMITTED, report.cycle_ts),
        })
    }
}

/// Append-only event sink
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether the ledger can accept appends
    async fn probe(&self) -> Result<bool, LedgerError>;

    /// Append an entry; returns false when the idempotency key already exists
    async fn append(&self, entry: &LedgerEntry) -> Result<bool, LedgerError>;
}
