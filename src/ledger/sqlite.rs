//! SQLite ledger table

use super::{Ledger, LedgerEntry, LedgerError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ledger (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        topic            TEXT    NOT NULL,
        event            TEXT    NOT NULL,
        payload          TEXT    NOT NULL,   -- JSON
        ts               INTEGER NOT NULL,
        idempotency_key  TEXT    NOT NULL UNIQUE
    );
";

/// Ledger stored in a `ledger` table of a shared connection
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Wrap a connection, creating the table when `create_table` is set
    ///
    /// Without `create_table` the table must already exist; [`Ledger::probe`]
    /// reports whether it does.
    pub fn new(conn: Arc<Mutex<Connection>>, create_table: bool) -> Result<Self, LedgerError> {
        let ledger = Self { conn };
        if create_table {
            ledger.lock().execute_batch(SCHEMA)?;
        }
        Ok(ledger)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored entries
    pub fn entry_count(&self) -> Result<usize, LedgerError> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM ledger", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn probe(&self) -> Result<bool, LedgerError> {
        let found = self
            .lock()
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'ledger'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn append(&self, entry: &LedgerEntry) -> Result<bool, LedgerError> {
        let payload = serde_json::to_string(&entry.payload)?;
        let inserted = self.lock().execute(
            "INSERT OR IGNORE INTO ledger (topic, event, payload, ts, idempotency_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.topic,
                entry.event,
                payload,
                entry.timestamp,
                entry.idempotency_key
            ],
        )?;
        Ok(inserted == 1)
    }
}
