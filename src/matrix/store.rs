//! Staged and committed snapshot storage

use super::types::{MatrixCell, MetricType, StagedRow};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operations available inside a commit transaction
pub trait StoreTx {
    /// Every staged row for (ts, metric)
    fn staged_rows(&mut self, metric: MetricType, ts: i64) -> Result<Vec<StagedRow>, StoreError>;

    /// Upsert rows into committed storage, last write wins per key
    fn upsert_committed(
        &mut self,
        metric: MetricType,
        ts: i64,
        rows: &[StagedRow],
    ) -> Result<usize, StoreError>;
}

/// Durable store behind the stage/commit pipeline
pub trait MatrixStore: Send + Sync {
    /// Replace the staged set for (ts, metric) with `cells`; all or nothing
    ///
    /// Rows of an earlier batch that are absent from `cells` are removed.
    fn upsert_staged(
        &self,
        session_id: &str,
        metric: MetricType,
        ts: i64,
        cells: &[(&str, &str, f64)],
    ) -> Result<usize, StoreError>;

    /// Run `f` in one transaction; an error rolls every write back
    fn with_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, StoreError>;

    /// Most recent committed value strictly before `ts` for a pair
    fn latest_before(
        &self,
        metric: MetricType,
        base: &str,
        quote: &str,
        ts: i64,
    ) -> Result<Option<f64>, StoreError>;

    /// Committed cells for (ts, metric)
    fn committed_rows(&self, metric: MetricType, ts: i64) -> Result<Vec<MatrixCell>, StoreError>;

    /// Latest committed timestamp at or before `ts`
    fn latest_committed_ts(&self, metric: MetricType, ts: i64) -> Result<Option<i64>, StoreError>;

    /// Delete staged rows older than `before_ts`
    fn prune_staging(&self, before_ts: i64) -> Result<usize, StoreError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS matrix_staged (
        ts          INTEGER NOT NULL,
        metric      TEXT    NOT NULL,
        base        TEXT    NOT NULL,
        quote       TEXT    NOT NULL,
        value       REAL    NOT NULL,
        session_id  TEXT    NOT NULL,
        staged_at   INTEGER NOT NULL,
        PRIMARY KEY (ts, metric, base, quote)
    );

    CREATE TABLE IF NOT EXISTS matrix_committed (
        ts            INTEGER NOT NULL,
        metric        TEXT    NOT NULL,
        base          TEXT    NOT NULL,
        quote         TEXT    NOT NULL,
        value         REAL    NOT NULL,
        session_id    TEXT    NOT NULL,
        committed_at  INTEGER NOT NULL,
        PRIMARY KEY (ts, metric, base, quote)
    );

    -- latest_before: WHERE metric = ? AND base = ? AND quote = ? AND ts < ?
    CREATE INDEX IF NOT EXISTS idx_committed_pair
        ON matrix_committed (metric, base, quote, ts);
";

/// SQLite-backed matrix store
///
/// The connection is shared so the ledger can write to the same database.
#[derive(Clone)]
pub struct SqliteMatrixStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMatrixStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::info!(path = %path.display(), "Opened matrix store");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shared handle to the underlying connection
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct SqliteTx<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl StoreTx for SqliteTx<'_> {
    fn staged_rows(&mut self, metric: MetricType, ts: i64) -> Result<Vec<StagedRow>, StoreError> {
        let mut stmt = self.tx.prepare_cached(
            "SELECT base, quote, value, session_id FROM matrix_staged
             WHERE ts = ?1 AND metric = ?2
             ORDER BY base, quote",
        )?;
        let rows = stmt
            .query_map(params![ts, metric.as_str()], |row| {
                Ok(StagedRow {
                    base: row.get(0)?,
                    quote: row.get(1)?,
                    value: row.get(2)?,
                    session_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_committed(
        &mut self,
        metric: MetricType,
        ts: i64,
        rows: &[StagedRow],
    ) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut stmt = self.tx.prepare_cached(
            "INSERT INTO matrix_committed (ts, metric, base, quote, value, session_id, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (ts, metric, base, quote) DO UPDATE SET
                 value = excluded.value,
                 session_id = excluded.session_id,
                 committed_at = excluded.committed_at",
        )?;
        for row in rows {
            stmt.execute(params![
                ts,
                metric.as_str(),
                row.base,
                row.quote,
                row.value,
                row.session_id,
                now
            ])?;
        }
        Ok(rows.len())
    }
}

impl MatrixStore for SqliteMatrixStore {
    fn upsert_staged(
        &self,
        session_id: &str,
        metric: MetricType,
        ts: i64,
        cells: &[(&str, &str, f64)],
    ) -> Result<usize, StoreError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let replaced = tx.execute(
            "DELETE FROM matrix_staged WHERE ts = ?1 AND metric = ?2",
            params![ts, metric.as_str()],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO matrix_staged (ts, metric, base, quote, value, session_id, staged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (ts, metric, base, quote) DO UPDATE SET
                     value = excluded.value,
                     session_id = excluded.session_id,
                     staged_at = excluded.staged_at",
            )?;
            for (base, quote, value) in cells {
                stmt.execute(params![ts, metric.as_str(), base, quote, value, session_id, now])?;
            }
        }
        tx.commit()?;
        if replaced > 0 {
            tracing::debug!(cycle_ts = ts, metric = %metric, replaced, "Replaced staged batch");
        }
        Ok(cells.len())
    }

    fn with_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T, StoreError>,
    {
        let mut conn = self.lock();
        let mut tx = SqliteTx {
            tx: conn.transaction()?,
        };
        // Dropping an uncommitted transaction rolls it back
        let value = f(&mut tx)?;
        tx.tx.commit()?;
        Ok(value)
    }

    fn latest_before(
        &self,
        metric: MetricType,
        base: &str,
        quote: &str,
        ts: i64,
    ) -> Result<Option<f64>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT value FROM matrix_committed
             WHERE metric = ?1 AND base = ?2 AND quote = ?3 AND ts < ?4
             ORDER BY ts DESC LIMIT 1",
        )?;
        let value = stmt
            .query_row(params![metric.as_str(), base, quote, ts], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn committed_rows(&self, metric: MetricType, ts: i64) -> Result<Vec<MatrixCell>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT base, quote, value FROM matrix_committed
             WHERE ts = ?1 AND metric = ?2
             ORDER BY base, quote",
        )?;
        let cells = stmt
            .query_map(params![ts, metric.as_str()], |row| {
                Ok(MatrixCell {
                    base: row.get(0)?,
                    quote: row.get(1)?,
                    value: row.get(2)?,
                    metric,
                    cycle_ts: ts,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    fn latest_committed_ts(&self, metric: MetricType, ts: i64) -> Result<Option<i64>, StoreError> {
        let conn = self.lock();
        let latest = conn.query_row(
            "SELECT MAX(ts) FROM matrix_committed WHERE metric = ?1 AND ts <= ?2",
            params![metric.as_str(), ts],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(latest)
    }

    fn prune_staging(&self, before_ts: i64) -> Result<usize, StoreError> {
        let conn = self.lock();
        let deleted = conn.execute("DELETE FROM matrix_staged WHERE ts < ?1", params![before_ts])?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(base: &str, quote: &str, value: f64) -> StagedRow {
        StagedRow {
            base: base.to_string(),
            quote: quote.to_string(),
            value,
            session_id: "s1".to_string(),
        }
    }

    #[test]
    fn test_staged_upsert_overwrites() {
        let store = SqliteMatrixStore::open_in_memory().unwrap();
        store
            .upsert_staged("s1", MetricType::Benchmark, 60_000, &[("BTC", "ETH", 20.0)])
            .unwrap();
        store
            .upsert_staged("s2", MetricType::Benchmark, 60_000, &[("BTC", "ETH", 21.0)])
            .unwrap();

        let rows = store
            .with_transaction(|tx| tx.staged_rows(MetricType::Benchmark, 60_000))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 21.0);
        assert_eq!(rows[0].session_id, "s2");
    }

    #[test]
    fn test_restage_drops_cells_missing_from_new_batch() {
        let store = SqliteMatrixStore::open_in_memory().unwrap();
        store
            .upsert_staged(
                "s1",
                MetricType::Benchmark,
                60_000,
                &[("BTC", "ETH", 20.0), ("ETH", "BTC", 0.05)],
            )
            .unwrap();
        store
            .upsert_staged("s1", MetricType::Pct24h, 60_000, &[("ETH", "BTC", 0.1)])
            .unwrap();
        store
            .upsert_staged("s1", MetricType::Benchmark, 60_000, &[("BTC", "ETH", 21.0)])
            .unwrap();

        let (benchmark, pct) = store
            .with_transaction(|tx| {
                Ok((
                    tx.staged_rows(MetricType::Benchmark, 60_000)?,
                    tx.staged_rows(MetricType::Pct24h, 60_000)?,
                ))
            })
            .unwrap();
        assert_eq!(benchmark.len(), 1);
        assert_eq!(benchmark[0].base, "BTC");
        assert_eq!(benchmark[0].value, 21.0);
        // other metrics at the same ts are untouched
        assert_eq!(pct.len(), 1);
    }

    #[test]
    fn test_latest_before_is_strict() {
        let store = SqliteMatrixStore::open_in_memory().unwrap();
        for (ts, value) in [(60_000, 100.0), (120_000, 105.0)] {
            store
                .with_transaction(|tx| {
                    tx.upsert_committed(MetricType::Benchmark, ts, &[row("BTC", "ETH", value)])
                })
                .unwrap();
        }

        let latest = |ts| {
            store
                .latest_before(MetricType::Benchmark, "BTC", "ETH", ts)
                .unwrap()
        };
        assert_eq!(latest(60_000), None);
        assert_eq!(latest(120_000), Some(100.0));
        assert_eq!(latest(180_000), Some(105.0));
        assert_eq!(
            store
                .latest_before(MetricType::Pct24h, "BTC", "ETH", 180_000)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = SqliteMatrixStore::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.with_transaction(|tx| {
            tx.upsert_committed(MetricType::Benchmark, 60_000, &[row("BTC", "ETH", 1.0)])?;
            Err(StoreError::Io(std::io::Error::other("boom")))
        });
        assert!(result.is_err());
        assert!(store
            .committed_rows(MetricType::Benchmark, 60_000)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_prune_staging() {
        let store = SqliteMatrixStore::open_in_memory().unwrap();
        for ts in [60_000, 120_000, 180_000] {
            store
                .upsert_staged("s1", MetricType::Delta, ts, &[("BTC", "ETH", 1.0)])
                .unwrap();
        }
        assert_eq!(store.prune_staging(180_000).unwrap(), 2);
        assert_eq!(store.prune_staging(180_000).unwrap(), 0);
    }

    #[test]
    fn test_latest_committed_ts() {
        let store = SqliteMatrixStore::open_in_memory().unwrap();
        assert_eq!(store.latest_committed_ts(MetricType::Benchmark, i64::MAX).unwrap(), None);
        store
            .with_transaction(|tx| {
                tx.upsert_committed(MetricType::Benchmark, 60_000, &[row("BTC", "ETH", 1.0)])
            })
            .unwrap();
        assert_eq!(
            store.latest_committed_ts(MetricType::Benchmark, 90_000).unwrap(),
            Some(60_000)
        );
        assert_eq!(store.latest_committed_ts(MetricType::Benchmark, 59_999).unwrap(), None);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("matrix.db");
        let store = SqliteMatrixStore::open(&path).unwrap();
        store
            .upsert_staged("s1", MetricType::Benchmark, 0, &[("BTC", "ETH", 1.0)])
            .unwrap();
        assert!(path.exists());
    }
}
